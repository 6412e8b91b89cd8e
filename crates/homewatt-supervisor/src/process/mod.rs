//! Child process management for the worker and server.

pub mod spec;
pub mod supervisor;

pub use spec::{ChildRole, ChildSpec};
pub use supervisor::{
    ExitReport, Supervisor, SupervisorError, SupervisorSpec, TermSignal, exit_status_code,
};
