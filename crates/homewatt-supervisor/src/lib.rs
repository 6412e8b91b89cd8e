//! Homewatt Supervisor Library
//!
//! Core functionality for the homewatt supervisor:
//! - Pre-flight steps (database provisioning, optional patch command)
//! - Child process specs for the worker and API server
//! - Supervisor loop: wait for the first exit, relay termination signals,
//!   propagate the first child's status

pub mod preflight;
pub mod process;
