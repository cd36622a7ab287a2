//! Process-wide ambient concerns shared by the `kedge` and `winch` binaries:
//! graceful draining, signal handling, readiness tracking, logging setup and
//! build/version metadata. Nothing in this crate knows about routes, backends
//! or proxying.

pub mod drain;
pub mod readiness;
pub mod signal;
pub mod telemetry;
pub mod version;
