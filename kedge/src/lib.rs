//! Domain library for kedge: the router, backend pool, per-protocol
//! dispatchers, the winch client-side mapper, static configuration loading,
//! the TLS bouncer/listener, and the admin/metrics HTTP surface.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod management;
pub mod pool;
pub mod router;
pub mod transport;
pub mod types;
pub mod winch;

pub use error::KedgeError;
