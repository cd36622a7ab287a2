//! The two per-protocol dispatchers that carry bytes from an inbound call to
//! the picked upstream connection (spec §4.5, §4.6).

pub mod grpc;
pub mod http;

pub use grpc::GrpcDispatcher;
pub use http::HttpDispatcher;
