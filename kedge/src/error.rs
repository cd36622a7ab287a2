//! Runtime error taxonomy (spec §7). These are translated to protocol-native
//! failures by the dispatchers and never cause a panic in request-path code.
//! Startup/config fallibility uses `anyhow` instead — see [`crate::config`].

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KedgeError {
	#[error("unknown route to service")]
	UnknownRoute,

	#[error("unknown backend")]
	UnknownBackend,

	#[error("no ready connections")]
	NoReadyConnections,

	#[error("upstream error: {0}")]
	UpstreamError(String),

	#[error("no route")]
	NoRoute,
}

impl KedgeError {
	/// Maps to the canonical gRPC status code this error should surface as.
	pub fn grpc_code(&self) -> tonic::Code {
		match self {
			KedgeError::UnknownRoute => tonic::Code::Unimplemented,
			KedgeError::UnknownBackend => tonic::Code::Unimplemented,
			KedgeError::NoReadyConnections => tonic::Code::Unavailable,
			KedgeError::UpstreamError(_) => tonic::Code::Unavailable,
			KedgeError::NoRoute => tonic::Code::Unimplemented,
		}
	}

	/// Maps to the HTTP status this error should surface as, mirrored in
	/// `X-Kedge-Error`.
	pub fn http_status(&self) -> http::StatusCode {
		http::StatusCode::BAD_GATEWAY
	}
}
