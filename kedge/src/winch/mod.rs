//! The client-side forward-proxy peer: maps an outbound authority to a
//! kedge hop and generates the PAC file browsers use to find it (spec
//! §4.7).

pub mod mapper;
pub mod pac;

pub use mapper::{Mapper, Rule};
