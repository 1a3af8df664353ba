//! # Application Module
//!
//! Application services orchestrating the domain and outbound ports.

pub mod router;
pub mod service;

pub use router::{parse_params, CorrelationId, Method, MethodRouter, Reply};
pub use service::CompactStreamerService;
