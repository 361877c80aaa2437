//! Foundation Layer - error taxonomy, wire model, and parameter contracts
//!
//! This crate provides the building blocks shared by every warden crate:
//! - Error types for transport channels and the gateway as a whole
//! - JSON-RPC 2.0 message types and MCP method names
//! - The tool model (descriptors, bindings, composite names)
//! - Parameter contracts used to validate tool arguments

pub mod contract;
pub mod error;
pub mod model;
pub mod protocol;

// Re-export commonly used types for convenience
pub use contract::{ContractKind, ContractViolation, Field, ParamContract};
pub use error::*;
pub use model::*;
