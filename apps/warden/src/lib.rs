//! warden: an MCP gateway
//!
//! `warden start` supervises the configured tool providers and serves the tools
//! the authorization policy allows over stdio. `warden setup` bootstraps the
//! configuration root from an existing MCP client configuration.

pub mod cli;
pub mod gateway;
pub mod setup;
