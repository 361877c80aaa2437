//! Upstream-facing transport for warden
//!
//! The engine publishes tool registrations into an [`InterfaceHost`]; the
//! [`McpServer`] serves whatever interface the host currently holds to the MCP
//! client on the other end of stdin/stdout.

pub mod interface;
pub mod server;

pub use interface::{InterfaceHost, ToolInterface};
pub use server::{start_stdio_server, McpServer};
