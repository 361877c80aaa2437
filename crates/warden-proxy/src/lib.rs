//! Process orchestration and protocol proxy engine
//!
//! Control flow, leaves first:
//! - [`channel`]: correlated JSON-RPC over one provider's stdin/stdout
//! - [`supervisor`]: provider process lifecycle (with [`terminate`] for process trees)
//! - [`discovery`] and [`schema`]: tool catalogs and parameter contracts
//! - [`registry`]: the authorization-gated exposed tool set and the [`ToolSink`] seam
//! - [`reconcile`]: the polling loop tying it all to the configuration documents

pub mod channel;
pub mod discovery;
pub mod reconcile;
pub mod registry;
pub mod schema;
pub mod supervisor;
pub mod terminate;

pub use channel::{ChannelOptions, FrameDecoder, ProviderChannel};
pub use discovery::{discover, ProviderClient};
pub use reconcile::{Reconciler, TickOutcome};
pub use registry::{
    AuthorizationRegistry, ProviderToolHandler, Registry, RegistryUpdate, ToolHandler,
    ToolRegistration, ToolSink,
};
pub use schema::{adapt_schema, SchemaNode};
pub use supervisor::{ProcessStatus, ProcessSupervisor, ReconcileSummary, SupervisorOptions};
