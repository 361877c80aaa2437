//! Configuration layer for warden
//!
//! - [`documents`]: the provider specification and authorization policy documents
//! - [`fingerprint`]: canonical content digests used for change detection
//! - [`config`]: the gateway's own settings (figment layered)
//! - [`logging`]: tracing subscriber setup

pub mod config;
pub mod documents;
pub mod fingerprint;
pub mod logging;

pub use config::{AppConfig, LogFormat, LoggingConfig};
pub use documents::{
    AuthorizationPolicy, ConfigDir, ConfigDocuments, DocumentSource, LoadedDocument,
    ProviderDocument, ProviderPolicy, ProviderSpec,
};
pub use fingerprint::Fingerprint;
