//! The two externally edited configuration documents
//!
//! - `config.json`: which provider processes to run
//!   (`{"mcpServers": {"<id>": {"command", "args", "env"}}}`)
//! - `controls.json`: which of their tools may be exposed
//!   (`{"authorizedMcpServers": {"<id>": {"authorizedTools": [...]}}}`)
//!
//! Both are re-read on every reconciliation tick and fingerprinted by canonical
//! content.

use crate::fingerprint::Fingerprint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use warden_foundation::{is_valid_provider_id, WardenError, WardenResult};

/// File name of the provider specification document
pub const PROVIDER_DOCUMENT_FILE: &str = "config.json";
/// File name of the authorization policy document
pub const POLICY_DOCUMENT_FILE: &str = "controls.json";
/// File name of the optional gateway settings
pub const SETTINGS_FILE: &str = "warden.toml";
/// Directory (under the config root) holding gateway and provider logs
pub const LOG_DIR: &str = "logs";

/// How to launch one provider process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ProviderSpec {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    /// Canonical content fingerprint, used to decide whether a running process
    /// must be restarted
    pub fn fingerprint(&self) -> WardenResult<Fingerprint> {
        Fingerprint::of(self)
    }
}

/// Provider specification document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDocument {
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ProviderSpec>,
}

/// Authorized tools of one provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPolicy {
    #[serde(default)]
    pub authorized_tools: Vec<String>,
}

/// Authorization policy document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicy {
    #[serde(default)]
    pub authorized_mcp_servers: BTreeMap<String, ProviderPolicy>,
}

impl AuthorizationPolicy {
    /// Tools authorized for a provider (empty when the provider is not listed)
    pub fn authorized_tools(&self, provider_id: &str) -> &[String] {
        self.authorized_mcp_servers
            .get(provider_id)
            .map(|policy| policy.authorized_tools.as_slice())
            .unwrap_or(&[])
    }
}

/// Documents whose entries are keyed by provider id
trait ProviderKeyed {
    fn provider_ids(&mut self) -> Vec<String>;
    fn remove_provider(&mut self, provider_id: &str);
}

impl ProviderKeyed for ProviderDocument {
    fn provider_ids(&mut self) -> Vec<String> {
        self.mcp_servers.keys().cloned().collect()
    }

    fn remove_provider(&mut self, provider_id: &str) {
        self.mcp_servers.remove(provider_id);
    }
}

impl ProviderKeyed for AuthorizationPolicy {
    fn provider_ids(&mut self) -> Vec<String> {
        self.authorized_mcp_servers.keys().cloned().collect()
    }

    fn remove_provider(&mut self, provider_id: &str) {
        self.authorized_mcp_servers.remove(provider_id);
    }
}

/// A parsed document together with the fingerprint of its canonical content
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument<T> {
    pub content: T,
    pub fingerprint: Fingerprint,
}

/// Both documents as read in one tick
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocuments {
    pub providers: LoadedDocument<ProviderDocument>,
    pub policy: LoadedDocument<AuthorizationPolicy>,
}

/// Source of configuration documents, consumed read-only on every tick
pub trait DocumentSource: Send + Sync {
    fn load(&self) -> WardenResult<ConfigDocuments>;
}

/// The gateway's configuration root directory and the paths derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.warden`, falling back to `./.warden` when no home directory is known
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".warden")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn provider_document_path(&self) -> PathBuf {
        self.root.join(PROVIDER_DOCUMENT_FILE)
    }

    pub fn policy_document_path(&self) -> PathBuf {
        self.root.join(POLICY_DOCUMENT_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    /// Read and parse the provider specification document
    pub fn load_providers(&self) -> WardenResult<LoadedDocument<ProviderDocument>> {
        load_document(&self.provider_document_path())
    }

    /// Read and parse the authorization policy document
    pub fn load_policy(&self) -> WardenResult<LoadedDocument<AuthorizationPolicy>> {
        load_document(&self.policy_document_path())
    }
}

impl DocumentSource for ConfigDir {
    fn load(&self) -> WardenResult<ConfigDocuments> {
        Ok(ConfigDocuments {
            providers: self.load_providers()?,
            policy: self.load_policy()?,
        })
    }
}

/// Read a JSON document, fingerprint its raw content, and drop entries whose
/// provider id cannot be used to build composite tool names.
fn load_document<T>(path: &Path) -> WardenResult<LoadedDocument<T>>
where
    T: DeserializeOwned + ProviderKeyed,
{
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WardenError::config_missing(path));
        }
        Err(e) => return Err(e.into()),
    };

    let raw: Value = serde_json::from_str(&text).map_err(|e| {
        WardenError::config(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    let fingerprint = Fingerprint::of(&raw)?;
    let mut content: T = serde_json::from_value(raw).map_err(|e| {
        WardenError::config(format!("Unexpected structure in {}: {}", path.display(), e))
    })?;

    for provider_id in content.provider_ids() {
        if !is_valid_provider_id(&provider_id) {
            warn!(
                provider_id = %provider_id,
                path = %path.display(),
                "Ignoring provider entry: id is empty or contains the composite separator"
            );
            content.remove_provider(&provider_id);
        }
    }

    debug!(path = %path.display(), fingerprint = %fingerprint.short(), "Loaded configuration document");
    Ok(LoadedDocument {
        content,
        fingerprint,
    })
}
