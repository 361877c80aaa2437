//! One-time bootstrap of the configuration root (`warden setup`)
//!
//! Existing documents are never touched:
//! - `config.json` is created from the client configuration, which is then
//!   rewritten to launch warden in place of the providers it listed
//! - `controls.json` is created by starting each provider once and authorizing
//!   every tool it reports

use anyhow::{bail, Context};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use warden_config::{AuthorizationPolicy, ConfigDir, ProviderDocument, ProviderPolicy};
use warden_proxy::{discover, SupervisorOptions};

/// Name the gateway is registered under in the rewritten client configuration
pub const GATEWAY_SERVER_NAME: &str = "warden";

/// What setup created
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SetupReport {
    /// Client configuration the provider document was created from
    pub client_config: Option<PathBuf>,
    /// Tools authorized per provider, when the policy document was created
    pub authorized: Option<BTreeMap<String, Vec<String>>>,
}

pub async fn run_setup(
    config_dir: &ConfigDir,
    options: SupervisorOptions,
    client_config: Option<&Path>,
    gateway_command: Option<&Path>,
) -> anyhow::Result<SetupReport> {
    std::fs::create_dir_all(config_dir.log_dir()).with_context(|| {
        format!(
            "Failed to create configuration root {}",
            config_dir.root().display()
        )
    })?;

    let mut report = SetupReport::default();

    if config_dir.provider_document_path().exists() {
        info!(
            path = %config_dir.provider_document_path().display(),
            "Provider document exists, leaving it unchanged"
        );
    } else {
        match client_config {
            Some(client_config) => {
                import_client_config(config_dir, client_config, gateway_command)?;
                report.client_config = Some(client_config.to_path_buf());
            }
            None => warn!(
                path = %config_dir.provider_document_path().display(),
                "No provider document and no client configuration given, skipping"
            ),
        }
    }

    if config_dir.policy_document_path().exists() {
        info!(
            path = %config_dir.policy_document_path().display(),
            "Authorization policy exists, leaving it unchanged"
        );
    } else if config_dir.provider_document_path().exists() {
        report.authorized = Some(write_initial_policy(config_dir, options).await?);
    } else {
        warn!("No provider document to discover tools from, skipping authorization policy");
    }

    Ok(report)
}

/// Copy the client's providers into the config root and point the client at warden
fn import_client_config(
    config_dir: &ConfigDir,
    client_config: &Path,
    gateway_command: Option<&Path>,
) -> anyhow::Result<()> {
    if !client_config.is_file() {
        bail!("Client configuration not found: {}", client_config.display());
    }
    let executable = resolve_gateway_executable(gateway_command)?;

    let content = std::fs::read_to_string(client_config)
        .with_context(|| format!("Failed to read {}", client_config.display()))?;
    let providers: ProviderDocument = serde_json::from_str(&content)
        .with_context(|| format!("Invalid client configuration {}", client_config.display()))?;

    std::fs::write(config_dir.provider_document_path(), &content).with_context(|| {
        format!(
            "Failed to write {}",
            config_dir.provider_document_path().display()
        )
    })?;
    info!(
        from = %client_config.display(),
        providers = providers.mcp_servers.len(),
        "Copied client configuration"
    );

    let mut args = Vec::new();
    if config_dir.root() != ConfigDir::default_root() {
        args.push("--config-dir".to_string());
        args.push(config_dir.root().to_string_lossy().into_owned());
    }
    args.push("start".to_string());

    let rewritten = json!({
        "mcpServers": {
            GATEWAY_SERVER_NAME: {
                "command": executable.to_string_lossy(),
                "args": args,
            }
        }
    });
    std::fs::write(client_config, serde_json::to_string_pretty(&rewritten)?)
        .with_context(|| format!("Failed to rewrite {}", client_config.display()))?;
    info!(path = %client_config.display(), "Client configuration now launches warden");
    Ok(())
}

/// The executable the client should launch: an explicit command (a path or a
/// name on `PATH`) or this binary
fn resolve_gateway_executable(gateway_command: Option<&Path>) -> anyhow::Result<PathBuf> {
    match gateway_command {
        Some(command) => which::which(command)
            .with_context(|| format!("Gateway executable not found: {}", command.display())),
        None => std::env::current_exe().context("Failed to locate the warden executable"),
    }
}

/// Discover every provider's tools and authorize all of them
async fn write_initial_policy(
    config_dir: &ConfigDir,
    options: SupervisorOptions,
) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    let providers = config_dir
        .load_providers()
        .context("Failed to load provider document")?;

    let mut policy = AuthorizationPolicy::default();
    for (provider_id, spec) in &providers.content.mcp_servers {
        let tools = match discover(provider_id, spec, options.clone()).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(
                    provider_id = %provider_id,
                    error = %e,
                    "Tool discovery failed, authorizing no tools"
                );
                Vec::new()
            }
        };
        policy.authorized_mcp_servers.insert(
            provider_id.clone(),
            ProviderPolicy {
                authorized_tools: tools,
            },
        );
    }

    std::fs::write(
        config_dir.policy_document_path(),
        serde_json::to_string_pretty(&policy)?,
    )
    .with_context(|| {
        format!(
            "Failed to write {}",
            config_dir.policy_document_path().display()
        )
    })?;
    info!(
        path = %config_dir.policy_document_path().display(),
        "Wrote authorization policy"
    );

    Ok(policy
        .authorized_mcp_servers
        .into_iter()
        .map(|(provider_id, rules)| (provider_id, rules.authorized_tools))
        .collect())
}
