//! Tool discovery and invocation against running providers

use crate::channel::ProviderChannel;
use crate::supervisor::{ProcessSupervisor, SupervisorOptions};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use warden_config::ProviderSpec;
use warden_foundation::protocol::methods;
use warden_foundation::{ChannelError, ToolDescriptor, WardenError, WardenResult};

/// Upper bound on `tools/list` pages followed for one catalog
const MAX_CATALOG_PAGES: usize = 64;

/// Catalog and invocation access to providers, by id
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// The provider's tool catalog. An empty catalog is not an error.
    async fn list_tools(&self, provider_id: &str) -> WardenResult<Vec<ToolDescriptor>>;

    /// Invoke one tool and return the provider's result unchanged
    async fn call_tool(&self, provider_id: &str, tool_name: &str, arguments: Value) -> WardenResult<Value>;
}

#[async_trait]
impl ProviderClient for ProcessSupervisor {
    async fn list_tools(&self, provider_id: &str) -> WardenResult<Vec<ToolDescriptor>> {
        let channel = self
            .channel(provider_id)
            .await
            .ok_or_else(|| WardenError::NotRunning(provider_id.to_string()))?;
        Ok(list_tools(&channel).await?)
    }

    async fn call_tool(&self, provider_id: &str, tool_name: &str, arguments: Value) -> WardenResult<Value> {
        let channel = self
            .channel(provider_id)
            .await
            .ok_or_else(|| WardenError::NotRunning(provider_id.to_string()))?;
        Ok(call_tool(&channel, tool_name, arguments).await?)
    }
}

/// Fetch a provider's full catalog, following `nextCursor` pagination
pub async fn list_tools(channel: &ProviderChannel) -> Result<Vec<ToolDescriptor>, ChannelError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_CATALOG_PAGES {
        let params = match &cursor {
            Some(cursor) => json!({ "cursor": cursor }),
            None => json!({}),
        };
        let page = channel.request(methods::TOOLS_LIST, params).await?;

        if let Some(entries) = page.get("tools").and_then(Value::as_array) {
            for entry in entries {
                match serde_json::from_value::<ToolDescriptor>(entry.clone()) {
                    Ok(descriptor) => tools.push(descriptor),
                    Err(e) => warn!(
                        provider_id = %channel.provider_id(),
                        error = %e,
                        "Skipping malformed catalog entry"
                    ),
                }
            }
        }

        cursor = page
            .get("nextCursor")
            .and_then(Value::as_str)
            .filter(|next| !next.is_empty())
            .map(str::to_string);
        if cursor.is_none() {
            break;
        }
    }

    if cursor.is_some() {
        warn!(
            provider_id = %channel.provider_id(),
            pages = MAX_CATALOG_PAGES,
            "Catalog pagination limit reached, ignoring remaining pages"
        );
    }

    debug!(provider_id = %channel.provider_id(), tools_count = tools.len(), "Discovered tools");
    Ok(tools)
}

/// Forward an invocation as `tools/call {name, arguments}`
pub async fn call_tool(
    channel: &ProviderChannel,
    tool_name: &str,
    arguments: Value,
) -> Result<Value, ChannelError> {
    channel
        .request(
            methods::TOOLS_CALL,
            json!({ "name": tool_name, "arguments": arguments }),
        )
        .await
}

/// Start a provider transiently, list its tools, and stop it again.
///
/// Returns tool names in ascending order. Used to bootstrap the authorization
/// policy.
pub async fn discover(
    provider_id: &str,
    spec: &ProviderSpec,
    options: SupervisorOptions,
) -> WardenResult<Vec<String>> {
    let supervisor = ProcessSupervisor::new(options);
    supervisor.start(provider_id, spec).await?;

    let catalog = supervisor.list_tools(provider_id).await;
    supervisor.stop(provider_id).await;

    let mut names: Vec<String> = catalog?.into_iter().map(|tool| tool.name).collect();
    names.sort();
    names.dedup();
    info!(provider_id = %provider_id, tools = ?names, "Discovered provider tools");
    Ok(names)
}
