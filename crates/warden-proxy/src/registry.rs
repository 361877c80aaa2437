//! Authorization-gated tool registry
//!
//! The exposed tool set is recomputed from the policy document, restricted to
//! the providers still configured, and from fresh provider catalogs. It is then
//! applied to the upstream-facing [`ToolSink`]:
//! - nothing removed: only the new tools are added to the live interface
//! - anything removed: the whole interface is replaced, because MCP has no way to
//!   unregister a single tool

use crate::discovery::ProviderClient;
use crate::schema::adapt_schema;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use warden_config::{AuthorizationPolicy, ProviderDocument};
use warden_foundation::{ExposedTool, ParamContract, ToolBinding, ToolDescriptor};

/// Handles one invocation of an exposed tool.
///
/// Never fails at the protocol level: problems are reported in the returned
/// payload as `{"error": "<message>"}`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, arguments: Value) -> Value;
}

/// An exposed tool together with the handler that serves it
#[derive(Clone)]
pub struct ToolRegistration {
    pub tool: ExposedTool,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistration")
            .field("tool", &self.tool.name)
            .finish_non_exhaustive()
    }
}

/// The upstream-facing interface, as seen by the engine
#[cfg_attr(test, mockall::automock)]
pub trait ToolSink: Send + Sync {
    /// Register additional tools on the live interface
    fn add_tools(&self, registrations: Vec<ToolRegistration>);

    /// Discard the live interface and expose exactly `registrations` on a fresh one
    fn replace_interface(&self, registrations: Vec<ToolRegistration>);
}

/// Routes invocations of one exposed tool to its provider
pub struct ProviderToolHandler {
    client: Arc<dyn ProviderClient>,
    binding: ToolBinding,
}

impl ProviderToolHandler {
    pub fn new(client: Arc<dyn ProviderClient>, binding: ToolBinding) -> Self {
        Self { client, binding }
    }
}

#[async_trait]
impl ToolHandler for ProviderToolHandler {
    async fn invoke(&self, arguments: Value) -> Value {
        let ToolBinding {
            provider_id,
            tool_name,
        } = &self.binding;
        info!(provider_id = %provider_id, tool = %tool_name, "Calling tool");

        match self.client.call_tool(provider_id, tool_name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                error!(provider_id = %provider_id, tool = %tool_name, error = %e, "Tool call failed");
                json!({ "error": e.to_string() })
            }
        }
    }
}

/// Exposed tools keyed by composite name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    tools: BTreeMap<String, ExposedTool>,
}

impl Registry {
    pub fn insert(&mut self, tool: ExposedTool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&ExposedTool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tools(&self) -> impl Iterator<Item = &ExposedTool> {
        self.tools.values()
    }
}

/// How a new registry was applied to the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryUpdate {
    /// Only additions (possibly none); existing registrations untouched
    Incremental { added: Vec<String> },
    /// At least one tool disappeared; the interface was rebuilt
    FullReplacement {
        removed: Vec<String>,
        total: usize,
    },
}

/// Builds the exposed tool set and keeps the sink in step with it
pub struct AuthorizationRegistry {
    client: Arc<dyn ProviderClient>,
    sink: Arc<dyn ToolSink>,
    exposed: Registry,
}

impl AuthorizationRegistry {
    pub fn new(client: Arc<dyn ProviderClient>, sink: Arc<dyn ToolSink>) -> Self {
        Self {
            client,
            sink,
            exposed: Registry::default(),
        }
    }

    /// The registry currently applied to the sink
    pub fn exposed(&self) -> &Registry {
        &self.exposed
    }

    /// Compute the registry implied by `policy` for the providers in `providers`.
    ///
    /// Policy entries for providers that are not configured expose nothing.
    /// Catalogs are fetched concurrently. Authorized tools a provider did not
    /// report (or an unreachable provider's tools) get a fallback descriptor.
    pub async fn rebuild(
        &self,
        providers: &ProviderDocument,
        policy: &AuthorizationPolicy,
    ) -> Registry {
        for provider_id in policy.authorized_mcp_servers.keys() {
            if !providers.mcp_servers.contains_key(provider_id) {
                debug!(
                    provider_id = %provider_id,
                    "Provider is not configured, ignoring its authorized tools"
                );
            }
        }

        let authorized: Vec<(&String, &[String])> = providers
            .mcp_servers
            .keys()
            .map(|provider_id| (provider_id, policy.authorized_tools(provider_id)))
            .filter(|(_, tools)| !tools.is_empty())
            .collect();

        let mut fetches = JoinSet::new();
        for (provider_id, _) in &authorized {
            let client = self.client.clone();
            let provider_id = (*provider_id).clone();
            fetches.spawn(async move {
                let catalog = client.list_tools(&provider_id).await;
                (provider_id, catalog)
            });
        }

        let mut catalogs: HashMap<String, HashMap<String, ToolDescriptor>> = HashMap::new();
        while let Some(joined) = fetches.join_next().await {
            let (provider_id, catalog) = match joined {
                Ok(fetched) => fetched,
                Err(e) => {
                    error!(error = %e, "Catalog fetch task failed");
                    continue;
                }
            };
            let descriptors = match catalog {
                Ok(descriptors) => descriptors,
                Err(e) => {
                    warn!(
                        provider_id = %provider_id,
                        error = %e,
                        "Could not list tools, exposing authorized tools with fallback descriptors"
                    );
                    Vec::new()
                }
            };
            catalogs.insert(
                provider_id,
                descriptors
                    .into_iter()
                    .map(|descriptor| (descriptor.name.clone(), descriptor))
                    .collect(),
            );
        }

        let mut registry = Registry::default();
        for (provider_id, tools) in authorized {
            let catalog = catalogs.get(provider_id);
            for tool_name in tools {
                let descriptor = catalog.and_then(|catalog| catalog.get(tool_name));
                registry.insert(expose(provider_id, tool_name, descriptor));
            }
        }
        registry
    }

    /// Apply `registry` to the sink, choosing incremental or full replacement
    pub fn apply(&mut self, registry: Registry) -> RegistryUpdate {
        let current = self.exposed.names();
        let next = registry.names();
        let removed: Vec<String> = current.difference(&next).cloned().collect();

        let update = if removed.is_empty() {
            let added: Vec<String> = next.difference(&current).cloned().collect();
            if added.is_empty() {
                debug!(tools = next.len(), "Exposed tool set unchanged");
            } else {
                let registrations = added
                    .iter()
                    .filter_map(|name| registry.get(name))
                    .map(|tool| self.registration(tool))
                    .collect();
                self.sink.add_tools(registrations);
                info!(added = ?added, "Registered new tools");
            }
            RegistryUpdate::Incremental { added }
        } else {
            let registrations = registry.tools().map(|tool| self.registration(tool)).collect();
            self.sink.replace_interface(registrations);
            info!(removed = ?removed, total = next.len(), "Replaced tool interface");
            RegistryUpdate::FullReplacement {
                removed,
                total: next.len(),
            }
        };

        self.exposed = registry;
        update
    }

    /// Rebuild from the documents and apply the result
    pub async fn sync(
        &mut self,
        providers: &ProviderDocument,
        policy: &AuthorizationPolicy,
    ) -> RegistryUpdate {
        let registry = self.rebuild(providers, policy).await;
        self.apply(registry)
    }

    fn registration(&self, tool: &ExposedTool) -> ToolRegistration {
        ToolRegistration {
            tool: tool.clone(),
            handler: Arc::new(ProviderToolHandler::new(
                self.client.clone(),
                tool.binding.clone(),
            )),
        }
    }
}

/// Build the exposed form of an authorized tool
fn expose(provider_id: &str, tool_name: &str, descriptor: Option<&ToolDescriptor>) -> ExposedTool {
    let binding = ToolBinding::new(provider_id, tool_name);
    let generic_description = || format!("Tool '{}' provided by '{}'", tool_name, provider_id);

    let (description, contract) = match descriptor {
        Some(descriptor) => (
            descriptor
                .description
                .clone()
                .unwrap_or_else(generic_description),
            adapt_schema(&descriptor.input_schema),
        ),
        None => (generic_description(), ParamContract::any()),
    };

    ExposedTool {
        name: binding.composite_name(),
        description,
        contract,
        binding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use warden_config::{ProviderPolicy, ProviderSpec};
    use warden_foundation::{WardenError, WardenResult};

    /// Catalogs served from memory; providers missing from the map are unreachable
    struct StaticCatalogs {
        catalogs: HashMap<String, Vec<ToolDescriptor>>,
    }

    #[async_trait]
    impl ProviderClient for StaticCatalogs {
        async fn list_tools(&self, provider_id: &str) -> WardenResult<Vec<ToolDescriptor>> {
            self.catalogs
                .get(provider_id)
                .cloned()
                .ok_or_else(|| WardenError::NotRunning(provider_id.to_string()))
        }

        async fn call_tool(&self, provider_id: &str, tool_name: &str, arguments: Value) -> WardenResult<Value> {
            if self.catalogs.contains_key(provider_id) {
                Ok(json!({"tool": tool_name, "echo": arguments}))
            } else {
                Err(WardenError::NotRunning(provider_id.to_string()))
            }
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: Some(format!("{} tool", name)),
            input_schema: json!({
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"]
            }),
        }
    }

    fn client() -> Arc<dyn ProviderClient> {
        let mut catalogs = HashMap::new();
        catalogs.insert(
            "alpha".to_string(),
            vec![descriptor("sum"), descriptor("sub"), descriptor("secret")],
        );
        catalogs.insert("beta".to_string(), vec![descriptor("sum")]);
        Arc::new(StaticCatalogs { catalogs })
    }

    fn policy(entries: &[(&str, &[&str])]) -> AuthorizationPolicy {
        AuthorizationPolicy {
            authorized_mcp_servers: entries
                .iter()
                .map(|(id, tools)| {
                    (
                        id.to_string(),
                        ProviderPolicy {
                            authorized_tools: tools.iter().map(|t| t.to_string()).collect(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn configured(ids: &[&str]) -> ProviderDocument {
        ProviderDocument {
            mcp_servers: ids
                .iter()
                .map(|id| (id.to_string(), ProviderSpec::new(format!("{}-server", id), vec![])))
                .collect(),
        }
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_rebuild_exposes_exactly_the_authorized_tools() {
        let registry = AuthorizationRegistry::new(client(), Arc::new(MockToolSink::new()));
        let built = registry
            .rebuild(
                &configured(&["alpha", "beta"]),
                &policy(&[("alpha", &["sum", "sub"]), ("beta", &["sum"])]),
            )
            .await;

        assert_eq!(built.names(), names(&["alpha__sub", "alpha__sum", "beta__sum"]));
        let sum = built.get("alpha__sum").unwrap();
        assert_eq!(sum.description, "sum tool");
        assert_eq!(sum.binding, ToolBinding::new("alpha", "sum"));
        assert!(sum.contract.validate(&json!({"a": 2, "b": 3})).is_ok());
        assert!(sum.contract.validate(&json!({"a": 2})).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_provider_gets_fallback_descriptors() {
        let registry = AuthorizationRegistry::new(client(), Arc::new(MockToolSink::new()));
        let built = registry
            .rebuild(
                &configured(&["alpha", "gamma"]),
                &policy(&[("gamma", &["lookup"]), ("alpha", &["missing"])]),
            )
            .await;

        assert_eq!(built.names(), names(&["alpha__missing", "gamma__lookup"]));
        let lookup = built.get("gamma__lookup").unwrap();
        assert_eq!(lookup.contract, ParamContract::any());
        assert_eq!(lookup.description, "Tool 'lookup' provided by 'gamma'");
    }

    #[tokio::test]
    async fn test_additions_are_applied_incrementally() {
        let mut sink = MockToolSink::new();
        sink.expect_add_tools()
            .withf(|regs: &Vec<ToolRegistration>| {
                regs.len() == 1 && regs[0].tool.name == "alpha__sum"
            })
            .times(1)
            .return_const(());
        sink.expect_add_tools()
            .withf(|regs: &Vec<ToolRegistration>| {
                regs.len() == 1 && regs[0].tool.name == "alpha__sub"
            })
            .times(1)
            .return_const(());
        sink.expect_replace_interface().never();

        let mut registry = AuthorizationRegistry::new(client(), Arc::new(sink));
        let providers = configured(&["alpha"]);
        let first = registry.sync(&providers, &policy(&[("alpha", &["sum"])])).await;
        assert_eq!(
            first,
            RegistryUpdate::Incremental {
                added: vec!["alpha__sum".into()]
            }
        );

        let second = registry
            .sync(&providers, &policy(&[("alpha", &["sum", "sub"])]))
            .await;
        assert_eq!(
            second,
            RegistryUpdate::Incremental {
                added: vec!["alpha__sub".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_unchanged_registry_touches_nothing() {
        let mut sink = MockToolSink::new();
        sink.expect_add_tools().times(1).return_const(());
        sink.expect_replace_interface().never();

        let mut registry = AuthorizationRegistry::new(client(), Arc::new(sink));
        let rules = policy(&[("alpha", &["sum"])]);
        let providers = configured(&["alpha"]);
        registry.sync(&providers, &rules).await;
        let update = registry.sync(&providers, &rules).await;
        assert_eq!(update, RegistryUpdate::Incremental { added: vec![] });
    }

    #[tokio::test]
    async fn test_removal_triggers_full_replacement_with_every_tool() {
        let mut sink = MockToolSink::new();
        sink.expect_add_tools().times(1).return_const(());
        sink.expect_replace_interface()
            .withf(|regs: &Vec<ToolRegistration>| {
                let mut names: Vec<&str> = regs.iter().map(|r| r.tool.name.as_str()).collect();
                names.sort();
                names == ["alpha__secret", "beta__sum"]
            })
            .times(1)
            .return_const(());

        let mut registry = AuthorizationRegistry::new(client(), Arc::new(sink));
        let providers = configured(&["alpha", "beta"]);
        registry
            .sync(
                &providers,
                &policy(&[("alpha", &["sum", "secret"]), ("beta", &["sum"])]),
            )
            .await;
        let update = registry
            .sync(&providers, &policy(&[("alpha", &["secret"]), ("beta", &["sum"])]))
            .await;

        assert_eq!(
            update,
            RegistryUpdate::FullReplacement {
                removed: vec!["alpha__sum".into()],
                total: 2
            }
        );
        assert_eq!(registry.exposed().names(), names(&["alpha__secret", "beta__sum"]));
    }

    #[tokio::test]
    async fn test_unconfigured_provider_exposes_nothing() {
        let registry = AuthorizationRegistry::new(client(), Arc::new(MockToolSink::new()));
        let built = registry
            .rebuild(
                &configured(&["beta"]),
                &policy(&[("alpha", &["sum"]), ("beta", &["sum"])]),
            )
            .await;

        assert_eq!(built.names(), names(&["beta__sum"]));
    }

    #[tokio::test]
    async fn test_unconfiguring_provider_replaces_interface_without_its_tools() {
        let mut sink = MockToolSink::new();
        sink.expect_add_tools().times(1).return_const(());
        sink.expect_replace_interface()
            .withf(|regs: &Vec<ToolRegistration>| {
                regs.len() == 1 && regs[0].tool.name == "beta__sum"
            })
            .times(1)
            .return_const(());

        let mut registry = AuthorizationRegistry::new(client(), Arc::new(sink));
        let rules = policy(&[("alpha", &["sum"]), ("beta", &["sum"])]);
        registry.sync(&configured(&["alpha", "beta"]), &rules).await;
        let update = registry.sync(&configured(&["beta"]), &rules).await;

        assert_eq!(
            update,
            RegistryUpdate::FullReplacement {
                removed: vec!["alpha__sum".into()],
                total: 1
            }
        );
    }

    #[tokio::test]
    async fn test_handler_forwards_arguments_and_reports_failures_as_payload() {
        let handler = ProviderToolHandler::new(client(), ToolBinding::new("alpha", "sum"));
        let result = handler.invoke(json!({"a": 2, "b": 3})).await;
        assert_eq!(result, json!({"tool": "sum", "echo": {"a": 2, "b": 3}}));

        let handler = ProviderToolHandler::new(client(), ToolBinding::new("gamma", "lookup"));
        let result = handler.invoke(json!({})).await;
        assert_eq!(result, json!({"error": "Provider 'gamma' is not running"}));
    }

    #[test]
    fn test_fallback_expose_without_descriptor() {
        let tool = expose("alpha", "sum", None);
        assert_eq!(tool.name, "alpha__sum");
        assert_eq!(tool.input_schema(), json!({"type": "object"}));
    }
}
