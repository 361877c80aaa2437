//! The live tool interface and its host
//!
//! A [`ToolInterface`] is immutable once published. Incremental updates publish a
//! copy with the new registrations added, full replacement publishes a fresh one;
//! either way readers holding the previous `Arc` keep a consistent view until they
//! finish.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use warden_proxy::{ToolRegistration, ToolSink};

/// Registrations keyed by composite name
#[derive(Debug, Clone, Default)]
pub struct ToolInterface {
    tools: BTreeMap<String, ToolRegistration>,
}

impl ToolInterface {
    pub fn new(registrations: Vec<ToolRegistration>) -> Self {
        let mut interface = Self::default();
        interface.register(registrations);
        interface
    }

    fn register(&mut self, registrations: Vec<ToolRegistration>) {
        for registration in registrations {
            self.tools.insert(registration.tool.name.clone(), registration);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolRegistration> {
        self.tools.get(name)
    }

    /// Registrations in composite-name order
    pub fn registrations(&self) -> impl Iterator<Item = &ToolRegistration> {
        self.tools.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Holds the interface currently served upstream.
///
/// Every change bumps a revision counter observable through [`subscribe`](Self::subscribe).
pub struct InterfaceHost {
    current: RwLock<Arc<ToolInterface>>,
    revision: watch::Sender<u64>,
}

impl Default for InterfaceHost {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceHost {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::new(ToolInterface::default())),
            revision,
        }
    }

    /// The interface as of now
    pub fn snapshot(&self) -> Arc<ToolInterface> {
        self.current.read().clone()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn publish(&self, interface: ToolInterface) {
        let tools = interface.len();
        *self.current.write() = Arc::new(interface);
        self.revision.send_modify(|revision| *revision += 1);
        debug!(tools, revision = self.revision(), "Published tool interface");
    }
}

impl ToolSink for InterfaceHost {
    fn add_tools(&self, registrations: Vec<ToolRegistration>) {
        if registrations.is_empty() {
            return;
        }
        let mut next = (*self.snapshot()).clone();
        next.register(registrations);
        self.publish(next);
    }

    fn replace_interface(&self, registrations: Vec<ToolRegistration>) {
        self.publish(ToolInterface::new(registrations));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use warden_foundation::{ExposedTool, ParamContract, ToolBinding};
    use warden_proxy::ToolHandler;

    struct Constant(Value);

    #[async_trait]
    impl ToolHandler for Constant {
        async fn invoke(&self, _arguments: Value) -> Value {
            self.0.clone()
        }
    }

    fn registration(provider_id: &str, tool_name: &str) -> ToolRegistration {
        let binding = ToolBinding::new(provider_id, tool_name);
        ToolRegistration {
            tool: ExposedTool {
                name: binding.composite_name(),
                description: format!("{} tool", tool_name),
                contract: ParamContract::any(),
                binding,
            },
            handler: Arc::new(Constant(json!(tool_name))),
        }
    }

    #[test]
    fn test_add_tools_keeps_existing_registrations() {
        let host = InterfaceHost::new();
        host.add_tools(vec![registration("alpha", "sum")]);
        let before = host.snapshot();
        let sum_handler = before.get("alpha__sum").unwrap().handler.clone();

        host.add_tools(vec![registration("alpha", "sub")]);
        let after = host.snapshot();

        assert_eq!(after.names(), vec!["alpha__sub", "alpha__sum"]);
        assert!(Arc::ptr_eq(&after.get("alpha__sum").unwrap().handler, &sum_handler));
        // The old snapshot is untouched
        assert_eq!(before.names(), vec!["alpha__sum"]);
        assert_eq!(host.revision(), 2);
    }

    #[test]
    fn test_replace_interface_discards_everything_else() {
        let host = InterfaceHost::new();
        host.add_tools(vec![registration("alpha", "sum"), registration("beta", "sum")]);
        host.replace_interface(vec![registration("beta", "sum")]);

        let interface = host.snapshot();
        assert_eq!(interface.names(), vec!["beta__sum"]);
        assert!(interface.get("alpha__sum").is_none());
    }

    #[test]
    fn test_replace_with_nothing_empties_the_interface() {
        let host = InterfaceHost::new();
        host.add_tools(vec![registration("alpha", "sum")]);
        host.replace_interface(Vec::new());
        assert!(host.snapshot().is_empty());
        assert_eq!(host.revision(), 2);
    }

    #[test]
    fn test_empty_addition_does_not_bump_revision() {
        let host = InterfaceHost::new();
        host.add_tools(Vec::new());
        assert_eq!(host.revision(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let host = InterfaceHost::new();
        let mut revisions = host.subscribe();
        host.add_tools(vec![registration("alpha", "sum")]);
        revisions.changed().await.unwrap();
        assert_eq!(*revisions.borrow_and_update(), 1);
    }
}
