//! Reconciliation loop
//!
//! Every tick re-reads both configuration documents and compares their canonical
//! fingerprints with the ones recorded by the last successful tick:
//! - provider document changed: reconcile the process set
//! - either document changed: rebuild and apply the tool registry, which only
//!   exposes tools of providers the provider document still lists
//! - neither changed: nothing happens
//!
//! Ticks run one after another on a single task, so two passes never interleave.

use crate::registry::{AuthorizationRegistry, RegistryUpdate};
use crate::supervisor::{ProcessSupervisor, ReconcileSummary};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace};
use warden_config::{DocumentSource, Fingerprint};
use warden_foundation::WardenResult;

/// Fingerprints of the last successfully reconciled documents
#[derive(Debug, Clone, PartialEq, Eq)]
struct Recorded {
    providers: Fingerprint,
    policy: Fingerprint,
}

/// What a tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Neither document changed
    Unchanged,
    Reconciled {
        /// Present when the provider document changed
        processes: Option<ReconcileSummary>,
        registry: RegistryUpdate,
    },
}

/// Drives the supervisor and the registry from the configuration documents
pub struct Reconciler {
    source: Arc<dyn DocumentSource>,
    supervisor: Arc<ProcessSupervisor>,
    registry: AuthorizationRegistry,
    recorded: Option<Recorded>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        supervisor: Arc<ProcessSupervisor>,
        registry: AuthorizationRegistry,
    ) -> Self {
        Self {
            source,
            supervisor,
            registry,
            recorded: None,
        }
    }

    pub fn registry(&self) -> &AuthorizationRegistry {
        &self.registry
    }

    /// Run one reconciliation pass.
    ///
    /// Fails only when the documents cannot be loaded; fingerprints are then left
    /// as they were so the next tick retries.
    pub async fn tick(&mut self) -> WardenResult<TickOutcome> {
        let documents = self.source.load()?;

        let (providers_changed, policy_changed) = match &self.recorded {
            Some(recorded) => (
                recorded.providers != documents.providers.fingerprint,
                recorded.policy != documents.policy.fingerprint,
            ),
            None => (true, true),
        };

        if !providers_changed && !policy_changed {
            trace!("Configuration unchanged");
            return Ok(TickOutcome::Unchanged);
        }

        info!(
            providers_fingerprint = %documents.providers.fingerprint.short(),
            policy_fingerprint = %documents.policy.fingerprint.short(),
            providers_changed,
            policy_changed,
            "Configuration changed, reconciling"
        );

        let processes = if providers_changed {
            let summary = self
                .supervisor
                .reconcile(&documents.providers.content.mcp_servers)
                .await;
            info!(
                started = ?summary.started,
                stopped = ?summary.stopped,
                failed = ?summary.failed,
                "Provider processes reconciled"
            );
            Some(summary)
        } else {
            None
        };

        let registry = self
            .registry
            .sync(&documents.providers.content, &documents.policy.content)
            .await;

        self.recorded = Some(Recorded {
            providers: documents.providers.fingerprint,
            policy: documents.policy.fingerprint,
        });
        Ok(TickOutcome::Reconciled {
            processes,
            registry,
        })
    }

    /// Tick immediately, then every `period` until `shutdown` resolves.
    ///
    /// A tick that overruns the period delays the next one instead of overlapping
    /// it. Tick failures are logged and never end the loop.
    pub async fn run<F>(mut self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Reconciliation loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Reconciliation tick failed, retrying on next tick");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelOptions;
    use crate::registry::MockToolSink;
    use crate::supervisor::SupervisorOptions;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use warden_config::{
        AuthorizationPolicy, ConfigDocuments, LoadedDocument, ProviderDocument, ProviderPolicy,
        ProviderSpec,
    };
    use warden_foundation::WardenError;

    /// Documents held in memory; `None` simulates a missing file
    #[derive(Default)]
    struct MemorySource {
        documents: Mutex<Option<(ProviderDocument, AuthorizationPolicy)>>,
    }

    impl MemorySource {
        fn set(&self, providers: ProviderDocument, policy: AuthorizationPolicy) {
            *self.documents.lock().unwrap() = Some((providers, policy));
        }

        fn clear(&self) {
            *self.documents.lock().unwrap() = None;
        }
    }

    impl DocumentSource for MemorySource {
        fn load(&self) -> WardenResult<ConfigDocuments> {
            let guard = self.documents.lock().unwrap();
            let (providers, policy) = guard
                .clone()
                .ok_or_else(|| WardenError::config_missing("config.json"))?;
            Ok(ConfigDocuments {
                providers: LoadedDocument {
                    fingerprint: Fingerprint::of(&providers)?,
                    content: providers,
                },
                policy: LoadedDocument {
                    fingerprint: Fingerprint::of(&policy)?,
                    content: policy,
                },
            })
        }
    }

    fn policy(tools: &[&str]) -> AuthorizationPolicy {
        let mut policy = AuthorizationPolicy::default();
        policy.authorized_mcp_servers.insert(
            "alpha".into(),
            ProviderPolicy {
                authorized_tools: tools.iter().map(|t| t.to_string()).collect(),
            },
        );
        policy
    }

    /// Configures `alpha` with a command that cannot be launched
    fn providers() -> ProviderDocument {
        let mut providers = ProviderDocument::default();
        providers.mcp_servers.insert(
            "alpha".into(),
            ProviderSpec::new("warden-nonexistent-provider", vec![]),
        );
        providers
    }

    fn reconciler(tmp: &TempDir, source: Arc<MemorySource>, sink: MockToolSink) -> Reconciler {
        let supervisor = Arc::new(ProcessSupervisor::new(SupervisorOptions {
            config_root: tmp.path().to_path_buf(),
            log_dir: tmp.path().join("logs"),
            channel: ChannelOptions::default(),
            handshake_timeout: Duration::from_millis(200),
            mirror_stdout: false,
        }));
        let registry = AuthorizationRegistry::new(supervisor.clone(), Arc::new(sink));
        Reconciler::new(source, supervisor, registry)
    }

    #[tokio::test]
    async fn test_first_tick_is_forced_and_second_is_noop() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MemorySource::default());
        source.set(providers(), policy(&["sum"]));

        let mut sink = MockToolSink::new();
        sink.expect_add_tools().times(1).return_const(());
        sink.expect_replace_interface().never();

        let mut reconciler = reconciler(&tmp, source, sink);
        let first = reconciler.tick().await.unwrap();
        assert_eq!(
            first,
            TickOutcome::Reconciled {
                processes: Some(ReconcileSummary {
                    failed: vec!["alpha".into()],
                    ..ReconcileSummary::default()
                }),
                registry: RegistryUpdate::Incremental {
                    added: vec!["alpha__sum".into()]
                },
            }
        );
        assert_eq!(reconciler.tick().await.unwrap(), TickOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_policy_only_change_skips_process_reconcile() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MemorySource::default());
        source.set(providers(), policy(&["sum", "sub"]));

        let mut sink = MockToolSink::new();
        sink.expect_add_tools().times(1).return_const(());
        sink.expect_replace_interface().times(1).return_const(());

        let mut reconciler = reconciler(&tmp, source.clone(), sink);
        reconciler.tick().await.unwrap();

        source.set(providers(), policy(&["sum"]));
        let outcome = reconciler.tick().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Reconciled {
                processes: None,
                registry: RegistryUpdate::FullReplacement {
                    removed: vec!["alpha__sub".into()],
                    total: 1
                },
            }
        );
        assert_eq!(reconciler.registry().exposed().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_recorded_fingerprints() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MemorySource::default());
        source.set(providers(), policy(&["sum"]));

        let mut sink = MockToolSink::new();
        sink.expect_add_tools().times(1).return_const(());
        sink.expect_replace_interface().never();

        let mut reconciler = reconciler(&tmp, source.clone(), sink);
        reconciler.tick().await.unwrap();

        source.clear();
        let err = reconciler.tick().await.unwrap_err();
        assert!(matches!(err, WardenError::ConfigMissing { .. }));

        source.set(providers(), policy(&["sum"]));
        assert_eq!(reconciler.tick().await.unwrap(), TickOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MemorySource::default());
        source.set(ProviderDocument::default(), AuthorizationPolicy::default());

        let mut sink = MockToolSink::new();
        sink.expect_add_tools().never();
        sink.expect_replace_interface().never();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(reconciler(&tmp, source, sink).run(
            Duration::from_millis(10),
            async move {
                let _ = stop_rx.await;
            },
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop")
            .unwrap();
    }
}
