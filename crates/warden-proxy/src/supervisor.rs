//! Provider process supervision
//!
//! The supervisor keeps exactly one live process per configured provider id. Each
//! process gets:
//! - a [`ProviderChannel`] over its stdin/stdout
//! - an append-mode log sink receiving its stderr (and optionally its raw stdout)
//! - a monitor task owning the OS handle, which either observes a natural exit or
//!   carries out a stop request
//!
//! Entries are tagged with a per-launch instance id so that the exit of a replaced
//! process never tears down its successor.

use crate::channel::{initialize_params, ChannelOptions, MirrorSink, ProviderChannel};
use crate::terminate::terminate_tree;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_config::logging::open_append;
use warden_config::{AppConfig, ConfigDir, Fingerprint, ProviderSpec};
use warden_foundation::protocol::methods;
use warden_foundation::{WardenError, WardenResult};

/// How long a stop waits for the killed process to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a provider process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Spawned, handshake not finished
    Starting,
    Running,
    /// Observed by the monitor; the entry is removed right after
    Exited,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// Settings shared by every process a supervisor launches
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Working directory of provider processes
    pub config_root: PathBuf,
    /// Directory of per-provider log sinks
    pub log_dir: PathBuf,
    pub channel: ChannelOptions,
    pub handshake_timeout: Duration,
    pub mirror_stdout: bool,
}

impl SupervisorOptions {
    pub fn new(config_dir: &ConfigDir, config: &AppConfig) -> Self {
        Self {
            config_root: config_dir.root().to_path_buf(),
            log_dir: config_dir.log_dir(),
            channel: ChannelOptions {
                request_timeout: config.request_timeout(),
                max_buffer_bytes: config.max_buffer_bytes,
            },
            handshake_timeout: config.handshake_timeout(),
            mirror_stdout: config.mirror_stdout,
        }
    }

    fn provider_log_path(&self, provider_id: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", provider_id))
    }
}

/// A live provider process
struct ProviderProcess {
    instance: Uuid,
    pid: Option<u32>,
    fingerprint: Fingerprint,
    status: ProcessStatus,
    channel: ProviderChannel,
    kill_tx: Option<oneshot::Sender<()>>,
    monitor: JoinHandle<()>,
}

type ProcessTable = Arc<Mutex<HashMap<String, ProviderProcess>>>;

/// Outcome of one [`ProcessSupervisor::reconcile`] pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub stopped: Vec<String>,
    pub started: Vec<String>,
    /// Providers whose launch failed; they stay absent until the next pass
    pub failed: Vec<String>,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        self.stopped.is_empty() && self.started.is_empty() && self.failed.is_empty()
    }
}

/// Owner of all provider processes
pub struct ProcessSupervisor {
    options: SupervisorOptions,
    processes: ProcessTable,
}

impl ProcessSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            options,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Bring the running set in line with `specs`: stops first, then starts.
    /// A provider whose spec fingerprint is unchanged is left untouched.
    pub async fn reconcile(&self, specs: &BTreeMap<String, ProviderSpec>) -> ReconcileSummary {
        let mut desired: BTreeMap<&String, Fingerprint> = BTreeMap::new();
        for (provider_id, spec) in specs {
            match spec.fingerprint() {
                Ok(fingerprint) => {
                    desired.insert(provider_id, fingerprint);
                }
                Err(e) => {
                    error!(provider_id = %provider_id, error = %e, "Cannot fingerprint provider spec, skipping");
                }
            }
        }

        let running: HashMap<String, Fingerprint> = self
            .processes
            .lock()
            .await
            .iter()
            .map(|(id, process)| (id.clone(), process.fingerprint.clone()))
            .collect();

        let mut summary = ReconcileSummary::default();

        let mut to_stop: Vec<&String> = running
            .iter()
            .filter(|(id, fingerprint)| desired.get(id) != Some(*fingerprint))
            .map(|(id, _)| id)
            .collect();
        to_stop.sort();
        for provider_id in to_stop {
            if desired.contains_key(provider_id) {
                info!(provider_id = %provider_id, "Provider spec changed, restarting");
            }
            self.stop(provider_id).await;
            summary.stopped.push(provider_id.clone());
        }

        for (provider_id, fingerprint) in &desired {
            if running.get(*provider_id) == Some(fingerprint) {
                continue;
            }
            let spec = &specs[*provider_id];
            match self.start(provider_id, spec).await {
                Ok(()) => summary.started.push((*provider_id).clone()),
                Err(e) => {
                    error!(provider_id = %provider_id, error = %e, "Failed to start provider");
                    summary.failed.push((*provider_id).clone());
                }
            }
        }

        if summary.is_noop() {
            debug!("Provider processes already match configuration");
        }
        summary
    }

    /// Launch a provider process and perform the MCP handshake.
    ///
    /// Any process already registered under `provider_id` is stopped first.
    pub async fn start(&self, provider_id: &str, spec: &ProviderSpec) -> WardenResult<()> {
        let fingerprint = spec.fingerprint()?;
        if self.processes.lock().await.contains_key(provider_id) {
            self.stop(provider_id).await;
        }

        let log_file = open_append(&self.options.provider_log_path(provider_id))?;
        let stderr_sink = log_file.try_clone()?;
        let mirror: Option<MirrorSink> = if self.options.mirror_stdout {
            Some(Box::new(tokio::fs::File::from_std(log_file.try_clone()?)))
        } else {
            None
        };

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .current_dir(&self.options.config_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_sink))
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| WardenError::spawn(provider_id, format!("{}: {}", spec.command, e)))?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WardenError::spawn(provider_id, "stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WardenError::spawn(provider_id, "stdout was not captured"))?;

        let channel = ProviderChannel::spawn(provider_id, stdout, stdin, self.options.channel, mirror);
        let instance = Uuid::new_v4();
        let (kill_tx, kill_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_process(
            provider_id.to_string(),
            instance,
            child,
            kill_rx,
            channel.clone(),
            self.processes.clone(),
        ));

        self.processes.lock().await.insert(
            provider_id.to_string(),
            ProviderProcess {
                instance,
                pid,
                fingerprint,
                status: ProcessStatus::Starting,
                channel: channel.clone(),
                kill_tx: Some(kill_tx),
                monitor,
            },
        );
        info!(provider_id = %provider_id, pid = ?pid, command = %spec.command, "Started provider process");

        self.handshake(provider_id, &channel).await;

        if let Some(process) = self.processes.lock().await.get_mut(provider_id) {
            if process.instance == instance {
                process.status = ProcessStatus::Running;
            }
        }
        Ok(())
    }

    /// `initialize` + `notifications/initialized`. Failure is logged only, so
    /// providers that skip the handshake remain usable.
    async fn handshake(&self, provider_id: &str, channel: &ProviderChannel) {
        let result = channel
            .request_with_timeout(
                methods::INITIALIZE,
                initialize_params(),
                self.options.handshake_timeout,
            )
            .await;

        match result {
            Ok(server_info) => {
                debug!(
                    provider_id = %provider_id,
                    server = ?server_info.get("serverInfo"),
                    "Provider initialized"
                );
                if let Err(e) = channel.notify(methods::INITIALIZED, None).await {
                    warn!(provider_id = %provider_id, error = %e, "Failed to send initialized notification");
                }
            }
            Err(e) => {
                warn!(provider_id = %provider_id, error = %e, "Provider handshake failed");
            }
        }
    }

    /// Forcefully terminate a provider and its process group. No-op when the
    /// provider is not running.
    pub async fn stop(&self, provider_id: &str) {
        let Some(mut process) = self.processes.lock().await.remove(provider_id) else {
            debug!(provider_id = %provider_id, "Stop requested for provider that is not running");
            return;
        };

        if let Some(kill_tx) = process.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if timeout(REAP_TIMEOUT * 2, &mut process.monitor).await.is_err() {
            warn!(provider_id = %provider_id, pid = ?process.pid, "Provider monitor did not finish in time");
            process.monitor.abort();
        }
        process.channel.close("provider stopped").await;
        info!(provider_id = %provider_id, pid = ?process.pid, "Stopped provider process");
    }

    /// Stop every provider (gateway shutdown)
    pub async fn stop_all(&self) {
        for provider_id in self.running_ids().await {
            self.stop(&provider_id).await;
        }
    }

    /// Channel of a running provider
    pub async fn channel(&self, provider_id: &str) -> Option<ProviderChannel> {
        self.processes
            .lock()
            .await
            .get(provider_id)
            .map(|process| process.channel.clone())
    }

    pub async fn status(&self, provider_id: &str) -> Option<ProcessStatus> {
        self.processes
            .lock()
            .await
            .get(provider_id)
            .map(|process| process.status)
    }

    pub async fn pid(&self, provider_id: &str) -> Option<u32> {
        self.processes
            .lock()
            .await
            .get(provider_id)
            .and_then(|process| process.pid)
    }

    /// Ids of all registered providers, sorted
    pub async fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.processes.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Owns the OS process until it exits on its own or a stop is requested
async fn monitor_process(
    provider_id: String,
    instance: Uuid,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    channel: ProviderChannel,
    processes: ProcessTable,
) {
    let pid = child.id();
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => info!(
                    provider_id = %provider_id,
                    pid = ?pid,
                    code = ?status.code(),
                    "Provider process exited"
                ),
                Err(e) => warn!(provider_id = %provider_id, pid = ?pid, error = %e, "Failed to wait for provider process"),
            }
            channel.close("process exited").await;

            let mut table = processes.lock().await;
            if let Some(process) = table.get_mut(&provider_id) {
                if process.instance == instance {
                    process.status = ProcessStatus::Exited;
                    debug!(provider_id = %provider_id, status = %process.status, "Removing provider entry");
                    table.remove(&provider_id);
                }
            }
        }
        // Also fires when the sender is dropped with its entry
        _ = kill_rx => {
            if let Err(e) = terminate_tree(&provider_id, &mut child) {
                warn!(provider_id = %provider_id, pid = ?pid, error = %e, "Failed to signal provider process");
            }
            match timeout(REAP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!(provider_id = %provider_id, code = ?status.code(), "Provider process reaped"),
                Ok(Err(e)) => warn!(provider_id = %provider_id, error = %e, "Failed to reap provider process"),
                Err(_) => warn!(provider_id = %provider_id, pid = ?pid, "Provider process did not exit after SIGKILL"),
            }
            channel.close("provider stopped").await;
        }
    }
}
