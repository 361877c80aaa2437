//! Shared fixtures: shell-script MCP providers and a recording tool sink

#![allow(dead_code)]

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden_config::{AppConfig, ConfigDir, ProviderSpec};
use warden_proxy::{SupervisorOptions, ToolRegistration, ToolSink};

/// A provider answering `initialize`, `tools/list` and `tools/call`.
///
/// `tools/call` echoes the request params back inside its result so tests can
/// check exactly what was forwarded.
pub const ECHO_PROVIDER: &str = r##"#!/bin/sh
echo "echo provider booting" >&2
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^.*"id":\([0-9][0-9]*\).*$/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"echo","version":"0.0.1"}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"sum","description":"Add two numbers","inputSchema":{"type":"object","properties":{"a":{"type":"number"},"b":{"type":"number"}},"required":["a","b"]}},{"name":"secret","inputSchema":{"type":"object"}}]}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      params=$(printf '%s' "$line" | sed 's/^.*"params":\(.*\)}$/\1/')
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}],"received":%s}}\n' "$id" "$params"
      ;;
  esac
done
"##;

/// A provider that reads requests but never answers
pub const SILENT_PROVIDER: &str = r##"#!/bin/sh
while IFS= read -r line; do
  :
done
"##;

/// Write a provider script into `dir` and return the spec that runs it
pub fn script_provider(dir: &Path, name: &str, body: &str) -> ProviderSpec {
    let path = dir.join(format!("{}.sh", name));
    std::fs::write(&path, body).unwrap();
    ProviderSpec::new("sh", vec![path.to_string_lossy().into_owned()])
}

pub fn supervisor_options(root: &Path) -> SupervisorOptions {
    let config = AppConfig {
        request_timeout_ms: 2_000,
        handshake_timeout_ms: 2_000,
        ..AppConfig::default()
    };
    SupervisorOptions::new(&ConfigDir::new(root), &config)
}

/// Poll `condition` until it holds or five seconds pass
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// What a [`RecordingSink`] was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Added(Vec<String>),
    Replaced(Vec<String>),
}

/// Tool sink that records calls and keeps the current registrations
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<SinkEvent>>,
    pub live: Mutex<Vec<ToolRegistration>>,
}

impl RecordingSink {
    pub fn registration(&self, name: &str) -> Option<ToolRegistration> {
        self.live
            .lock()
            .iter()
            .find(|registration| registration.tool.name == name)
            .cloned()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }
}

fn names(registrations: &[ToolRegistration]) -> Vec<String> {
    let mut names: Vec<String> = registrations.iter().map(|r| r.tool.name.clone()).collect();
    names.sort();
    names
}

impl ToolSink for RecordingSink {
    fn add_tools(&self, registrations: Vec<ToolRegistration>) {
        self.events.lock().push(SinkEvent::Added(names(&registrations)));
        self.live.lock().extend(registrations);
    }

    fn replace_interface(&self, registrations: Vec<ToolRegistration>) {
        self.events.lock().push(SinkEvent::Replaced(names(&registrations)));
        *self.live.lock() = registrations;
    }
}

pub fn write_document(root: &Path, name: &str, content: &serde_json::Value) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(content).unwrap()).unwrap();
    path
}
