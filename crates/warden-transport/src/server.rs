//! MCP server over newline-delimited JSON-RPC
//!
//! Each request is handled on its own task so a slow tool call never holds up
//! `tools/list` or another call; a single writer task owns the output stream.

use crate::interface::InterfaceHost;
use serde_json::{json, Value};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use warden_foundation::protocol::{
    error_codes, methods, IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    MCP_PROTOCOL_VERSION,
};

/// Queue depth between request tasks and the writer
const OUTPUT_QUEUE_SIZE: usize = 256;

/// Serves the tools of an [`InterfaceHost`] to one MCP client
pub struct McpServer {
    host: Arc<InterfaceHost>,
    initialized: AtomicBool,
}

impl McpServer {
    pub fn new(host: Arc<InterfaceHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            initialized: AtomicBool::new(false),
        })
    }

    /// Serve until `reader` reaches end of input.
    ///
    /// Requests still running at that point are allowed to finish and their
    /// responses are written before this returns.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (output, queue) = mpsc::channel::<String>(OUTPUT_QUEUE_SIZE);
        let writer_task = tokio::spawn(write_loop(writer, queue));
        let revisions = self.host.subscribe();
        let notifier_task =
            tokio::spawn(self.clone().notify_list_changes(revisions, output.clone()));

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "Failed to parse client message");
                    let response = JsonRpcResponse::failure(
                        Value::Null,
                        JsonRpcError::new(error_codes::PARSE_ERROR, format!("Parse error: {}", e)),
                    );
                    send(&output, &response).await;
                    continue;
                }
            };

            match IncomingMessage::classify(value) {
                Some(IncomingMessage::Request(request)) => match request.id.clone() {
                    Some(id) => {
                        let server = self.clone();
                        let output = output.clone();
                        let span = info_span!(
                            "request",
                            request_id = %Uuid::new_v4(),
                            method = %request.method
                        );
                        tokio::spawn(
                            async move {
                                let response = server.handle(id, request).await;
                                send(&output, &response).await;
                            }
                            .instrument(span),
                        );
                    }
                    None => self.handle_notification(&request),
                },
                Some(IncomingMessage::Response(response)) => {
                    debug!(id = %response.id, "Ignoring response from client");
                }
                None => {
                    let response = JsonRpcResponse::failure(
                        Value::Null,
                        JsonRpcError::new(error_codes::INVALID_REQUEST, "Invalid Request"),
                    );
                    send(&output, &response).await;
                }
            }
        }

        info!("Client closed input, draining in-flight requests");
        notifier_task.abort();
        drop(output);
        match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::other(e)),
        }
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        if request.method == methods::INITIALIZED {
            self.initialized.store(true, Ordering::SeqCst);
            info!("Client initialized");
        } else {
            debug!(method = %request.method, "Ignoring client notification");
        }
    }

    async fn handle(&self, id: Value, request: JsonRpcRequest) -> JsonRpcResponse {
        let params = request.params.unwrap_or(Value::Null);
        let outcome = match request.method.as_str() {
            methods::INITIALIZE => Ok(self.initialize()),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(self.list_tools()),
            methods::TOOLS_CALL => self.call_tool(params).await,
            other => Err(JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        }
    }

    fn initialize(&self) -> Value {
        // Clients that skip `notifications/initialized` still get change notices
        self.initialized.store(true, Ordering::SeqCst);
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": {
                "name": "warden",
                "version": env!("CARGO_PKG_VERSION"),
            }
        })
    }

    fn list_tools(&self) -> Value {
        let interface = self.host.snapshot();
        let tools: Vec<Value> = interface
            .registrations()
            .map(|registration| {
                json!({
                    "name": registration.tool.name,
                    "description": registration.tool.description,
                    "inputSchema": registration.tool.input_schema(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: Value) -> Result<Value, JsonRpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::new(error_codes::INVALID_PARAMS, "Missing tool name"))?;
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(arguments) => arguments.clone(),
        };

        let interface = self.host.snapshot();
        let registration = interface.get(name).ok_or_else(|| {
            JsonRpcError::new(error_codes::INVALID_PARAMS, format!("Unknown tool: {}", name))
        })?;

        if let Err(violation) = registration.tool.contract.validate(&arguments) {
            warn!(tool = %name, error = %violation, "Rejected tool arguments");
            return Err(JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                violation.to_string(),
            ));
        }

        let result = registration.handler.invoke(arguments).await;
        Ok(as_call_result(result))
    }

    async fn notify_list_changes(
        self: Arc<Self>,
        mut revisions: watch::Receiver<u64>,
        output: mpsc::Sender<String>,
    ) {
        while revisions.changed().await.is_ok() {
            let revision = *revisions.borrow_and_update();
            if !self.initialized.load(Ordering::SeqCst) {
                continue;
            }
            debug!(revision, "Announcing tool list change");
            let note = JsonRpcRequest::notification(methods::TOOLS_LIST_CHANGED, None);
            send(&output, &note).await;
        }
    }
}

/// Pass MCP `CallToolResult`s through; wrap anything else as text content
fn as_call_result(result: Value) -> Value {
    if result.get("content").map(Value::is_array).unwrap_or(false) {
        return result;
    }
    let is_error = result.get("error").is_some();
    let text = match &result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

async fn send<T: serde::Serialize>(output: &mpsc::Sender<String>, message: &T) {
    match serde_json::to_string(message) {
        Ok(line) => {
            if output.send(line).await.is_err() {
                debug!("Output closed, dropping message");
            }
        }
        Err(e) => error!(error = %e, "Failed to serialize message"),
    }
}

async fn write_loop<W>(mut writer: W, mut queue: mpsc::Receiver<String>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = queue.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Serve `host` on the process's stdin and stdout
pub async fn start_stdio_server(host: Arc<InterfaceHost>) -> io::Result<()> {
    info!("Starting MCP server on stdio");
    McpServer::new(host)
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
}
