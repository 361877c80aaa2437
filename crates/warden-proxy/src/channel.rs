//! Transport channel: correlated JSON-RPC over a provider's standard streams
//!
//! One writer task serializes outbound messages onto the provider's stdin and one
//! reader task demultiplexes its stdout. Every outstanding request parks a
//! `oneshot` sender in the pending table keyed by its numeric id; the reader
//! resolves entries strictly by id, so concurrent requests may complete in any
//! order. Providers do not frame their output, so message boundaries are found by
//! incremental JSON parsing rather than by a delimiter.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use warden_foundation::protocol::{
    error_codes, methods, IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
};
use warden_foundation::ChannelError;

/// Buffer size for the outbound message queue
const OUTBOUND_QUEUE_SIZE: usize = 256;
/// Size of a single read from the provider's stdout
const READ_CHUNK_SIZE: usize = 8192;

type Responder = oneshot::Sender<Result<Value, ChannelError>>;

/// Raw copy of a provider's stdout (its log sink)
pub type MirrorSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Pending requests of one channel
#[derive(Default)]
struct PendingTable {
    waiters: HashMap<u64, Responder>,
    /// Set once the provider is gone; new requests fail immediately
    closed: Option<String>,
}

/// Tunables of a channel
#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    pub request_timeout: Duration,
    pub max_buffer_bytes: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(warden_config::config::DEFAULT_REQUEST_TIMEOUT_MS),
            max_buffer_bytes: warden_config::config::DEFAULT_MAX_BUFFER_BYTES,
        }
    }
}

/// Messages queued for the writer task
#[derive(Debug)]
enum OutboundMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

struct ChannelInner {
    provider_id: String,
    outbound: mpsc::Sender<OutboundMessage>,
    pending: Mutex<PendingTable>,
    next_id: AtomicU64,
    request_timeout: Duration,
}

/// Request/response channel to one provider. Cheap to clone.
#[derive(Clone)]
pub struct ProviderChannel {
    inner: Arc<ChannelInner>,
}

impl ProviderChannel {
    /// Start the reader and writer tasks over the given streams
    pub fn spawn<R, W>(
        provider_id: impl Into<String>,
        reader: R,
        writer: W,
        options: ChannelOptions,
        mirror: Option<MirrorSink>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let inner = Arc::new(ChannelInner {
            provider_id: provider_id.into(),
            outbound,
            pending: Mutex::new(PendingTable::default()),
            next_id: AtomicU64::new(1),
            request_timeout: options.request_timeout,
        });

        // The writer only holds a weak handle so that dropping the last channel
        // clone closes the provider's stdin.
        tokio::spawn(write_loop(
            Arc::downgrade(&inner),
            inner.provider_id.clone(),
            writer,
            outbound_rx,
        ));
        tokio::spawn(read_loop(
            Arc::downgrade(&inner),
            reader,
            FrameDecoder::new(options.max_buffer_bytes),
            mirror,
        ));

        Self { inner }
    }

    pub fn provider_id(&self) -> &str {
        &self.inner.provider_id
    }

    /// Send a request and wait for its response with the channel's default timeout
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ChannelError> {
        self.request_with_timeout(method, params, self.inner.request_timeout)
            .await
    }

    /// Send a request and wait for its response
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        limit: Duration,
    ) -> Result<Value, ChannelError> {
        let provider_id = &self.inner.provider_id;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (response_tx, response_rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock().await;
            if let Some(reason) = &pending.closed {
                return Err(ChannelError::process(provider_id, reason.clone()));
            }
            pending.waiters.insert(id, response_tx);
        }

        debug!(provider_id = %provider_id, request_id = id, method = %method, "Sending provider request");

        let request = JsonRpcRequest::new(id, method, params);
        if self
            .inner
            .outbound
            .send(OutboundMessage::Request(request))
            .await
            .is_err()
        {
            self.inner.pending.lock().await.waiters.remove(&id);
            return Err(ChannelError::process(provider_id, "input stream is closed"));
        }

        let start_time = std::time::Instant::now();
        match timeout(limit, response_rx).await {
            Ok(Ok(result)) => {
                debug!(
                    provider_id = %provider_id,
                    request_id = id,
                    method = %method,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    success = result.is_ok(),
                    "Received provider response"
                );
                result
            }
            Ok(Err(_)) => Err(ChannelError::process(provider_id, "response channel closed")),
            Err(_) => {
                // A late response for this id is discarded as unmatched
                self.inner.pending.lock().await.waiters.remove(&id);
                warn!(
                    provider_id = %provider_id,
                    request_id = id,
                    method = %method,
                    timeout_ms = limit.as_millis() as u64,
                    "Provider request timed out"
                );
                Err(ChannelError::timeout(provider_id, method, limit))
            }
        }
    }

    /// Send a notification (no id, no response)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ChannelError> {
        let note = JsonRpcRequest::notification(method, params);
        self.inner
            .outbound
            .send(OutboundMessage::Request(note))
            .await
            .map_err(|_| ChannelError::process(&self.inner.provider_id, "input stream is closed"))
    }

    /// Fail every pending request with `ProcessError` and refuse new ones
    pub async fn close(&self, reason: &str) {
        self.inner.close(reason).await;
    }

    /// Number of requests awaiting a response
    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.waiters.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.pending.lock().await.closed.is_some()
    }
}

impl ChannelInner {
    async fn close(&self, reason: &str) {
        let waiters = {
            let mut pending = self.pending.lock().await;
            if pending.closed.is_none() {
                pending.closed = Some(reason.to_string());
            }
            std::mem::take(&mut pending.waiters)
        };
        if !waiters.is_empty() {
            warn!(
                provider_id = %self.provider_id,
                pending = waiters.len(),
                reason = %reason,
                "Failing outstanding requests"
            );
        }
        for (_, responder) in waiters {
            let _ = responder.send(Err(ChannelError::process(&self.provider_id, reason)));
        }
    }

    async fn fail_all(&self, error: ChannelError) {
        let waiters = std::mem::take(&mut self.pending.lock().await.waiters);
        for (_, responder) in waiters {
            let _ = responder.send(Err(error.clone()));
        }
    }

    async fn dispatch(&self, message: Value) {
        match IncomingMessage::classify(message) {
            Some(IncomingMessage::Response(response)) => self.resolve(response).await,
            Some(IncomingMessage::Request(request)) => self.handle_provider_request(request).await,
            None => debug!(provider_id = %self.provider_id, "Ignoring non JSON-RPC document"),
        }
    }

    async fn resolve(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.as_u64() else {
            debug!(provider_id = %self.provider_id, id = %response.id, "Discarding response with foreign id");
            return;
        };

        let Some(responder) = self.pending.lock().await.waiters.remove(&id) else {
            debug!(
                provider_id = %self.provider_id,
                request_id = id,
                "Discarding unmatched response (already timed out or never sent)"
            );
            return;
        };

        let outcome = match response.error {
            Some(error) => Err(ChannelError::remote(&self.provider_id, error.code, error.message)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = responder.send(outcome);
    }

    async fn handle_provider_request(&self, request: JsonRpcRequest) {
        match request.id {
            None if request.method == methods::TOOLS_LIST_CHANGED => {
                info!(provider_id = %self.provider_id, "Provider reported a tool list change");
            }
            None => {
                debug!(provider_id = %self.provider_id, method = %request.method, "Ignoring provider notification");
            }
            Some(id) => {
                warn!(
                    provider_id = %self.provider_id,
                    method = %request.method,
                    "Rejecting unsupported provider request"
                );
                let reply = JsonRpcResponse::failure(
                    id,
                    JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "Method not found"),
                );
                let _ = self.outbound.send(OutboundMessage::Response(reply)).await;
            }
        }
    }
}

async fn write_loop<W>(
    weak: std::sync::Weak<ChannelInner>,
    provider_id: String,
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(message) = outbound_rx.recv().await {
        let serialized = match &message {
            OutboundMessage::Request(request) => serde_json::to_string(request),
            OutboundMessage::Response(response) => serde_json::to_string(response),
        };
        let mut line = match serialized {
            Ok(line) => line,
            Err(e) => {
                warn!(provider_id = %provider_id, error = %e, "Failed to serialize outbound message");
                continue;
            }
        };
        line.push('\n');

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!(provider_id = %provider_id, error = %e, "Failed to write to provider");
            if let Some(inner) = weak.upgrade() {
                inner.close(&format!("write error: {}", e)).await;
            }
            break;
        }
    }
    debug!(provider_id = %provider_id, "Provider writer task ended");
}

async fn read_loop<R>(
    weak: std::sync::Weak<ChannelInner>,
    mut reader: R,
    mut decoder: FrameDecoder,
    mut mirror: Option<MirrorSink>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut chunk).await;
        let Some(inner) = weak.upgrade() else {
            break;
        };

        let n = match read {
            Ok(0) => {
                debug!(provider_id = %inner.provider_id, "Provider stdout closed");
                inner.close("output stream closed").await;
                break;
            }
            Ok(n) => n,
            Err(e) => {
                inner.close(&format!("read error: {}", e)).await;
                break;
            }
        };

        if let Some(sink) = mirror.as_mut() {
            if let Err(e) = sink.write_all(&chunk[..n]).await {
                warn!(provider_id = %inner.provider_id, error = %e, "Disabling stdout mirror");
                mirror = None;
            }
        }

        let decoded = decoder.decode(&chunk[..n]);
        for message in decoded.messages {
            inner.dispatch(message).await;
        }
        if decoded.overflowed {
            warn!(
                provider_id = %inner.provider_id,
                limit = decoder.limit,
                "Undecoded provider output exceeded the buffer limit"
            );
            inner
                .fail_all(ChannelError::too_large(&inner.provider_id, decoder.limit))
                .await;
        }
    }
}

/// Result of feeding bytes to a [`FrameDecoder`]
#[derive(Debug, Default, PartialEq)]
pub struct Decoded {
    pub messages: Vec<Value>,
    /// The undecoded remainder exceeded the limit and was discarded
    pub overflowed: bool,
}

/// Incremental splitter of a byte stream into JSON documents.
///
/// A document is parsed only once its closing bracket has arrived. Progress
/// through a partial document is kept between calls, so each byte is scanned
/// once no matter how many reads it takes to arrive.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    limit: usize,
    /// Scan state of the partial document at the front of `buffer`
    pending: Option<Scan>,
}

/// Structural scan of a document that has not fully arrived yet
#[derive(Debug, Default, Clone, Copy)]
struct Scan {
    /// Bytes of the document scanned so far
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// The document's first line was checked for a syntax error
    first_line_checked: bool,
}

/// Where a scan stopped
enum Boundary {
    /// The document closes after this many bytes
    Closed(usize),
    /// The first line is not the start of a valid document; it ends after this many bytes
    Malformed(usize),
    Incomplete,
}

impl Scan {
    fn advance(&mut self, document: &[u8]) -> Boundary {
        while self.offset < document.len() {
            let byte = document[self.offset];
            self.offset += 1;

            // Providers write one compact document per line, so a syntax error
            // on the first line means noise, not a document still arriving.
            if byte == b'\n' && !self.first_line_checked {
                self.first_line_checked = true;
                if is_malformed(&document[..self.offset]) {
                    return Boundary::Malformed(self.offset);
                }
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Boundary::Closed(self.offset);
                    }
                }
                _ => {}
            }
        }
        Boundary::Incomplete
    }
}

/// Whether `bytes` fails to parse for a reason other than running out of input
fn is_malformed(bytes: &[u8]) -> bool {
    matches!(serde_json::from_slice::<Value>(bytes), Err(e) if !e.is_eof())
}

impl FrameDecoder {
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            pending: None,
        }
    }

    /// Bytes received but not yet part of a complete document
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append bytes and extract every complete document now available
    pub fn decode(&mut self, bytes: &[u8]) -> Decoded {
        self.buffer.extend_from_slice(bytes);

        let mut messages = Vec::new();
        let mut consumed = 0;
        loop {
            let Some(start) = self.buffer[consumed..]
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .map(|offset| consumed + offset)
            else {
                consumed = self.buffer.len();
                break;
            };

            // Anything that cannot start an object or array is noise (e.g. a
            // provider printing plain text to stdout); skip to the next line.
            if !matches!(self.buffer[start], b'{' | b'[') {
                match self.skip_line(start) {
                    Some(next) => {
                        consumed = next;
                        continue;
                    }
                    None => {
                        consumed = start;
                        break;
                    }
                }
            }

            // Only the document left at the front of the buffer by the previous
            // call can have scan state, and it is always the first one reached.
            let mut scan = self.pending.take().unwrap_or_default();
            match scan.advance(&self.buffer[start..]) {
                Boundary::Closed(len) => {
                    match serde_json::from_slice::<Value>(&self.buffer[start..start + len]) {
                        Ok(value) => {
                            consumed = start + len;
                            messages.push(value);
                        }
                        Err(_) => match self.skip_line(start) {
                            Some(next) => consumed = next,
                            None => {
                                consumed = start;
                                break;
                            }
                        },
                    }
                }
                Boundary::Malformed(len) => consumed = start + len,
                Boundary::Incomplete => {
                    self.pending = Some(scan);
                    consumed = start;
                    break;
                }
            }
        }

        self.buffer.drain(..consumed);

        let overflowed = self.buffer.len() > self.limit;
        if overflowed {
            self.buffer.clear();
            self.pending = None;
        }
        Decoded {
            messages,
            overflowed,
        }
    }

    /// Offset just past the newline following `from`, if one has arrived
    fn skip_line(&self, from: usize) -> Option<usize> {
        self.buffer[from..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| from + offset + 1)
    }
}

/// Parameters of the MCP `initialize` request sent by the gateway
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": warden_foundation::protocol::MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "warden",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decoder_splits_documents_without_delimiters() {
        let mut decoder = FrameDecoder::new(1024);
        let decoded = decoder.decode(br#"{"id":1}{"id":2}"#);
        assert_eq!(decoded.messages, vec![json!({"id": 1}), json!({"id": 2})]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_waits_for_partial_document() {
        let mut decoder = FrameDecoder::new(1024);
        assert!(decoder.decode(br#"{"id":1,"result":{"to"#).messages.is_empty());
        assert!(decoder.buffered() > 0);

        let decoded = decoder.decode(b"ols\":[]}}\n");
        assert_eq!(decoded.messages, vec![json!({"id": 1, "result": {"tools": []}})]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_skips_plain_text_lines() {
        let mut decoder = FrameDecoder::new(1024);
        let decoded = decoder.decode(b"server listening on stdio\n{\"id\":7}\n");
        assert_eq!(decoded.messages, vec![json!({"id": 7})]);
    }

    #[test]
    fn test_decoder_skips_malformed_json_line() {
        let mut decoder = FrameDecoder::new(1024);
        let decoded = decoder.decode(b"{\"id\": oops}\n{\"id\":8}\n");
        assert_eq!(decoded.messages, vec![json!({"id": 8})]);
    }

    #[test]
    fn test_decoder_overflow_resets_buffer() {
        let mut decoder = FrameDecoder::new(16);
        let decoded = decoder.decode(br#"{"id":1,"result":"this never ends"#);
        assert!(decoded.overflowed);
        assert_eq!(decoder.buffered(), 0);

        let decoded = decoder.decode(br#"{"id":2}"#);
        assert!(!decoded.overflowed);
        assert_eq!(decoded.messages, vec![json!({"id": 2})]);
    }

    #[test]
    fn test_decoder_resyncs_after_unclosed_garbage_line() {
        let mut decoder = FrameDecoder::new(1024);
        let decoded = decoder.decode(b"{oops\n{\"id\":9}\n");
        assert_eq!(decoded.messages, vec![json!({"id": 9})]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_handles_multiline_documents_and_brackets_in_strings() {
        let mut decoder = FrameDecoder::new(1024);
        let first = decoder.decode(b"{\n  \"id\": 3,\n  \"result\": {\"text\": \"a } b \\\" ]\"");
        assert!(first.messages.is_empty());

        let decoded = decoder.decode(b"}\n}\n");
        assert_eq!(
            decoded.messages,
            vec![json!({"id": 3, "result": {"text": "a } b \" ]"}})]
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_large_document_in_small_chunks_is_linear() {
        let payload = "x".repeat(8 * 1024 * 1024);
        let document = format!(r#"{{"id":1,"result":"{}"}}"#, payload);
        let mut decoder = FrameDecoder::new(16 * 1024 * 1024);

        let started = std::time::Instant::now();
        let mut messages = Vec::new();
        for chunk in document.as_bytes().chunks(8 * 1024) {
            let decoded = decoder.decode(chunk);
            assert!(!decoded.overflowed);
            messages.extend(decoded.messages);
        }
        let elapsed = started.elapsed();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["result"].as_str().map(str::len), Some(payload.len()));
        assert!(
            elapsed < std::time::Duration::from_secs(10),
            "decoding took {:?}",
            elapsed
        );
    }

    #[test]
    fn test_initialize_params_announce_protocol_version() {
        let params = initialize_params();
        assert_eq!(params["protocolVersion"], "2024-11-05");
        assert_eq!(params["clientInfo"]["name"], "warden");
    }
}
