//! One RPC session bound to one child process.

use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::protocol::{message_type, Close, Completion, HandshakeRequest, HandshakeResponse, Invocation, LogMessage};
use super::{Result, RpcError, RpcSessionState};

/// Duplex endpoint for one spawned extension process.
///
/// Every exchange (call, notification, raw read) holds a session-wide gate
/// for its full duration, so request and response lines of different callers
/// never interleave on the single stdio stream. An exchange whose future is
/// dropped before it finishes (timeout or cancellation) tears the session
/// down: the stream position is unknown afterwards.
pub struct RpcCommunicator {
    command: String,
    arguments: Vec<String>,
    shared: Arc<SessionShared>,
    io: tokio::sync::Mutex<Option<SessionIo>>,
    invocation_id: AtomicU64,
}

struct SessionIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

struct SessionShared {
    state: Mutex<SessionState>,
    child: Mutex<Option<Child>>,
}

struct SessionState {
    current: RpcSessionState,
    started: bool,
}

impl SessionShared {
    fn state(&self) -> RpcSessionState {
        self.state.lock().current
    }

    fn set_state(&self, state: RpcSessionState) {
        self.state.lock().current = state;
    }

    /// Mark the session disconnected and kill the child.
    fn teardown(&self, reason: &str) {
        let previous = std::mem::replace(&mut self.state.lock().current, RpcSessionState::Disconnected);

        if let Some(child) = self.child.lock().as_mut() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Extension process already gone");
            }
        }

        if previous != RpcSessionState::Disconnected {
            tracing::warn!(reason, "RPC session disconnected");
        }
    }
}

/// Tears the session down unless the exchange is marked complete.
struct InFlight<'a> {
    shared: &'a SessionShared,
    completed: bool,
}

impl<'a> InFlight<'a> {
    fn new(shared: &'a SessionShared) -> Self {
        Self {
            shared,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.shared.teardown("exchange aborted before completion");
        }
    }
}

/// Exclusive access to the session stream for one exchange.
///
/// Dropping it without [`Exchange::complete`] tears the session down before
/// the gate is released.
struct Exchange<'a> {
    in_flight: InFlight<'a>,
    session: tokio::sync::MappedMutexGuard<'a, SessionIo>,
}

impl Exchange<'_> {
    fn complete(self) {
        let Exchange { in_flight, session } = self;
        in_flight.complete();
        drop(session);
    }
}

impl RpcCommunicator {
    pub fn new(command: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            command: command.into(),
            arguments,
            shared: Arc::new(SessionShared {
                state: Mutex::new(SessionState {
                    current: RpcSessionState::Disconnected,
                    started: false,
                }),
                child: Mutex::new(None),
            }),
            io: tokio::sync::Mutex::new(None),
            invocation_id: AtomicU64::new(0),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn state(&self) -> RpcSessionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == RpcSessionState::Connected
    }

    /// Process id of the child, while it runs.
    pub fn process_id(&self) -> Option<u32> {
        self.shared.child.lock().as_ref().and_then(Child::id)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the child and perform the handshake.
    ///
    /// A session connects at most once. On failure or timeout the child is
    /// killed and the session stays disconnected for good.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if state.started {
                return Err(RpcError::InvalidOperation(format!(
                    "the session has already been started (state: {})",
                    state.current
                )));
            }
            state.started = true;
            state.current = RpcSessionState::Connecting;
        }

        let result = match tokio::time::timeout(timeout, self.establish()).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                operation: "connect",
                timeout,
            }),
        };

        if let Err(e) = result {
            self.shared.teardown("connect failed");
            return Err(e);
        }

        Ok(())
    }

    async fn establish(&self) -> Result<()> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.arguments)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| RpcError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        let not_piped = || RpcError::InvalidOperation("child stdio is not piped".to_string());
        let stdin = child.stdin.take().ok_or_else(not_piped)?;
        let stdout = child.stdout.take().ok_or_else(not_piped)?;
        let stderr = child.stderr.take().ok_or_else(not_piped)?;

        tracing::debug!(command = %self.command, pid = ?child.id(), "Spawned extension process");
        *self.shared.child.lock() = Some(child);

        tokio::spawn(forward_logs(
            stderr,
            Arc::downgrade(&self.shared),
            self.command.clone(),
        ));

        let mut io = self.io.lock().await;
        let session = io.insert(SessionIo {
            stdin,
            stdout: BufReader::new(stdout),
        });

        write_message(&mut session.stdin, &HandshakeRequest::default()).await?;
        let line = read_message_line(&mut session.stdout).await?;
        let response: HandshakeResponse = serde_json::from_str(&line)?;

        if let Some(error) = response.error.filter(|e| !e.trim().is_empty()) {
            return Err(RpcError::Handshake(error));
        }

        let mut state = self.shared.state.lock();
        if state.current != RpcSessionState::Connecting {
            return Err(RpcError::Disconnected(
                "the session was torn down during the handshake".to_string(),
            ));
        }
        state.current = RpcSessionState::Connected;
        drop(state);

        tracing::info!(command = %self.command, "RPC session connected");
        Ok(())
    }

    /// Send `Close` best-effort, then wait for the child to exit.
    ///
    /// The child is killed if it outlives `timeout`. Closing a session that
    /// is not connected only reaps the process.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        let was_connected = {
            let mut state = self.shared.state.lock();
            let connected = state.current == RpcSessionState::Connected;
            if connected {
                state.current = RpcSessionState::Closing;
            }
            connected
        };

        if was_connected {
            let send = async {
                let mut io = self.io.lock().await;
                if let Some(session) = io.as_mut() {
                    write_message(&mut session.stdin, &Close::default()).await?;
                    session.stdin.shutdown().await?;
                }
                Ok::<_, RpcError>(())
            };

            match tokio::time::timeout(timeout, send).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Failed to send close message"),
                Err(_) => tracing::debug!("Timed out sending close message"),
            }
        }

        self.shared.set_state(RpcSessionState::Disconnected);

        let child = self.shared.child.lock().take();
        if let Some(mut child) = child {
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%status, "Extension process exited"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Failed to wait for extension process"),
                Err(_) => {
                    tracing::warn!(command = %self.command, "Extension process did not exit, killing it");
                    child.kill().await?;
                }
            }
        }

        Ok(())
    }

    // ========================================================================
    // Exchanges
    // ========================================================================

    /// Invoke `target` and deserialize the completion's result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        target: &str,
        arguments: Vec<Value>,
        timeout: Duration,
    ) -> Result<T> {
        self.invoke(target, arguments, &mut [], timeout).await
    }

    /// Invoke `target`, then read raw segments announced by its completion.
    ///
    /// The gate is held across the whole sequence, so no other exchange can
    /// run between the completion and its payload.
    pub async fn call_with_raw<T: DeserializeOwned>(
        &self,
        target: &str,
        arguments: Vec<Value>,
        segments: &mut [&mut [u8]],
        timeout: Duration,
    ) -> Result<T> {
        self.invoke(target, arguments, segments, timeout).await
    }

    async fn invoke<T: DeserializeOwned>(
        &self,
        target: &str,
        arguments: Vec<Value>,
        segments: &mut [&mut [u8]],
        timeout: Duration,
    ) -> Result<T> {
        self.ensure_connected()?;

        let invocation_id = self.next_invocation_id();
        let invocation = Invocation::call(invocation_id.clone(), target, arguments);

        let run = async {
            let mut exchange = self.begin().await?;
            write_message(&mut exchange.session.stdin, &invocation).await?;
            let line = read_message_line(&mut exchange.session.stdout).await?;

            match validate_completion(&line, &invocation_id) {
                Ok(result) => {
                    for segment in segments.iter_mut() {
                        read_exact(&mut exchange.session.stdout, segment).await?;
                    }
                    exchange.complete();
                    Ok(result)
                }
                // A remote error carries no payload. Any other failure with
                // segments pending leaves raw bytes on the stream.
                Err(e) => {
                    if segments.is_empty() || matches!(e, RpcError::Remote(_)) {
                        exchange.complete();
                    }
                    Err(e)
                }
            }
        };

        let result = with_timeout("call", timeout, run).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a notification; no completion is expected.
    pub async fn notify(&self, target: &str, arguments: Vec<Value>, timeout: Duration) -> Result<()> {
        self.ensure_connected()?;
        let invocation = Invocation::notification(target, arguments);

        with_timeout("notify", timeout, async {
            let mut exchange = self.begin().await?;
            write_message(&mut exchange.session.stdin, &invocation).await?;
            exchange.complete();
            Ok(())
        })
        .await
    }

    /// Read exactly `buffer.len()` raw bytes from the control stream.
    pub async fn read_raw(&self, buffer: &mut [u8], timeout: Duration) -> Result<()> {
        self.ensure_connected()?;

        with_timeout("read", timeout, async {
            let mut exchange = self.begin().await?;
            read_exact(&mut exchange.session.stdout, buffer).await?;
            exchange.complete();
            Ok(())
        })
        .await
    }

    /// Acquire the session gate for one exchange.
    async fn begin(&self) -> Result<Exchange<'_>> {
        let io = self.io.lock().await;
        // The session may have died while waiting for the gate.
        self.ensure_connected()?;

        let session = tokio::sync::MutexGuard::try_map(io, Option::as_mut)
            .map_err(|_| RpcError::InvalidOperation("the session has no open stream".to_string()))?;

        Ok(Exchange {
            in_flight: InFlight::new(&self.shared),
            session,
        })
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            RpcSessionState::Connected => Ok(()),
            state => Err(RpcError::InvalidOperation(format!(
                "cannot communicate with the extension in state '{}'",
                state
            ))),
        }
    }

    fn next_invocation_id(&self) -> String {
        (self.invocation_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

impl std::fmt::Debug for RpcCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcCommunicator")
            .field("command", &self.command)
            .field("arguments", &self.arguments)
            .field("state", &self.state())
            .finish()
    }
}

async fn with_timeout<R>(
    operation: &'static str,
    timeout: Duration,
    exchange: impl Future<Output = Result<R>>,
) -> Result<R> {
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| RpcError::Timeout { operation, timeout })?
}

// ============================================================================
// Framing
// ============================================================================

async fn write_message<T: Serialize>(stdin: &mut ChildStdin, message: &T) -> Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    stdin.write_all(&line).await?;
    stdin.flush().await?;
    Ok(())
}

/// Read one non-empty line. End of stream or an empty line is fatal.
async fn read_message_line(stdout: &mut BufReader<ChildStdout>) -> Result<String> {
    let mut line = String::new();
    let read = stdout.read_line(&mut line).await?;

    if read == 0 || !line.ends_with('\n') {
        return Err(RpcError::Disconnected(
            "the extension closed its output stream".to_string(),
        ));
    }

    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
        return Err(RpcError::Disconnected(
            "the extension sent an empty line".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}

async fn read_exact(stdout: &mut BufReader<ChildStdout>, buffer: &mut [u8]) -> Result<()> {
    match stdout.read_exact(buffer).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(RpcError::Disconnected(
            format!("the extension closed its output stream before sending {} bytes", buffer.len()),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Check a completion line against the invocation it answers.
fn validate_completion(line: &str, invocation_id: &str) -> Result<Value> {
    let completion: Completion = serde_json::from_str(line)?;

    if let Some(received) = completion.message_type {
        if received != message_type::COMPLETION {
            return Err(RpcError::protocol("message type", message_type::COMPLETION, received));
        }
    }

    if completion.invocation_id.as_deref() != Some(invocation_id) {
        return Err(RpcError::protocol(
            "invocation id",
            invocation_id,
            completion.invocation_id,
        ));
    }

    match (completion.result, completion.error) {
        (Some(_), Some(error)) => Err(RpcError::Protocol(format!(
            "completion for invocation {} carries both a result and an error ({})",
            invocation_id, error
        ))),
        (None, Some(error)) => Err(RpcError::Remote(error)),
        (result, None) => Ok(result.unwrap_or(Value::Null)),
    }
}

/// Forward stderr log records until the stream ends.
async fn forward_logs(stderr: ChildStderr, shared: Weak<SessionShared>, command: String) {
    let mut lines = BufReader::new(stderr).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogMessage>(&line) {
                    Ok(record) => record.emit(&command),
                    Err(_) => {
                        tracing::error!(target: "nexus::extension", source = %command, "{}", line);
                        match shared.upgrade() {
                            Some(shared) => shared.teardown("invalid log line on stderr"),
                            None => break,
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, source = %command, "Stopped reading extension stderr");
                break;
            }
        }
    }
}
