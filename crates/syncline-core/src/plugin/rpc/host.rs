//! Host side of the out-of-process plugin strategy.
//!
//! The host spawns the plugin executable, verifies its handshake, dispenses
//! the processor service once, and from then on presents the child as an
//! ordinary [`Processor`]. The guest crashing degrades only the events that
//! touch it; the host process is never at risk.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use scopeguard::ScopeGuard;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::logger::LogBridge;
use super::protocol::{
    Handshake, LogLevel, Request, Response, WireEvent, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE,
    METHOD_DISPENSE, METHOD_INIT, METHOD_PROCESS, PROCESSOR_SERVICE,
};
use crate::event::PipelineEvent;
use crate::plugin::PluginError;
use crate::processor::{self, Processor, ProcessorError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for one plugin child process.
#[derive(Debug, Clone)]
pub struct RpcPluginConfig {
    /// Path to the plugin executable.
    pub module_path: PathBuf,
    /// Forwarded verbatim to the guest's `Init` method. Empty means `Init`
    /// is never called.
    pub init_options: Map<String, Value>,
    /// Deadline applied to every RPC call.
    pub call_timeout: Duration,
    /// Threshold for forwarding guest log lines.
    pub log_level: LogLevel,
    /// How long to wait for the child to exit after a graceful close.
    pub shutdown_grace: Duration,
}

impl RpcPluginConfig {
    pub fn new(module_path: impl Into<PathBuf>) -> Self {
        Self {
            module_path: module_path.into(),
            init_options: Map::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            log_level: LogLevel::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_init_options(mut self, init_options: Map<String, Value>) -> Self {
        self.init_options = init_options;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }
}

struct Connection {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl Connection {
    async fn round_trip(&mut self, method: &str, params: Value) -> processor::Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let frame = serde_json::to_string(&Request {
            id,
            service: PROCESSOR_SERVICE.to_string(),
            method: method.to_string(),
            params,
        })?;
        let send_err = |e: std::io::Error| ProcessorError::Rpc(format!("failed to send request: {e}"));
        self.stdin.write_all(frame.as_bytes()).await.map_err(send_err)?;
        self.stdin.write_all(b"\n").await.map_err(send_err)?;
        self.stdin.flush().await.map_err(send_err)?;

        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| ProcessorError::Rpc(format!("failed to read response: {e}")))?;
            if read == 0 {
                return Err(ProcessorError::Rpc(
                    "plugin closed the connection".to_string(),
                ));
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let response: Response = serde_json::from_str(line)
                .map_err(|e| ProcessorError::Rpc(format!("protocol violation: {e}")))?;
            if response.id < id {
                // Late reply to a call that already timed out.
                continue;
            }
            if response.id > id {
                return Err(ProcessorError::Rpc(format!(
                    "unexpected response id {} (expected {id})",
                    response.id
                )));
            }
            return match response.error {
                Some(message) => Err(ProcessorError::Execution(message)),
                None => Ok(response.result),
            };
        }
    }
}

struct Inner {
    conn: Option<Connection>,
    child: Option<Child>,
}

/// A processor backed by a plugin child process.
///
/// The stdio connection is a single multiplexed stream shared by every
/// worker that invokes this processor; calls serialize on it, so one child
/// handles one in-flight call at a time. Configure multiple instances for
/// parallel throughput.
pub struct RpcPluginHost {
    name: String,
    call_timeout: Duration,
    shutdown_grace: Duration,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for RpcPluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPluginHost")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl RpcPluginHost {
    /// Spawn the configured executable, perform the handshake, dispense the
    /// processor service, and run `Init` if init options are present.
    ///
    /// Every failure in this sequence is fatal to the processor's setup;
    /// the host never respawns or retries on its own.
    pub async fn new(config: RpcPluginConfig) -> crate::plugin::Result<Self> {
        let name = plugin_name(&config.module_path);

        let child = Command::new(&config.module_path)
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PluginError::Initialization(format!(
                    "failed to start plugin process {}: {e}",
                    config.module_path.display()
                ))
            })?;

        // The child must not outlive a failed setup.
        let mut child = scopeguard::guard(child, |mut child| {
            let _ = child.start_kill();
        });

        let stdin = child.stdin.take().ok_or_else(|| {
            PluginError::Initialization("plugin stdin is not available".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            PluginError::Initialization("plugin stdout is not available".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            PluginError::Initialization("plugin stderr is not available".to_string())
        })?;

        tokio::spawn(LogBridge::new(name.clone(), config.log_level).run(stderr));

        let mut stdout = BufReader::new(stdout);
        let mut line = String::new();
        let read = tokio::time::timeout(HANDSHAKE_TIMEOUT, stdout.read_line(&mut line))
            .await
            .map_err(|_| {
                PluginError::Initialization(format!(
                    "plugin {name} did not complete the handshake within {HANDSHAKE_TIMEOUT:?}"
                ))
            })?
            .map_err(|e| {
                PluginError::Initialization(format!("handshake read from {name} failed: {e}"))
            })?;
        if read == 0 {
            return Err(PluginError::Initialization(format!(
                "plugin {name} exited before completing the handshake"
            )));
        }
        let handshake: Handshake = serde_json::from_str(line.trim()).map_err(|e| {
            PluginError::Initialization(format!("malformed handshake from {name}: {e}"))
        })?;
        handshake.verify().map_err(PluginError::Initialization)?;

        let host = Self {
            name: name.clone(),
            call_timeout: config.call_timeout,
            shutdown_grace: config.shutdown_grace,
            inner: Mutex::new(Inner {
                conn: Some(Connection {
                    stdin,
                    stdout,
                    next_id: 1,
                }),
                // Setup from here on is plain RPC; a failure drops the host
                // and kill_on_drop reaps the child.
                child: Some(ScopeGuard::into_inner(child)),
            }),
        };

        // Dispense once at startup and reuse the handle for every call.
        host.call(METHOD_DISPENSE, json!({ "service": PROCESSOR_SERVICE }))
            .await
            .map_err(|e| {
                PluginError::Dispense(format!(
                    "plugin {name} did not dispense the processor service: {e}"
                ))
            })?;

        if !config.init_options.is_empty() {
            host.call(METHOD_INIT, Value::Object(config.init_options))
                .await
                .map_err(|e| {
                    PluginError::Initialization(format!("plugin {name} init failed: {e}"))
                })?;
        }

        debug!(plugin = %host.name, "rpc plugin ready");
        Ok(host)
    }

    async fn call(&self, method: &str, params: Value) -> processor::Result<Value> {
        let mut inner = self.inner.lock().await;
        let conn = inner
            .conn
            .as_mut()
            .ok_or_else(|| ProcessorError::Rpc("plugin connection is closed".to_string()))?;
        match tokio::time::timeout(self.call_timeout, conn.round_trip(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(ProcessorError::Timeout),
        }
    }

    /// Tear down the connection and the child process. The first call does
    /// the work; later calls are no-ops.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        // Dropping our end of stdin is the graceful close: the guest exits
        // when its stdin reaches EOF.
        drop(inner.conn.take());
        if let Some(mut child) = inner.child.take() {
            match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => debug!(plugin = %self.name, %status, "plugin exited"),
                Ok(Err(e)) => {
                    warn!(plugin = %self.name, error = %e, "failed to await plugin exit")
                }
                Err(_) => {
                    warn!(plugin = %self.name, "plugin did not exit within the grace period, killing");
                    let _ = child.kill().await;
                }
            }
        }
    }
}

#[async_trait]
impl Processor for RpcPluginHost {
    async fn process(
        &self,
        event: Box<dyn PipelineEvent>,
    ) -> processor::Result<Option<Box<dyn PipelineEvent>>> {
        let params = serde_json::to_value(WireEvent::from_event(event.as_ref()))?;
        let result = self.call(METHOD_PROCESS, params).await?;
        if result.is_null() {
            return Ok(None);
        }
        let wire: WireEvent = serde_json::from_value(result)
            .map_err(|e| ProcessorError::Rpc(format!("malformed event from plugin: {e}")))?;
        Ok(Some(Box::new(wire.into_event())))
    }

    async fn close(&self) -> processor::Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

fn plugin_name(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
