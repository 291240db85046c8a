//! The subprocess fleet. One child process per enabled server, spoken to
//! over stdio via rmcp; one owning worker task per child serializes
//! requests through a bounded queue.

use corral_core::config::ServerSpec;
use corral_core::error::{CorralError, ErrorKind};
use corral_core::tools::{coerce_arguments, Tool, ToolExecutionResult, ToolHandler, ToolInputSchema};
use futures_util::future::join_all;
use rmcp::model::{CallToolRequestParams, CallToolResult, RawContent};
use rmcp::service::{Peer, RoleClient, RunningService, ServiceExt};
use rmcp::transport::TokioChildProcess;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Consecutive ping/call failures after which a server counts as unhealthy.
const UNHEALTHY_AFTER_FAILURES: u32 = 3;
/// Per-call retry budget for transient transport failures.
const CALL_MAX_ATTEMPTS: u32 = 3;
/// Base delay for the per-call exponential backoff.
const CALL_BACKOFF_BASE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
    pub startup_timeout: Duration,
    pub health_window: Duration,
    pub queue_depth: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(15),
            call_timeout: Duration::from_secs(60),
            startup_timeout: Duration::from_secs(30),
            health_window: Duration::from_secs(60),
            queue_depth: 16,
        }
    }
}

impl ServiceSettings {
    pub fn from_timeouts(t: &corral_core::config::TimeoutSettings) -> Self {
        Self {
            handshake_timeout: Duration::from_secs(t.handshake_secs),
            call_timeout: Duration::from_secs(t.tool_call_secs),
            startup_timeout: Duration::from_secs(t.startup_secs),
            health_window: Duration::from_secs(t.health_window_secs),
            queue_depth: 16,
        }
    }
}

// ============================================================================
// Health tracking
// ============================================================================

pub struct HealthState {
    last_success: Mutex<Instant>,
    consecutive_failures: AtomicU32,
}

impl HealthState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            last_success: Mutex::new(Instant::now()),
            consecutive_failures: AtomicU32::new(0),
        })
    }

    fn record_success(&self) {
        if let Ok(mut guard) = self.last_success.lock() {
            *guard = Instant::now();
        }
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_healthy(&self, window: Duration) -> bool {
        if self.consecutive_failures.load(Ordering::SeqCst) >= UNHEALTHY_AFTER_FAILURES {
            return false;
        }
        self.last_success
            .lock()
            .map(|t| t.elapsed() <= window)
            .unwrap_or(false)
    }

    fn idle_for(&self) -> Duration {
        self.last_success
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX)
    }
}

// ============================================================================
// Worker protocol
// ============================================================================

enum ServerCommand {
    Call {
        tool: String,
        args: Value,
        reply: oneshot::Sender<ToolExecutionResult>,
    },
    Ping {
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

struct Connection {
    tx: mpsc::Sender<ServerCommand>,
    tools: Vec<Tool>,
    health: Arc<HealthState>,
    worker: tokio::task::JoinHandle<()>,
}

struct ServerRuntime {
    spec: ServerSpec,
    connection: Option<Connection>,
    last_error: Option<String>,
}

/// Point-in-time view of one server for status displays.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub id: String,
    pub description: String,
    pub enabled: bool,
    pub connected: bool,
    pub healthy: bool,
    pub tool_count: usize,
    pub last_error: Option<String>,
}

// ============================================================================
// McpService
// ============================================================================

pub struct McpService {
    servers: RwLock<HashMap<String, ServerRuntime>>,
    settings: ServiceSettings,
}

impl McpService {
    pub fn new(settings: ServiceSettings) -> Arc<Self> {
        Arc::new(Self {
            servers: RwLock::new(HashMap::new()),
            settings,
        })
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Connect one server. Failure is recorded and logged with a specific
    /// diagnostic; the fleet keeps going either way.
    pub async fn connect(&self, spec: ServerSpec) -> bool {
        self.disconnect(&spec.id).await;

        match self.try_connect(&spec).await {
            Ok(connection) => {
                tracing::info!(
                    "MCP server '{}': {} tool(s) discovered",
                    spec.id,
                    connection.tools.len()
                );
                let id = spec.id.clone();
                self.servers.write().await.insert(
                    id,
                    ServerRuntime {
                        spec,
                        connection: Some(connection),
                        last_error: None,
                    },
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    "failed to connect MCP server '{}': {} ({})",
                    spec.id,
                    e,
                    remediation(e.kind())
                );
                let id = spec.id.clone();
                self.servers.write().await.insert(
                    id,
                    ServerRuntime {
                        spec,
                        connection: None,
                        last_error: Some(e.to_string()),
                    },
                );
                false
            }
        }
    }

    async fn try_connect(&self, spec: &ServerSpec) -> Result<Connection, CorralError> {
        let (program, args) = spec
            .command_line()
            .ok_or_else(|| CorralError::Configuration(format!("server '{}' has no command", spec.id)))?;
        let program = resolve_command(&program)?;

        let mut cmd = Command::new(&program);
        cmd.args(&args);
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| CorralError::Transport(format!("spawn '{}': {}", spec.id, e)))?;

        let service = tokio::time::timeout(self.settings.handshake_timeout, ().serve(transport))
            .await
            .map_err(|_| CorralError::HandshakeTimeout(spec.id.clone()))?
            .map_err(|e| CorralError::Transport(format!("MCP handshake for '{}': {}", spec.id, e)))?;

        let discovered = service
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| CorralError::Transport(format!("list_tools for '{}': {}", spec.id, e)))?;

        if discovered.is_empty() {
            let _ = service.cancel().await;
            return Err(CorralError::Configuration(format!(
                "server '{}' exposes no tools",
                spec.id
            )));
        }

        let tools: Vec<Tool> = discovered
            .iter()
            .map(|t| convert_tool(t, &spec.id, spec.domain.as_deref()))
            .collect();

        let health = HealthState::new();
        let (tx, rx) = mpsc::channel(self.settings.queue_depth);
        let worker = spawn_worker(
            spec.id.clone(),
            service,
            tools.clone(),
            rx,
            health.clone(),
            self.settings.call_timeout,
        );

        Ok(Connection {
            tx,
            tools,
            health,
            worker,
        })
    }

    /// Idempotent: terminates the child and releases the worker.
    pub async fn disconnect(&self, server_id: &str) {
        let connection = {
            let mut servers = self.servers.write().await;
            servers
                .get_mut(server_id)
                .and_then(|r| r.connection.take())
        };
        if let Some(conn) = connection {
            let _ = conn.tx.send(ServerCommand::Shutdown).await;
            let mut worker = conn.worker;
            if tokio::time::timeout(Duration::from_secs(5), &mut worker)
                .await
                .is_err()
            {
                worker.abort();
            }
            tracing::info!("MCP server '{}' disconnected", server_id);
        }
    }

    /// Drop a server from the runtime table entirely.
    pub async fn forget(&self, server_id: &str) {
        self.disconnect(server_id).await;
        self.servers.write().await.remove(server_id);
    }

    /// Connect every spec in parallel under the startup budget. Returns the
    /// number of servers that came up.
    pub async fn connect_all(&self, specs: Vec<ServerSpec>) -> usize {
        let attempts = specs.into_iter().map(|spec| self.connect(spec));
        let results = match tokio::time::timeout(self.settings.startup_timeout, join_all(attempts))
            .await
        {
            Ok(results) => results,
            Err(_) => {
                tracing::warn!(
                    "fleet startup exceeded {}s budget; continuing with whatever connected",
                    self.settings.startup_timeout.as_secs()
                );
                return self.connected_server_ids().await.len();
            }
        };
        results.into_iter().filter(|ok| *ok).count()
    }

    /// Execute a tool on one server: validate against the schema, fill
    /// defaults, coerce types, then hand the call to the server's worker.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        args: &Value,
    ) -> ToolExecutionResult {
        let (tx, schema) = {
            let servers = self.servers.read().await;
            let Some(runtime) = servers.get(server_id) else {
                return ToolExecutionResult::failure(
                    tool_name,
                    ErrorKind::ToolNotFound,
                    format!("unknown server '{}'", server_id),
                );
            };
            let Some(conn) = &runtime.connection else {
                return ToolExecutionResult::failure(
                    tool_name,
                    ErrorKind::Transport,
                    format!("server '{}' is not connected", server_id),
                );
            };
            let Some(tool) = conn.tools.iter().find(|t| t.name == tool_name) else {
                return ToolExecutionResult::failure(
                    tool_name,
                    ErrorKind::ToolNotFound,
                    format!("server '{}' has no tool '{}'", server_id, tool_name),
                );
            };
            (conn.tx.clone(), tool.input_schema.clone())
        };

        let args = match coerce_arguments(&schema, args) {
            Ok(args) => args,
            Err(e) => {
                return ToolExecutionResult::failure(
                    tool_name,
                    ErrorKind::ParameterInvalid,
                    e.to_string(),
                )
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        // Bounded queue: awaiting here is the backpressure.
        if tx
            .send(ServerCommand::Call {
                tool: tool_name.to_string(),
                args,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return ToolExecutionResult::failure(
                tool_name,
                ErrorKind::Transport,
                format!("server '{}' worker is gone", server_id),
            );
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => ToolExecutionResult::failure(
                tool_name,
                ErrorKind::Transport,
                format!("server '{}' dropped the call", server_id),
            ),
        }
    }

    pub async fn list_tools(&self, server_id: &str) -> Vec<Tool> {
        let servers = self.servers.read().await;
        servers
            .get(server_id)
            .and_then(|r| r.connection.as_ref())
            .map(|c| c.tools.clone())
            .unwrap_or_default()
    }

    pub async fn all_tools(&self) -> Vec<Tool> {
        let servers = self.servers.read().await;
        servers
            .values()
            .filter_map(|r| r.connection.as_ref())
            .flat_map(|c| c.tools.clone())
            .collect()
    }

    pub async fn connected_server_ids(&self) -> Vec<String> {
        let servers = self.servers.read().await;
        let mut ids: Vec<String> = servers
            .iter()
            .filter(|(_, r)| r.connection.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn statuses(&self) -> Vec<ServerStatus> {
        let servers = self.servers.read().await;
        let mut out: Vec<ServerStatus> = servers
            .values()
            .map(|r| ServerStatus {
                id: r.spec.id.clone(),
                description: r.spec.description.clone(),
                enabled: r.spec.enabled,
                connected: r.connection.is_some(),
                healthy: r
                    .connection
                    .as_ref()
                    .map(|c| c.health.is_healthy(self.settings.health_window))
                    .unwrap_or(false),
                tool_count: r.connection.as_ref().map(|c| c.tools.len()).unwrap_or(0),
                last_error: r.last_error.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Reconnect every server currently disconnected or unhealthy.
    pub async fn refresh(&self) -> usize {
        let stale: Vec<ServerSpec> = {
            let servers = self.servers.read().await;
            servers
                .values()
                .filter(|r| {
                    r.spec.enabled
                        && match &r.connection {
                            None => true,
                            Some(c) => !c.health.is_healthy(self.settings.health_window),
                        }
                })
                .map(|r| r.spec.clone())
                .collect()
        };

        let mut reconnected = 0;
        for spec in stale {
            let id = spec.id.clone();
            tracing::info!("refreshing MCP server '{}'", id);
            if self.connect(spec).await {
                reconnected += 1;
            }
        }
        reconnected
    }

    /// Background task: ping idle servers and reconnect unhealthy ones.
    pub fn spawn_health_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let window = service.settings.health_window;
            let interval = (window / 2).max(Duration::from_secs(5));
            loop {
                tokio::time::sleep(interval).await;

                let idle: Vec<(String, mpsc::Sender<ServerCommand>)> = {
                    let servers = service.servers.read().await;
                    servers
                        .values()
                        .filter_map(|r| {
                            let conn = r.connection.as_ref()?;
                            (conn.health.idle_for() > window / 2)
                                .then(|| (r.spec.id.clone(), conn.tx.clone()))
                        })
                        .collect()
                };

                for (id, tx) in idle {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    if tx.send(ServerCommand::Ping { reply: reply_tx }).await.is_err() {
                        continue;
                    }
                    match tokio::time::timeout(Duration::from_secs(10), reply_rx).await {
                        Ok(Ok(true)) => {}
                        _ => tracing::warn!("health ping failed for MCP server '{}'", id),
                    }
                }

                let any_unhealthy = {
                    let servers = service.servers.read().await;
                    servers.values().any(|r| {
                        r.spec.enabled
                            && r.connection
                                .as_ref()
                                .map(|c| !c.health.is_healthy(window))
                                .unwrap_or(false)
                    })
                };
                if any_unhealthy {
                    service.refresh().await;
                }
            }
        })
    }

    /// Drain every worker, wait up to 5 s total, then force-terminate.
    pub async fn shutdown(&self) {
        let connections: Vec<(String, Connection)> = {
            let mut servers = self.servers.write().await;
            servers
                .iter_mut()
                .filter_map(|(id, r)| r.connection.take().map(|c| (id.clone(), c)))
                .collect()
        };

        for (_, conn) in &connections {
            let _ = conn.tx.try_send(ServerCommand::Shutdown);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        for (id, conn) in connections {
            let mut worker = conn.worker;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut worker).await.is_err() {
                tracing::warn!("force-terminating MCP server '{}'", id);
                worker.abort();
            }
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

fn spawn_worker(
    server_id: String,
    service: RunningService<RoleClient, ()>,
    tools: Vec<Tool>,
    mut rx: mpsc::Receiver<ServerCommand>,
    health: Arc<HealthState>,
    call_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let peer = service.peer().clone();
        tracing::debug!(
            "worker for MCP server '{}' serving {} tool(s)",
            server_id,
            tools.len()
        );

        while let Some(command) = rx.recv().await {
            match command {
                ServerCommand::Call { tool, args, reply } => {
                    let result =
                        execute_with_retry(&peer, &server_id, &tool, args, call_timeout, &health)
                            .await;
                    let _ = reply.send(result);
                }
                ServerCommand::Ping { reply } => {
                    let ok = tokio::time::timeout(Duration::from_secs(10), peer.list_all_tools())
                        .await
                        .map(|r| r.is_ok())
                        .unwrap_or(false);
                    if ok {
                        health.record_success();
                    } else {
                        health.record_failure();
                    }
                    let _ = reply.send(ok);
                }
                ServerCommand::Shutdown => break,
            }
        }

        if let Err(e) = service.cancel().await {
            tracing::warn!("error cancelling MCP server '{}': {:?}", server_id, e);
        }
        tracing::debug!("worker for MCP server '{}' exited", server_id);
    })
}

/// One tool call with the per-call timeout and transient-failure retries
/// (base 500 ms, doubling, 3 attempts).
async fn execute_with_retry(
    peer: &Peer<RoleClient>,
    server_id: &str,
    tool: &str,
    args: Value,
    call_timeout: Duration,
    health: &HealthState,
) -> ToolExecutionResult {
    let arguments = args.as_object().cloned();
    let mut delay = CALL_BACKOFF_BASE;
    let mut last_message = String::new();

    for attempt in 1..=CALL_MAX_ATTEMPTS {
        let params = CallToolRequestParams {
            meta: None,
            name: tool.to_string().into(),
            arguments: arguments.clone(),
            task: None,
        };

        match tokio::time::timeout(call_timeout, peer.call_tool(params)).await {
            Ok(Ok(result)) => {
                health.record_success();
                return convert_call_result(tool, result);
            }
            Ok(Err(e)) => {
                let msg = e.to_string();
                let transient = msg.contains("closed") || msg.contains("timeout") || msg.contains("connection");
                health.record_failure();
                if !transient {
                    return ToolExecutionResult::failure(
                        tool,
                        ErrorKind::Transport,
                        format!("tool '{}' on '{}' failed: {}", tool, server_id, msg),
                    );
                }
                last_message = msg;
            }
            Err(_) => {
                health.record_failure();
                last_message = format!("timed out after {}s", call_timeout.as_secs());
            }
        }

        if attempt < CALL_MAX_ATTEMPTS {
            tracing::warn!(
                "tool '{}' on '{}' attempt {}/{} failed ({}), retrying in {}ms",
                tool,
                server_id,
                attempt,
                CALL_MAX_ATTEMPTS,
                last_message,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    ToolExecutionResult::failure(
        tool,
        ErrorKind::Transport,
        format!(
            "tool '{}' on '{}' failed after {} attempts: {}",
            tool, server_id, CALL_MAX_ATTEMPTS, last_message
        ),
    )
}

/// Flatten an MCP call result into text; tool-reported errors become
/// failed results, not transport faults.
fn convert_call_result(tool: &str, result: CallToolResult) -> ToolExecutionResult {
    let is_error = result.is_error.unwrap_or(false);
    let content: String = result
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    if is_error {
        let message = if content.is_empty() {
            format!("tool '{}' reported an error", tool)
        } else {
            content
        };
        ToolExecutionResult::failure(tool, ErrorKind::Internal, message)
    } else {
        let content = if content.is_empty() {
            "[no output]".to_string()
        } else {
            content
        };
        ToolExecutionResult::ok(tool, content)
    }
}

// ============================================================================
// Tool conversion
// ============================================================================

fn convert_tool(mcp_tool: &rmcp::model::Tool, server_id: &str, domain: Option<&str>) -> Tool {
    let schema = schema_from_parts(
        mcp_tool.input_schema.get("properties"),
        mcp_tool.input_schema.get("required"),
    );
    Tool {
        name: mcp_tool.name.to_string(),
        description: mcp_tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default(),
        server_id: server_id.to_string(),
        domain: domain.map(String::from),
        input_schema: schema,
    }
}

fn schema_from_parts(properties: Option<&Value>, required: Option<&Value>) -> ToolInputSchema {
    ToolInputSchema {
        schema_type: "object".to_string(),
        properties: properties.cloned().unwrap_or_else(|| json!({})),
        required: required
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

// ============================================================================
// Command resolution
// ============================================================================

/// Resolve an executable the way a shell would: absolute/relative paths are
/// checked directly, bare names are searched on PATH. Windows also probes
/// the usual script extensions.
fn resolve_command(program: &str) -> Result<PathBuf, CorralError> {
    let candidates: Vec<String> = if cfg!(windows) {
        vec![
            program.to_string(),
            format!("{}.exe", program),
            format!("{}.cmd", program),
            format!("{}.bat", program),
        ]
    } else {
        vec![program.to_string()]
    };

    if program.contains(std::path::MAIN_SEPARATOR) {
        for candidate in &candidates {
            if Path::new(candidate).is_file() {
                return Ok(PathBuf::from(candidate));
            }
        }
        return Err(CorralError::CommandNotFound(program.to_string()));
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for candidate in &candidates {
                let full = dir.join(candidate);
                if full.is_file() {
                    return Ok(full);
                }
            }
        }
    }

    Err(CorralError::CommandNotFound(program.to_string()))
}

fn remediation(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::CommandNotFound => "install the command or fix the 'command' field",
        ErrorKind::HandshakeTimeout => "the server started but never completed the MCP handshake",
        ErrorKind::Transport => "the child process died or its stdio broke",
        ErrorKind::Configuration => "check the server entry in the fleet file",
        _ => "see the log for details",
    }
}

// ============================================================================
// Catalog bridge
// ============================================================================

/// Bridges one discovered MCP tool into the catalog's `ToolHandler`.
/// `tool.name` is the catalog-unique name; `remote_name` is what the
/// server knows the tool as.
pub struct McpToolHandler {
    tool: Tool,
    remote_name: String,
    service: Arc<McpService>,
}

impl McpToolHandler {
    pub fn new(tool: Tool, remote_name: String, service: Arc<McpService>) -> Self {
        Self {
            tool,
            remote_name,
            service,
        }
    }
}

#[async_trait::async_trait]
impl ToolHandler for McpToolHandler {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn spec(&self) -> Tool {
        self.tool.clone()
    }

    async fn execute(&self, args: &Value) -> ToolExecutionResult {
        let mut result = self
            .service
            .call_tool(&self.tool.server_id, &self.remote_name, args)
            .await;
        // Report under the catalog name, which may carry a server prefix.
        result.tool = self.tool.name.clone();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_command_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool-server");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        let resolved = resolve_command(path.to_str().unwrap()).unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn test_resolve_command_missing() {
        let err = resolve_command("definitely-not-a-real-command-xyz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandNotFound);
    }

    #[test]
    fn test_schema_from_parts() {
        let props = json!({"timezone": {"type": "string"}});
        let required = json!(["timezone"]);
        let schema = schema_from_parts(Some(&props), Some(&required));
        assert_eq!(schema.schema_type, "object");
        assert_eq!(schema.required, vec!["timezone"]);
        assert_eq!(schema.property_type("timezone"), Some("string"));
    }

    #[test]
    fn test_schema_from_missing_parts() {
        let schema = schema_from_parts(None, None);
        assert!(schema.required.is_empty());
        assert!(schema.property_names().is_empty());
    }

    #[tokio::test]
    async fn test_call_tool_unknown_server() {
        let service = McpService::new(ServiceSettings::default());
        let result = service.call_tool("ghost", "tool", &json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::ToolNotFound));
    }

    #[tokio::test]
    async fn test_connect_records_command_not_found() {
        let service = McpService::new(ServiceSettings::default());
        let spec = ServerSpec {
            id: "ghost".to_string(),
            command: "definitely-not-a-real-command-xyz".to_string(),
            ..Default::default()
        };
        assert!(!service.connect(spec).await);

        let statuses = service.statuses().await;
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].connected);
        assert!(statuses[0].last_error.as_ref().unwrap().contains("command not found"));

        // The fleet stays usable with zero connected servers
        assert!(service.all_tools().await.is_empty());
        assert!(service.connected_server_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let service = McpService::new(ServiceSettings::default());
        service.disconnect("never-connected").await;
        service.disconnect("never-connected").await;
    }
}
