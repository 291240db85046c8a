//! The MCP manager: owns the fleet, the tool catalog, the domain registry,
//! the rule engine, and the selection/utility caches. Inference strategies
//! borrow a non-owning handle to this facade and request everything
//! through it.

use crate::catalog::ToolCatalog;
use crate::domain::DomainRegistry;
use crate::matcher::{Selection, ToolMatcher};
use crate::rules::RuleEngine;
use crate::service::{McpService, McpToolHandler, ServerStatus};
use corral_core::config::{FleetConfig, ServerSpec};
use corral_core::error::CorralError;
use corral_core::tools::{Tool, ToolExecutionResult, ToolHandler};
use corral_llm::{LlmClient, LlmRequest};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::LazyLock;
use tokio::sync::RwLock;

/// Domain relevance threshold for single-step selection.
const SINGLE_STEP_THRESHOLD: f32 = 0.3;
/// Stricter threshold for multi-step, multi-domain planning.
const MULTI_STEP_THRESHOLD: f32 = 0.6;

static RE_OBVIOUS_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(error|failed|failure|exception|not found|denied|timed? ?out)\b").unwrap()
});
static RE_GENERIC_SUCCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(success|successfully|done|completed|ok)\b").unwrap()
});
static RE_HAS_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    DirectAnswer,
    SingleTool,
    MultiTool,
}

#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub kind: QueryKind,
    pub domains: Vec<String>,
    pub rationale: String,
}

pub struct McpManager {
    service: Arc<McpService>,
    catalog: RwLock<ToolCatalog>,
    domains: DomainRegistry,
    rules: RuleEngine,
    llm: RwLock<Arc<dyn LlmClient>>,
    fleet: RwLock<FleetConfig>,
    fleet_path: Option<PathBuf>,
    selection_cache: RwLock<HashMap<String, Vec<(String, Value)>>>,
    utility_cache: RwLock<HashMap<String, bool>>,
}

impl McpManager {
    pub fn new(
        service: Arc<McpService>,
        domains: DomainRegistry,
        rules: RuleEngine,
        llm: Arc<dyn LlmClient>,
        fleet: FleetConfig,
        fleet_path: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service,
            catalog: RwLock::new(ToolCatalog::new()),
            domains,
            rules,
            llm: RwLock::new(llm),
            fleet: RwLock::new(fleet),
            fleet_path,
            selection_cache: RwLock::new(HashMap::new()),
            utility_cache: RwLock::new(HashMap::new()),
        })
    }

    // ========================================================================
    // Fleet lifecycle
    // ========================================================================

    /// Connect every enabled server in parallel and populate the catalog.
    /// Returns the number of connected servers; zero is fine.
    pub async fn startup(&self) -> usize {
        let specs: Vec<ServerSpec> = {
            let fleet = self.fleet.read().await;
            fleet.enabled_servers().into_iter().cloned().collect()
        };
        let connected = self.service.connect_all(specs).await;
        for id in self.service.connected_server_ids().await {
            self.register_server_tools(&id).await;
        }
        connected
    }

    /// Pull a connected server's tools into the catalog, running domain
    /// auto-discovery when the spec declared none.
    async fn register_server_tools(&self, server_id: &str) {
        let tools = self.service.list_tools(server_id).await;
        if tools.is_empty() {
            return;
        }

        let llm = self.llm().await;
        let domain = match tools[0].domain.clone() {
            Some(declared) => {
                // A declared domain unknown to the registry still needs a
                // definition so scoring can find these tools.
                if self.domains.get(&declared).await.is_none() {
                    self.domains
                        .upsert(corral_core::config::DomainDefinition {
                            name: declared.clone(),
                            description: format!("Tools from the '{}' server", server_id),
                            patterns: vec![declared.clone()],
                            semantic_keywords: Vec::new(),
                            common_tools: tools.iter().map(|t| t.name.clone()).collect(),
                            multi_step_capable: false,
                        })
                        .await;
                }
                declared
            }
            None => {
                self.domains
                    .auto_discover(Some(&llm), server_id, &tools)
                    .await
            }
        };

        let mut catalog = self.catalog.write().await;
        for tool in tools {
            let remote_name = tool.name.clone();
            let unique = catalog.resolve_name(server_id, &remote_name);
            if unique != remote_name {
                tracing::warn!(
                    "tool name collision: '{}' from '{}' registered as '{}'",
                    remote_name,
                    server_id,
                    unique
                );
            }
            let tool = Tool {
                name: unique,
                domain: Some(domain.clone()),
                ..tool
            };
            catalog.register(Box::new(McpToolHandler::new(
                tool,
                remote_name,
                Arc::clone(&self.service),
            )));
        }
    }

    /// Register a handler directly (built-ins and tests).
    pub async fn register_handler(&self, handler: Box<dyn ToolHandler>) {
        self.catalog.write().await.register(handler);
        self.invalidate_caches().await;
    }

    pub async fn shutdown(&self) {
        self.service.shutdown().await;
    }

    // ========================================================================
    // Server administration
    // ========================================================================

    pub async fn enable_server(&self, id: &str) -> Result<bool, CorralError> {
        let spec = {
            let mut fleet = self.fleet.write().await;
            let spec = fleet
                .mcp_servers
                .get_mut(id)
                .ok_or_else(|| CorralError::Configuration(format!("unknown server '{}'", id)))?;
            spec.enabled = true;
            let spec = spec.clone();
            self.persist_fleet(&fleet)?;
            spec
        };

        let connected = self.service.connect(spec).await;
        if connected {
            self.register_server_tools(id).await;
        }
        self.invalidate_caches().await;
        Ok(connected)
    }

    pub async fn disable_server(&self, id: &str) -> Result<(), CorralError> {
        {
            let mut fleet = self.fleet.write().await;
            let spec = fleet
                .mcp_servers
                .get_mut(id)
                .ok_or_else(|| CorralError::Configuration(format!("unknown server '{}'", id)))?;
            spec.enabled = false;
            self.persist_fleet(&fleet)?;
        }

        self.service.forget(id).await;
        self.catalog.write().await.remove_server(id);
        self.invalidate_caches().await;
        Ok(())
    }

    /// First-class config mutation: add or replace a server spec, connect
    /// it when enabled.
    pub async fn upsert_server(&self, spec: ServerSpec) -> Result<bool, CorralError> {
        spec.validate()
            .map_err(|e| CorralError::Configuration(e.to_string()))?;
        {
            let mut fleet = self.fleet.write().await;
            fleet.upsert(spec.clone());
            self.persist_fleet(&fleet)?;
        }

        self.catalog.write().await.remove_server(&spec.id);
        let connected = if spec.enabled {
            let id = spec.id.clone();
            let ok = self.service.connect(spec).await;
            if ok {
                self.register_server_tools(&id).await;
            }
            ok
        } else {
            false
        };
        self.invalidate_caches().await;
        Ok(connected)
    }

    pub async fn remove_server(&self, id: &str) -> Result<(), CorralError> {
        {
            let mut fleet = self.fleet.write().await;
            if fleet.remove(id).is_none() {
                return Err(CorralError::Configuration(format!("unknown server '{}'", id)));
            }
            self.persist_fleet(&fleet)?;
        }
        self.service.forget(id).await;
        self.catalog.write().await.remove_server(id);
        self.invalidate_caches().await;
        Ok(())
    }

    fn persist_fleet(&self, fleet: &FleetConfig) -> Result<(), CorralError> {
        if let Some(path) = &self.fleet_path {
            fleet
                .save(path)
                .map_err(|e| CorralError::Configuration(e.to_string()))?;
        }
        Ok(())
    }

    // ========================================================================
    // LLM handle
    // ========================================================================

    pub async fn llm(&self) -> Arc<dyn LlmClient> {
        self.llm.read().await.clone()
    }

    /// Swap the provider; every cache keyed on LLM behavior is dropped.
    pub async fn set_llm(&self, client: Arc<dyn LlmClient>) {
        *self.llm.write().await = client;
        self.invalidate_caches().await;
    }

    async fn invalidate_caches(&self) {
        self.selection_cache.write().await.clear();
        self.utility_cache.write().await.clear();
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub async fn server_statuses(&self) -> Vec<ServerStatus> {
        self.service.statuses().await
    }

    pub async fn fleet_snapshot(&self) -> FleetConfig {
        self.fleet.read().await.clone()
    }

    pub async fn connected_servers(&self) -> Vec<String> {
        self.service.connected_server_ids().await
    }

    pub async fn available_domains(&self) -> Vec<String> {
        self.domains.names().await
    }

    pub async fn all_tools(&self) -> Vec<Tool> {
        self.catalog.read().await.tools()
    }

    pub async fn tools_by_domain(&self, domain: &str) -> Vec<Tool> {
        self.catalog.read().await.by_domain(domain)
    }

    pub async fn refresh(&self) -> usize {
        let reconnected = self.service.refresh().await;
        if reconnected > 0 {
            for id in self.service.connected_server_ids().await {
                self.register_server_tools(&id).await;
            }
            self.invalidate_caches().await;
        }
        reconnected
    }

    // ========================================================================
    // Query analysis and tool selection
    // ========================================================================

    /// Domain-filtered candidate tools for a query, ordered by domain
    /// relevance.
    pub async fn relevant_tools(&self, query: &str, threshold: f32) -> Vec<Tool> {
        let llm = self.llm().await;
        let domains = self
            .domains
            .relevant_domains(Some(&llm), query, threshold)
            .await;
        let catalog = self.catalog.read().await;
        let mut seen = std::collections::HashSet::new();
        let mut tools = Vec::new();
        for domain in domains {
            for tool in catalog.by_domain(&domain) {
                if seen.insert(tool.name.clone()) {
                    tools.push(tool);
                }
            }
        }
        tools
    }

    /// Classify a query as direct-answer, single-tool, or multi-tool.
    pub async fn analyze_query(&self, query: &str) -> QueryAnalysis {
        if query.trim().is_empty() || self.catalog.read().await.is_empty() {
            return QueryAnalysis {
                kind: QueryKind::DirectAnswer,
                domains: Vec::new(),
                rationale: "no query or no tools available".to_string(),
            };
        }

        let domain_lines = {
            let mut lines = Vec::new();
            for def in self.domains.all().await {
                lines.push(format!("- {}: {}", def.name, def.description));
            }
            lines.join("\n")
        };

        let prompt = format!(
            "Classify the user query by how it should be answered.\n\n\
             Available tool domains:\n{}\n\n\
             Kinds:\n\
             - DIRECT_ANSWER: answerable from general knowledge, no tools needed\n\
             - SINGLE_TOOL: one tool call provides the answer\n\
             - MULTI_TOOL: several chained tool calls are needed\n\n\
             User query: \"{}\"\n\n\
             Respond with JSON only: {{\"kind\": \"DIRECT_ANSWER|SINGLE_TOOL|MULTI_TOOL\", \
             \"domains\": [\"<relevant domains>\"], \"rationale\": \"<one line>\"}}",
            domain_lines, query
        );

        let llm = self.llm().await;
        let parsed = match llm.generate(LlmRequest::from_prompt(None, &prompt)).await {
            Ok(response) => crate::matcher::extract_json_object(&response.text),
            Err(e) => {
                tracing::debug!("analyze_query LLM call failed: {}", e);
                None
            }
        };

        match parsed {
            Some(value) => {
                let kind = match value.get("kind").and_then(|k| k.as_str()) {
                    Some("SINGLE_TOOL") => QueryKind::SingleTool,
                    Some("MULTI_TOOL") => QueryKind::MultiTool,
                    _ => QueryKind::DirectAnswer,
                };
                let domains = value
                    .get("domains")
                    .and_then(|d| d.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                let rationale = value
                    .get("rationale")
                    .and_then(|r| r.as_str())
                    .unwrap_or_default()
                    .to_string();
                QueryAnalysis {
                    kind,
                    domains,
                    rationale,
                }
            }
            None => {
                // Classification failed; fall back to domain relevance.
                let domains = self
                    .domains
                    .relevant_domains(Some(&llm), query, SINGLE_STEP_THRESHOLD)
                    .await;
                let kind = if domains.is_empty() {
                    QueryKind::DirectAnswer
                } else {
                    QueryKind::SingleTool
                };
                QueryAnalysis {
                    kind,
                    domains,
                    rationale: "fallback classification from domain scores".to_string(),
                }
            }
        }
    }

    pub async fn is_multi_step(&self, query: &str) -> bool {
        self.analyze_query(query).await.kind == QueryKind::MultiTool
    }

    /// Ordered (tool, args) for a single-step query. Size 0 or 1 is common.
    pub async fn find_single_step_tools(&self, query: &str) -> Selection {
        self.find_tools(query, false).await
    }

    /// Ordered (tool, args) plan; args may carry `{{RESULT_n}}`
    /// placeholders for chaining.
    pub async fn find_multi_step_tools(&self, query: &str) -> Selection {
        self.find_tools(query, true).await
    }

    async fn find_tools(&self, query: &str, multi_step: bool) -> Selection {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let cache_key = format!(
            "{}\x1f{}",
            if multi_step { "multi" } else { "single" },
            query
        );
        if let Some(cached) = self.selection_cache.read().await.get(&cache_key) {
            return self.rehydrate_selection(cached).await;
        }

        let threshold = if multi_step {
            MULTI_STEP_THRESHOLD
        } else {
            SINGLE_STEP_THRESHOLD
        };
        let tools = self.relevant_tools(query, threshold).await;
        if tools.is_empty() {
            self.selection_cache
                .write()
                .await
                .entry(cache_key)
                .or_default();
            return Vec::new();
        }

        let base_prompt = if multi_step {
            ToolMatcher::build_plan_prompt(query, &tools)
        } else {
            ToolMatcher::build_single_prompt(query, &tools)
        };
        let prompt = self.apply_rules(&base_prompt, &tools);

        let llm = self.llm().await;
        let selection = match ToolMatcher::request_selection(&llm, &prompt).await {
            Ok(value) => {
                if multi_step {
                    ToolMatcher::parse_plan(&value, &tools)
                } else {
                    ToolMatcher::parse_single(&value, &tools)
                }
            }
            Err(e) => {
                // Transient LLM failures are not cached; the next attempt
                // gets a fresh selection round.
                tracing::warn!("tool selection failed: {}", e);
                return Vec::new();
            }
        };

        let cached: Vec<(String, Value)> = selection
            .iter()
            .map(|(tool, args)| (tool.name.clone(), args.clone()))
            .collect();
        self.selection_cache
            .write()
            .await
            .entry(cache_key)
            .or_insert(cached);

        selection
    }

    /// Map cached tool names back onto the live catalog; tools that
    /// disappeared since caching are dropped.
    async fn rehydrate_selection(&self, cached: &[(String, Value)]) -> Selection {
        let catalog = self.catalog.read().await;
        cached
            .iter()
            .filter_map(|(name, args)| catalog.get(name).map(|tool| (tool, args.clone())))
            .collect()
    }

    /// Run every involved server's rules over the matcher prompt.
    fn apply_rules(&self, base_prompt: &str, tools: &[Tool]) -> String {
        let mut by_server: HashMap<&str, Vec<&Tool>> = HashMap::new();
        for tool in tools {
            by_server.entry(tool.server_id.as_str()).or_default().push(tool);
        }

        let mut prompt = base_prompt.to_string();
        let mut servers: Vec<&str> = by_server.keys().copied().collect();
        servers.sort();
        for server in servers {
            let group = &by_server[server];
            let params: Vec<String> = group
                .iter()
                .flat_map(|t| t.input_schema.property_names())
                .collect();
            let domain = group.first().and_then(|t| t.domain.as_deref());
            prompt = self.rules.enhance_prompt(&prompt, server, &params, domain);
        }
        prompt
    }

    // ========================================================================
    // Execution
    // ========================================================================

    pub async fn execute_tool(&self, name: &str, args: &Value) -> ToolExecutionResult {
        let catalog = self.catalog.read().await;
        let result = catalog.dispatch(name, args).await;
        if !result.success {
            tracing::debug!(
                "tool '{}' failed ({:?}): {}",
                name,
                result.error,
                result.message
            );
        }
        result
    }

    // ========================================================================
    // Observation utility
    // ========================================================================

    /// Ask the LLM whether `observation` carries data relevant to `query`;
    /// cached on the full string pair, regex fallback when the LLM is out.
    pub async fn is_observation_useful(&self, observation: &str, query: &str) -> bool {
        let cache_key = format!("{}\x1f{}", observation, query);
        if let Some(&useful) = self.utility_cache.read().await.get(&cache_key) {
            return useful;
        }

        if RE_OBVIOUS_ERROR.is_match(observation) {
            self.utility_cache.write().await.insert(cache_key, false);
            return false;
        }

        let prompt = format!(
            "Does this text contain concrete data that helps answer the question?\n\n\
             Question: \"{}\"\n\nText:\n{}\n\nAnswer with exactly YES or NO.",
            query, observation
        );
        let llm = self.llm().await;
        let useful = match llm.generate(LlmRequest::from_prompt(None, &prompt)).await {
            Ok(response) => response.text.trim().to_uppercase().contains("YES"),
            Err(e) => {
                tracing::debug!("observation utility LLM call failed: {}", e);
                fallback_usefulness(observation)
            }
        };

        self.utility_cache
            .write()
            .await
            .entry(cache_key)
            .or_insert(useful);
        useful
    }
}

/// Regex fallback: errors are never useful, bare success acknowledgements
/// are not data, anything with numbers or real length probably is.
pub fn fallback_usefulness(observation: &str) -> bool {
    if RE_OBVIOUS_ERROR.is_match(observation) {
        return false;
    }
    if RE_GENERIC_SUCCESS.is_match(observation) && observation.len() < 40 {
        return false;
    }
    RE_HAS_DIGIT.is_match(observation) || observation.len() >= 40
}
