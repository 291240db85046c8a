//! Configuration: the fleet file (JSON), the domain catalog (JSON), the
//! per-server rule file (JSON), LLM credentials (properties + env), and the
//! app-level settings file (TOML with env overrides).
//!
//! Fleet and domain configs round-trip: load → save → load yields an
//! identical in-memory model (BTreeMap keeps key order stable).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Fleet configuration
// ============================================================================

/// One configured MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSpec {
    /// Map key from the fleet file; filled in after load.
    #[serde(skip)]
    pub id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Executable plus inline arguments as one line.
    pub command: String,
    pub priority: u8,
    pub enabled: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            description: String::new(),
            domain: None,
            command: String::new(),
            priority: 3,
            enabled: true,
            env: BTreeMap::new(),
            args: Vec::new(),
        }
    }
}

impl ServerSpec {
    /// Split the command line into (program, args), appending the extra
    /// `args` list from the config.
    pub fn command_line(&self) -> Option<(String, Vec<String>)> {
        let mut parts = self.command.split_whitespace().map(String::from);
        let program = parts.next()?;
        let mut args: Vec<String> = parts.collect();
        args.extend(self.args.iter().cloned());
        Some((program, args))
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            anyhow::bail!("server id must not be empty");
        }
        if self.command.trim().is_empty() {
            anyhow::bail!("server '{}' has an empty command", self.id);
        }
        if !(1..=5).contains(&self.priority) {
            anyhow::bail!(
                "server '{}' priority {} out of range 1..=5",
                self.id,
                self.priority
            );
        }
        Ok(())
    }
}

/// The fleet file: `{"mcpServers": {"<id>": {...}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, ServerSpec>,
}

impl FleetConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read fleet file: {}", path.as_ref().display()))?;
        let mut config: FleetConfig =
            serde_json::from_str(&content).context("failed to parse fleet JSON")?;
        for (id, spec) in config.mcp_servers.iter_mut() {
            spec.id = id.clone();
            spec.validate()?;
        }
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("failed to write fleet file: {}", path.as_ref().display()))
    }

    /// Enabled servers sorted by priority (1 = highest first), then id.
    pub fn enabled_servers(&self) -> Vec<&ServerSpec> {
        let mut servers: Vec<&ServerSpec> =
            self.mcp_servers.values().filter(|s| s.enabled).collect();
        servers.sort_by_key(|s| (s.priority, s.id.clone()));
        servers
    }

    pub fn upsert(&mut self, spec: ServerSpec) {
        self.mcp_servers.insert(spec.id.clone(), spec);
    }

    pub fn remove(&mut self, id: &str) -> Option<ServerSpec> {
        self.mcp_servers.remove(id)
    }
}

// ============================================================================
// Domain configuration
// ============================================================================

/// A logical grouping of tools used to narrow selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainDefinition {
    pub name: String,
    pub description: String,
    /// Ordered literal patterns, matched case-folded.
    pub patterns: Vec<String>,
    pub semantic_keywords: Vec<String>,
    pub common_tools: Vec<String>,
    pub multi_step_capable: bool,
}

impl DomainDefinition {
    /// Case-fold patterns and keywords; call after load and before save.
    pub fn normalize(&mut self) {
        for p in &mut self.patterns {
            *p = p.to_lowercase();
        }
        for k in &mut self.semantic_keywords {
            *k = k.to_lowercase();
        }
    }
}

/// The domain file: a JSON map of name → definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DomainsConfig(pub BTreeMap<String, DomainDefinition>);

impl DomainsConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read domain file: {}", path.as_ref().display()))?;
        let mut config: DomainsConfig =
            serde_json::from_str(&content).context("failed to parse domain JSON")?;
        for (name, def) in config.0.iter_mut() {
            if def.name.is_empty() {
                def.name = name.clone();
            }
            def.normalize();
        }
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("failed to write domain file: {}", path.as_ref().display()))
    }
}

// ============================================================================
// Server rules
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParameterReplace {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleActions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_add: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_replace: Option<ParameterReplace>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleItem {
    /// Parameter names that arm this rule.
    pub triggers: Vec<String>,
    #[serde(rename = "contentKeywords")]
    pub content_keywords: Vec<String>,
    pub rules: RuleActions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerRuleSet {
    pub name: String,
    #[serde(default)]
    pub items: Vec<RuleItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RulesConfig(pub Vec<ServerRuleSet>);

impl RulesConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read rules file: {}", path.as_ref().display()))?;
        serde_json::from_str(&content).context("failed to parse rules JSON")
    }
}

// ============================================================================
// LLM credentials
// ============================================================================

/// API keys from a properties file plus environment variables. Env vars
/// take precedence; file values starting with `YOUR_` count as unset.
/// No Debug impl: key material stays out of logs.
#[derive(Clone, Default)]
pub struct Credentials {
    file_values: BTreeMap<String, String>,
}

impl Credentials {
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let mut file_values = BTreeMap::new();
        if let Ok(content) = std::fs::read_to_string(path.as_ref()) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    file_values.insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        } else {
            tracing::debug!(
                "credentials file not found: {}",
                path.as_ref().display()
            );
        }
        Self { file_values }
    }

    /// Resolve a key by name: env first, then file; `YOUR_` placeholders
    /// are treated as unset.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = std::env::var(key)
            .ok()
            .or_else(|| self.file_values.get(key).cloned())?;
        let value = value.trim().to_string();
        if value.is_empty() || value.starts_with("YOUR_") {
            None
        } else {
            Some(value)
        }
    }
}

// ============================================================================
// App-level settings
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSettings,
    pub timeouts: TimeoutSettings,
    pub inference: InferenceSettings,
    pub files: FileSettings,
}

impl AppConfig {
    /// Load from a TOML file, falling back to defaults for missing fields,
    /// then apply env overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        let mut config: AppConfig =
            toml::from_str(&content).context("failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CORRAL_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("CORRAL_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("CORRAL_STRATEGY") {
            self.inference.strategy = v;
        }
        if let Ok(v) = std::env::var("CORRAL_QUERY_DEADLINE_SECS") {
            if let Ok(n) = v.parse() {
                self.timeouts.query_deadline_secs = n;
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: String,
    /// Empty means the provider's default model.
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "claude".to_string(),
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub query_deadline_secs: u64,
    pub tool_call_secs: u64,
    pub handshake_secs: u64,
    pub startup_secs: u64,
    pub health_window_secs: u64,
    pub llm_request_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            query_deadline_secs: 120,
            tool_call_secs: 60,
            handshake_secs: 15,
            startup_secs: 30,
            health_window_secs: 60,
            llm_request_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub strategy: String,
    pub react_max_iterations: u32,
    pub reflection_max_rounds: u32,
    pub reflection_quality_threshold: f32,
    pub session_window: usize,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            strategy: "simple".to_string(),
            react_max_iterations: 5,
            reflection_max_rounds: 3,
            reflection_quality_threshold: 0.85,
            session_window: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub fleet: String,
    pub domains: String,
    pub rules: String,
    pub credentials: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            fleet: "servers.json".to_string(),
            domains: "domains.json".to_string(),
            rules: "server_rules.json".to_string(),
            credentials: "llm.properties".to_string(),
        }
    }
}

/// Explicit application context threaded through constructors; replaces
/// any notion of global mutable config.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub config_dir: PathBuf,
}

impl AppContext {
    pub fn new(config: AppConfig, config_dir: PathBuf) -> Self {
        Self { config, config_dir }
    }

    pub fn fleet_path(&self) -> PathBuf {
        self.config_dir.join(&self.config.files.fleet)
    }

    pub fn domains_path(&self) -> PathBuf {
        self.config_dir.join(&self.config.files.domains)
    }

    pub fn rules_path(&self) -> PathBuf {
        self.config_dir.join(&self.config.files.rules)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.config_dir.join(&self.config.files.credentials)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const FLEET_JSON: &str = r#"{
        "mcpServers": {
            "time": {
                "description": "Time utilities",
                "domain": "time",
                "command": "uvx mcp-server-time",
                "priority": 1,
                "enabled": true,
                "env": {"TZ": "UTC"},
                "args": ["--local-timezone", "UTC"]
            },
            "weather": {
                "description": "Weather forecasts",
                "command": "npx -y weather-server",
                "priority": 2,
                "enabled": false
            }
        }
    }"#;

    #[test]
    fn test_fleet_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(&path, FLEET_JSON).unwrap();

        let fleet = FleetConfig::load(&path).unwrap();
        assert_eq!(fleet.mcp_servers.len(), 2);
        let time = &fleet.mcp_servers["time"];
        assert_eq!(time.id, "time");
        assert_eq!(time.priority, 1);
        assert_eq!(time.env["TZ"], "UTC");

        let (program, args) = time.command_line().unwrap();
        assert_eq!(program, "uvx");
        assert_eq!(args, vec!["mcp-server-time", "--local-timezone", "UTC"]);

        // Disabled server is excluded from the startup set
        let enabled = fleet.enabled_servers();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "time");
    }

    #[test]
    fn test_fleet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(&path, FLEET_JSON).unwrap();

        let fleet = FleetConfig::load(&path).unwrap();
        let path2 = dir.path().join("servers2.json");
        fleet.save(&path2).unwrap();
        let reloaded = FleetConfig::load(&path2).unwrap();
        assert_eq!(fleet, reloaded);
    }

    #[test]
    fn test_fleet_rejects_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(&path, r#"{"mcpServers": {"bad": {"command": ""}}}"#).unwrap();
        assert!(FleetConfig::load(&path).is_err());
    }

    #[test]
    fn test_domains_round_trip_and_case_folding() {
        let json = r#"{
            "weather": {
                "name": "weather",
                "description": "Forecasts and conditions",
                "patterns": ["Weather", "FORECAST"],
                "semanticKeywords": ["Rain", "Temperature"],
                "commonTools": ["get_forecast"],
                "multiStepCapable": false
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("domains.json");
        std::fs::write(&path, json).unwrap();

        let domains = DomainsConfig::load(&path).unwrap();
        let def = &domains.0["weather"];
        assert_eq!(def.patterns, vec!["weather", "forecast"]);
        assert_eq!(def.semantic_keywords, vec!["rain", "temperature"]);

        let path2 = dir.path().join("domains2.json");
        domains.save(&path2).unwrap();
        assert_eq!(domains, DomainsConfig::load(&path2).unwrap());
    }

    #[test]
    fn test_rules_parse() {
        let json = r#"[
            {
                "name": "filesystem",
                "items": [
                    {
                        "triggers": ["path"],
                        "contentKeywords": ["file", "directory"],
                        "rules": {
                            "context_add": "Paths are relative to the workspace root.",
                            "parameter_replace": {"pattern": "~", "replacement": "/home/user"}
                        }
                    }
                ]
            }
        ]"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, json).unwrap();

        let rules = RulesConfig::load(&path).unwrap();
        assert_eq!(rules.0.len(), 1);
        let item = &rules.0[0].items[0];
        assert_eq!(item.triggers, vec!["path"]);
        assert!(item.rules.context_add.is_some());
        assert_eq!(item.rules.parameter_replace.as_ref().unwrap().pattern, "~");
    }

    #[test]
    fn test_credentials_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm.properties");
        std::fs::write(
            &path,
            "# keys\nGROQ_API_KEY=file-groq\nOPENAI_API_KEY=YOUR_OPENAI_KEY\n",
        )
        .unwrap();

        let creds = Credentials::load(&path);
        assert_eq!(creds.get("GROQ_API_KEY"), Some("file-groq".to_string()));
        // YOUR_ placeholder counts as unset
        assert_eq!(creds.get("OPENAI_API_KEY"), None);

        std::env::set_var("GROQ_API_KEY", "env-groq");
        assert_eq!(creds.get("GROQ_API_KEY"), Some("env-groq".to_string()));
        std::env::remove_var("GROQ_API_KEY");
    }

    #[test]
    fn test_app_config_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "claude");
        assert_eq!(cfg.timeouts.query_deadline_secs, 120);
        assert_eq!(cfg.timeouts.tool_call_secs, 60);
        assert_eq!(cfg.inference.react_max_iterations, 5);
        assert_eq!(cfg.inference.reflection_max_rounds, 3);
        assert!((cfg.inference.reflection_quality_threshold - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn test_app_config_partial_toml() {
        let toml_str = r#"
[llm]
provider = "groq"

[timeouts]
tool_call_secs = 30
"#;
        let cfg: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.provider, "groq");
        assert_eq!(cfg.timeouts.tool_call_secs, 30);
        // Unspecified fields keep defaults
        assert_eq!(cfg.timeouts.query_deadline_secs, 120);
        assert_eq!(cfg.inference.strategy, "simple");
    }
}
