//! Integration tests for the manager facade.
//!
//! A routed mock LLM answers each prompt by substring match, so domain
//! scoring, query analysis, and tool selection can be scripted
//! independently; scripted handlers stand in for real MCP servers.

use corral_core::config::{DomainDefinition, DomainsConfig, FleetConfig, RulesConfig, ServerSpec};
use corral_core::error::ErrorKind;
use corral_core::tools::{Tool, ToolExecutionResult, ToolHandler, ToolInputSchema};
use corral_llm::{Capabilities, LlmClient, LlmError, LlmRequest, LlmResponse, ToolDef};
use corral_mcp::{DomainRegistry, McpManager, McpService, QueryKind, RuleEngine, ServiceSettings};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

// ============================================================================
// Routed mock LLM
// ============================================================================

/// Answers prompts by first matching route substring; records every prompt.
struct RoutedLlm {
    routes: Vec<(&'static str, String)>,
    prompts: Mutex<Vec<String>>,
}

impl RoutedLlm {
    fn new(routes: Vec<(&'static str, String)>) -> Arc<Self> {
        Arc::new(Self {
            routes,
            prompts: Mutex::new(Vec::new()),
        })
    }

    async fn prompts_containing(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .await
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

#[async_trait::async_trait]
impl LlmClient for RoutedLlm {
    fn provider_name(&self) -> &'static str {
        "routed-mock"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_tools: false,
            supports_streaming: false,
        }
    }

    async fn generate_with_tools(
        &self,
        request: LlmRequest,
        _tools: Vec<ToolDef>,
    ) -> Result<LlmResponse, LlmError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().await.push(prompt.clone());
        for (needle, reply) in &self.routes {
            if prompt.contains(needle) {
                return Ok(LlmResponse::text_only(reply.clone()));
            }
        }
        Ok(LlmResponse::text_only("I do not know."))
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

// ============================================================================
// Scripted tool handlers
// ============================================================================

struct ScriptedHandler {
    tool: Tool,
    reply: String,
}

#[async_trait::async_trait]
impl ToolHandler for ScriptedHandler {
    fn name(&self) -> &str {
        &self.tool.name
    }
    fn spec(&self) -> Tool {
        self.tool.clone()
    }
    async fn execute(&self, _args: &Value) -> ToolExecutionResult {
        ToolExecutionResult::ok(&self.tool.name, self.reply.clone())
    }
}

fn time_tool() -> Tool {
    Tool {
        name: "get_current_time".to_string(),
        description: "Current time in a timezone".to_string(),
        server_id: "time".to_string(),
        domain: Some("time".to_string()),
        input_schema: ToolInputSchema {
            schema_type: "object".to_string(),
            properties: json!({"timezone": {"type": "string"}}),
            required: vec!["timezone".to_string()],
        },
    }
}

fn domains() -> DomainsConfig {
    let mut map = BTreeMap::new();
    map.insert(
        "time".to_string(),
        DomainDefinition {
            name: "time".to_string(),
            description: "Clocks and timezones".to_string(),
            patterns: vec!["time".to_string(), "timezone".to_string()],
            semantic_keywords: vec!["clock".to_string()],
            common_tools: vec!["get_current_time".to_string()],
            multi_step_capable: false,
        },
    );
    DomainsConfig(map)
}

fn fleet_with_time_server() -> FleetConfig {
    let mut fleet = FleetConfig::default();
    fleet.upsert(ServerSpec {
        id: "time".to_string(),
        description: "Time utilities".to_string(),
        domain: Some("time".to_string()),
        command: "uvx mcp-server-time".to_string(),
        ..Default::default()
    });
    fleet
}

async fn manager_with(llm: Arc<dyn LlmClient>) -> Arc<McpManager> {
    let service = McpService::new(ServiceSettings::default());
    let registry = DomainRegistry::new(domains(), None);
    let manager = McpManager::new(
        service,
        registry,
        RuleEngine::new(RulesConfig::default()),
        llm,
        fleet_with_time_server(),
        None,
    );
    manager
        .register_handler(Box::new(ScriptedHandler {
            tool: time_tool(),
            reply: "2026-08-01 22:15 (Asia/Tokyo)".to_string(),
        }))
        .await;
    manager
}

fn selection_routes() -> Vec<(&'static str, String)> {
    vec![
        (
            "Rate how relevant",
            r#"{"scores": {"time": 0.9}}"#.to_string(),
        ),
        (
            "select the single best tool",
            r#"{"tool_number": 1, "parameters": {"timezone": "Asia/Tokyo"}}"#.to_string(),
        ),
    ]
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_single_step_selection_end_to_end() {
    let llm = RoutedLlm::new(selection_routes());
    let manager = manager_with(llm.clone()).await;

    let selection = manager
        .find_single_step_tools("What time is it in Tokyo?")
        .await;
    assert_eq!(selection.len(), 1);
    assert_eq!(selection[0].0.name, "get_current_time");
    assert_eq!(selection[0].1["timezone"], "Asia/Tokyo");

    let result = manager
        .execute_tool("get_current_time", &selection[0].1)
        .await;
    assert!(result.success);
    assert!(result.content.contains("22:15"));
}

#[tokio::test]
async fn test_selection_cache_is_transparent() {
    let llm = RoutedLlm::new(selection_routes());
    let manager = manager_with(llm.clone()).await;

    let first = manager
        .find_single_step_tools("What time is it in Tokyo?")
        .await;
    let second = manager
        .find_single_step_tools("What time is it in Tokyo?")
        .await;

    assert_eq!(first.len(), second.len());
    assert_eq!(first[0].0.name, second[0].0.name);
    assert_eq!(first[0].1, second[0].1);
    // One live selection round; the second call was served from cache.
    assert_eq!(llm.prompts_containing("select the single best tool").await, 1);
}

#[tokio::test]
async fn test_provider_change_invalidates_selection_cache() {
    let llm = RoutedLlm::new(selection_routes());
    let manager = manager_with(llm.clone()).await;

    manager
        .find_single_step_tools("What time is it in Tokyo?")
        .await;
    let llm2 = RoutedLlm::new(selection_routes());
    manager.set_llm(llm2.clone()).await;
    manager
        .find_single_step_tools("What time is it in Tokyo?")
        .await;
    // The new provider was consulted instead of the stale cache.
    assert_eq!(llm2.prompts_containing("select the single best tool").await, 1);
}

#[tokio::test]
async fn test_empty_query_empty_selection() {
    let llm = RoutedLlm::new(selection_routes());
    let manager = manager_with(llm.clone()).await;

    assert!(manager.find_single_step_tools("").await.is_empty());
    assert!(manager.find_single_step_tools("   ").await.is_empty());
    assert_eq!(llm.prompts_containing("select").await, 0);
}

#[tokio::test]
async fn test_unrelated_query_gets_no_tools() {
    let llm = RoutedLlm::new(vec![(
        "Rate how relevant",
        r#"{"scores": {"time": 0.05}}"#.to_string(),
    )]);
    let manager = manager_with(llm.clone()).await;

    let selection = manager.find_single_step_tools("Who wrote Hamlet?").await;
    assert!(selection.is_empty());
    assert_eq!(llm.prompts_containing("select the single best tool").await, 0);
}

#[tokio::test]
async fn test_unknown_tool_execution_fails_typed() {
    let llm = RoutedLlm::new(vec![]);
    let manager = manager_with(llm).await;

    let result = manager.execute_tool("no_such_tool", &json!({})).await;
    assert!(!result.success);
    assert_eq!(result.error, Some(ErrorKind::ToolNotFound));
    assert!(!result.message.is_empty());
}

#[tokio::test]
async fn test_analyze_query_without_tools_is_direct() {
    let llm = RoutedLlm::new(vec![]);
    let service = McpService::new(ServiceSettings::default());
    let registry = DomainRegistry::new(domains(), None);
    let manager = McpManager::new(
        service,
        registry,
        RuleEngine::new(RulesConfig::default()),
        llm,
        FleetConfig::default(),
        None,
    );

    let analysis = manager.analyze_query("Who wrote Hamlet?").await;
    assert_eq!(analysis.kind, QueryKind::DirectAnswer);
}

#[tokio::test]
async fn test_analyze_query_parses_kinds() {
    let llm = RoutedLlm::new(vec![(
        "Classify the user query",
        r#"{"kind": "MULTI_TOOL", "domains": ["time"], "rationale": "chained calls"}"#.to_string(),
    )]);
    let manager = manager_with(llm).await;

    let analysis = manager.analyze_query("Write the time to a file").await;
    assert_eq!(analysis.kind, QueryKind::MultiTool);
    assert_eq!(analysis.domains, vec!["time"]);
    assert!(manager.is_multi_step("Write the time to a file").await);
}

#[tokio::test]
async fn test_multi_step_plan_with_placeholder() {
    let write_tool = Tool {
        name: "write_file".to_string(),
        description: "Write content to a file".to_string(),
        server_id: "filesystem".to_string(),
        domain: Some("time".to_string()), // same domain so one scoring pass covers both
        input_schema: ToolInputSchema {
            schema_type: "object".to_string(),
            properties: json!({
                "path": {"type": "string"},
                "content": {"type": "string"}
            }),
            required: vec!["path".to_string(), "content".to_string()],
        },
    };

    let llm = RoutedLlm::new(vec![
        (
            "Rate how relevant",
            r#"{"scores": {"time": 0.95}}"#.to_string(),
        ),
        (
            "plan the minimum ordered set",
            r#"{"tools": [
                {"tool_number": 1, "parameters": {"timezone": "UTC"}},
                {"tool_number": 2, "parameters": {"path": "./out.txt", "content": "{{RESULT_1}}"}}
            ]}"#
            .to_string(),
        ),
    ]);
    let manager = manager_with(llm).await;
    manager
        .register_handler(Box::new(ScriptedHandler {
            tool: write_tool,
            reply: "wrote 24 bytes".to_string(),
        }))
        .await;

    let plan = manager
        .find_multi_step_tools("Write the current UTC time to ./out.txt")
        .await;
    assert_eq!(plan.len(), 2);
    assert_eq!(plan[0].0.name, "get_current_time");
    assert_eq!(plan[1].0.name, "write_file");
    assert_eq!(plan[1].1["content"], "{{RESULT_1}}");
}

#[tokio::test]
async fn test_disable_server_removes_tools_from_selection() {
    let llm = RoutedLlm::new(selection_routes());
    let manager = manager_with(llm).await;

    assert_eq!(manager.all_tools().await.len(), 1);
    manager.disable_server("time").await.unwrap();
    assert!(manager.all_tools().await.is_empty());

    // Selection after disable finds nothing and never touches the server
    let selection = manager
        .find_single_step_tools("What time is it in Tokyo?")
        .await;
    assert!(selection.is_empty());
}

#[tokio::test]
async fn test_disable_unknown_server_is_configuration_error() {
    let llm = RoutedLlm::new(vec![]);
    let manager = manager_with(llm).await;
    let err = manager.disable_server("ghost").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_observation_utility_cache_and_error_shortcut() {
    let llm = RoutedLlm::new(vec![(
        "concrete data",
        "YES, it names the temperature.".to_string(),
    )]);
    let manager = manager_with(llm.clone()).await;

    // Obvious errors never reach the LLM
    assert!(
        !manager
            .is_observation_useful("Error: connection refused", "weather?")
            .await
    );
    assert_eq!(llm.prompts_containing("concrete data").await, 0);

    // Useful observation goes through once, then comes from cache
    assert!(
        manager
            .is_observation_useful("Temperature: 23C", "weather?")
            .await
    );
    assert!(
        manager
            .is_observation_useful("Temperature: 23C", "weather?")
            .await
    );
    assert_eq!(llm.prompts_containing("concrete data").await, 1);
}

#[tokio::test]
async fn test_tools_by_domain_scoped() {
    let llm = RoutedLlm::new(vec![]);
    let manager = manager_with(llm).await;

    assert_eq!(manager.tools_by_domain("time").await.len(), 1);
    assert!(manager.tools_by_domain("weather").await.is_empty());
}
