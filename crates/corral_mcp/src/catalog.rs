//! The process-wide tool catalog. One handler per tool; names are unique
//! across the whole catalog, with a `serverid__name` prefix applied when
//! two servers expose the same tool name.

use corral_core::error::ErrorKind;
use corral_core::tools::{Tool, ToolExecutionResult, ToolHandler};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Default)]
pub struct ToolCatalog {
    handlers: BTreeMap<String, Box<dyn ToolHandler>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog-unique name a tool from `server_id` will get: its own
    /// name, or `serverid__name` when another server already claimed it.
    pub fn resolve_name(&self, server_id: &str, name: &str) -> String {
        match self.handlers.get(name) {
            Some(existing) if existing.spec().server_id != server_id => {
                format!("{}__{}", server_id, name)
            }
            _ => name.to_string(),
        }
    }

    /// Register a handler under its spec name. Re-registration from the
    /// same server replaces the previous handler.
    pub fn register(&mut self, handler: Box<dyn ToolHandler>) {
        let name = handler.name().to_string();
        tracing::debug!("registered tool '{}'", name);
        self.handlers.insert(name, handler);
    }

    pub fn remove_server(&mut self, server_id: &str) {
        self.handlers
            .retain(|_, h| h.spec().server_id != server_id);
    }

    pub fn get(&self, name: &str) -> Option<Tool> {
        self.handlers.get(name).map(|h| h.spec())
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.handlers.values().map(|h| h.spec()).collect()
    }

    pub fn by_domain(&self, domain: &str) -> Vec<Tool> {
        self.handlers
            .values()
            .map(|h| h.spec())
            .filter(|t| t.domain.as_deref() == Some(domain))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch a call by catalog name.
    pub async fn dispatch(&self, name: &str, args: &Value) -> ToolExecutionResult {
        match self.handlers.get(name) {
            Some(handler) => handler.execute(args).await,
            None => ToolExecutionResult::failure(
                name,
                ErrorKind::ToolNotFound,
                format!("unknown tool: {}", name),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::tools::ToolInputSchema;

    struct FixedHandler {
        tool: Tool,
        reply: String,
    }

    #[async_trait::async_trait]
    impl ToolHandler for FixedHandler {
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

    fn handler(server: &str, name: &str, domain: &str) -> Box<dyn ToolHandler> {
        Box::new(FixedHandler {
            tool: Tool {
                name: name.to_string(),
                description: String::new(),
                server_id: server.to_string(),
                domain: Some(domain.to_string()),
                input_schema: ToolInputSchema::empty(),
            },
            reply: format!("{}-reply", name),
        })
    }

    #[tokio::test]
    async fn test_dispatch_and_unknown() {
        let mut catalog = ToolCatalog::new();
        catalog.register(handler("time", "get_current_time", "time"));

        let ok = catalog
            .dispatch("get_current_time", &serde_json::json!({}))
            .await;
        assert!(ok.success);

        let missing = catalog.dispatch("nope", &serde_json::json!({})).await;
        assert!(!missing.success);
        assert_eq!(missing.error, Some(ErrorKind::ToolNotFound));
        assert!(!missing.message.is_empty());
    }

    #[test]
    fn test_name_collision_disambiguated_by_server() {
        let mut catalog = ToolCatalog::new();
        catalog.register(handler("alpha", "search", "files"));

        // Same name from another server gets a prefix
        assert_eq!(catalog.resolve_name("beta", "search"), "beta__search");
        // Re-registration from the same server keeps the plain name
        assert_eq!(catalog.resolve_name("alpha", "search"), "search");
    }

    #[test]
    fn test_remove_server_tools() {
        let mut catalog = ToolCatalog::new();
        catalog.register(handler("time", "get_current_time", "time"));
        catalog.register(handler("weather", "get_forecast", "weather"));

        catalog.remove_server("time");
        assert_eq!(catalog.names(), vec!["get_forecast"]);
    }

    #[test]
    fn test_by_domain() {
        let mut catalog = ToolCatalog::new();
        catalog.register(handler("time", "get_current_time", "time"));
        catalog.register(handler("weather", "get_forecast", "weather"));

        let tools = catalog.by_domain("weather");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "get_forecast");
    }
}
