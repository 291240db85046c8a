pub mod catalog;
pub mod domain;
pub mod manager;
pub mod matcher;
pub mod rules;
pub mod service;

pub use catalog::ToolCatalog;
pub use domain::DomainRegistry;
pub use manager::{McpManager, QueryAnalysis, QueryKind};
pub use matcher::{Selection, ToolMatcher};
pub use rules::RuleEngine;
pub use service::{McpService, ServerStatus, ServiceSettings};
