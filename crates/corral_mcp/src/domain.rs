//! The domain registry: pattern scoring first, LLM scoring when available,
//! pattern fallback when it is not. Runtime-discovered domains are
//! persisted back to the domain config file.

use crate::matcher::extract_json_object;
use corral_core::config::{DomainDefinition, DomainsConfig};
use corral_core::error::CorralError;
use corral_core::tools::Tool;
use corral_llm::{LlmClient, LlmRequest};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Divisor that maps summed literal lengths onto [0,1].
const PATTERN_SCORE_SCALE: f32 = 30.0;
/// How many pattern-phase candidates the LLM phase sees.
const LLM_CANDIDATES: usize = 5;

pub struct DomainRegistry {
    domains: RwLock<BTreeMap<String, DomainDefinition>>,
    config_path: Option<PathBuf>,
}

impl DomainRegistry {
    pub fn new(config: DomainsConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            domains: RwLock::new(config.0),
            config_path,
        }
    }

    pub async fn all(&self) -> Vec<DomainDefinition> {
        self.domains.read().await.values().cloned().collect()
    }

    pub async fn get(&self, name: &str) -> Option<DomainDefinition> {
        self.domains.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.domains.read().await.keys().cloned().collect()
    }

    pub async fn multi_step_capable(&self, name: &str) -> bool {
        self.domains
            .read()
            .await
            .get(name)
            .map(|d| d.multi_step_capable)
            .unwrap_or(false)
    }

    /// Insert or replace a domain and persist the catalog when a config
    /// path is configured.
    pub async fn upsert(&self, mut def: DomainDefinition) {
        def.normalize();
        let snapshot = {
            let mut domains = self.domains.write().await;
            domains.insert(def.name.clone(), def);
            DomainsConfig(domains.clone())
        };
        if let Some(path) = &self.config_path {
            if let Err(e) = snapshot.save(path) {
                tracing::warn!("failed to persist domain catalog: {}", e);
            }
        }
    }

    /// Pattern phase: count pattern/keyword/tool-name hits in the folded
    /// query, weighted by literal length, scaled and clamped to [0,1].
    /// Returns all domains sorted by descending score.
    pub async fn pattern_scores(&self, query: &str) -> Vec<(String, f32)> {
        let folded = query.to_lowercase();
        let domains = self.domains.read().await;
        let mut scores: Vec<(String, f32)> = domains
            .values()
            .map(|def| (def.name.clone(), pattern_score(def, &folded)))
            .collect();
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores
    }

    /// Most-relevant domains above `threshold`, LLM-scored when a client
    /// is supplied and healthy, pattern-scored otherwise.
    pub async fn relevant_domains(
        &self,
        llm: Option<&Arc<dyn LlmClient>>,
        query: &str,
        threshold: f32,
    ) -> Vec<String> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let pattern = self.pattern_scores(query).await;
        if pattern.is_empty() {
            return Vec::new();
        }

        if let Some(llm) = llm {
            let candidates: Vec<String> = pattern
                .iter()
                .take(LLM_CANDIDATES)
                .map(|(name, _)| name.clone())
                .collect();
            match self.score_with_llm(llm, query, &candidates).await {
                Ok(scored) => {
                    return scored
                        .into_iter()
                        .filter(|(_, s)| *s >= threshold)
                        .map(|(name, _)| name)
                        .collect();
                }
                Err(e) => {
                    tracing::debug!("LLM domain scoring failed ({}), using pattern scores", e);
                }
            }
        }

        pattern
            .into_iter()
            .filter(|(_, s)| *s >= threshold)
            .map(|(name, _)| name)
            .collect()
    }

    async fn score_with_llm(
        &self,
        llm: &Arc<dyn LlmClient>,
        query: &str,
        candidates: &[String],
    ) -> Result<Vec<(String, f32)>, CorralError> {
        let descriptions = {
            let domains = self.domains.read().await;
            candidates
                .iter()
                .filter_map(|name| domains.get(name))
                .map(|d| format!("- {}: {}", d.name, d.description))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "Rate how relevant each domain is to the user query, 0.0 (unrelated) to 1.0 \
             (clearly about this domain).\n\nUser query: \"{}\"\n\nDomains:\n{}\n\n\
             Respond with JSON only: {{\"scores\": {{\"<domain>\": <score>, ...}}}}",
            query, descriptions
        );

        let response = llm
            .generate(LlmRequest::from_prompt(None, &prompt))
            .await
            .map_err(CorralError::from)?;
        let value = extract_json_object(&response.text).ok_or_else(|| {
            CorralError::LlmCommunication("no JSON in domain scoring reply".to_string())
        })?;
        let scores = value
            .get("scores")
            .and_then(|s| s.as_object())
            .ok_or_else(|| {
                CorralError::LlmCommunication("missing 'scores' in domain reply".to_string())
            })?;

        let mut out: Vec<(String, f32)> = candidates
            .iter()
            .filter_map(|name| {
                scores
                    .get(name)
                    .and_then(|v| v.as_f64())
                    .map(|s| (name.clone(), (s as f32).clamp(0.0, 1.0)))
            })
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    /// Propose a domain for tools that arrived without one. A name
    /// collision attaches the tools to the existing domain; otherwise a new
    /// definition is created and persisted. On LLM failure the server id
    /// becomes the domain so the tools stay reachable.
    pub async fn auto_discover(
        &self,
        llm: Option<&Arc<dyn LlmClient>>,
        server_id: &str,
        tools: &[Tool],
    ) -> String {
        let proposed = match llm {
            Some(llm) => self.propose_domain(llm, tools).await.ok(),
            None => None,
        };

        let (name, description) = proposed.unwrap_or_else(|| {
            (
                server_id.to_lowercase(),
                format!("Tools provided by the '{}' server", server_id),
            )
        });

        if let Some(mut def) = self.get(&name).await {
            for tool in tools {
                if !def.common_tools.contains(&tool.name) {
                    def.common_tools.push(tool.name.clone());
                }
            }
            self.upsert(def).await;
            return name;
        }

        let def = DomainDefinition {
            name: name.clone(),
            description,
            patterns: vec![name.clone()],
            semantic_keywords: tools
                .iter()
                .flat_map(|t| t.name.split('_').map(str::to_lowercase))
                .collect(),
            common_tools: tools.iter().map(|t| t.name.clone()).collect(),
            multi_step_capable: false,
        };
        tracing::info!("auto-discovered domain '{}' for server '{}'", name, server_id);
        self.upsert(def).await;
        name
    }

    async fn propose_domain(
        &self,
        llm: &Arc<dyn LlmClient>,
        tools: &[Tool],
    ) -> Result<(String, String), CorralError> {
        let tool_lines = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Propose a concise domain name (one lowercase word) and a one-line description \
             for this group of tools.\n\nTools:\n{}\n\n\
             Respond with JSON only: {{\"name\": \"<word>\", \"description\": \"<text>\"}}",
            tool_lines
        );

        let response = llm
            .generate(LlmRequest::from_prompt(None, &prompt))
            .await
            .map_err(CorralError::from)?;
        let value = extract_json_object(&response.text).ok_or_else(|| {
            CorralError::LlmCommunication("no JSON in domain proposal".to_string())
        })?;
        let name = value
            .get("name")
            .and_then(|n| n.as_str())
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                CorralError::LlmCommunication("missing 'name' in domain proposal".to_string())
            })?;
        let description = value
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string();
        Ok((name, description))
    }
}

fn pattern_score(def: &DomainDefinition, folded_query: &str) -> f32 {
    let mut raw = 0usize;
    for pattern in &def.patterns {
        if !pattern.is_empty() && folded_query.contains(pattern.as_str()) {
            raw += pattern.len();
        }
    }
    for keyword in &def.semantic_keywords {
        if !keyword.is_empty() && folded_query.contains(keyword.as_str()) {
            raw += keyword.len();
        }
    }
    for tool in &def.common_tools {
        let folded_tool = tool.to_lowercase();
        if folded_query.contains(&folded_tool) {
            raw += folded_tool.len();
        }
    }
    (raw as f32 / PATTERN_SCORE_SCALE).clamp(0.0, 1.0)
}
