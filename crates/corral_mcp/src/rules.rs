//! Per-server prompt augmentation. Rules never change the semantics of a
//! tool call — they only adjust the prompt that guides the LLM.

use corral_core::config::{RuleItem, RulesConfig};
use regex::Regex;
use std::collections::HashMap;

struct CompiledRule {
    item: RuleItem,
    replace: Option<Regex>,
}

#[derive(Default)]
pub struct RuleEngine {
    rules: HashMap<String, Vec<CompiledRule>>,
}

impl RuleEngine {
    pub fn new(config: RulesConfig) -> Self {
        let mut rules: HashMap<String, Vec<CompiledRule>> = HashMap::new();
        for set in config.0 {
            let compiled = set
                .items
                .into_iter()
                .map(|item| {
                    let replace = item.rules.parameter_replace.as_ref().and_then(|pr| {
                        match Regex::new(&pr.pattern) {
                            Ok(re) => Some(re),
                            Err(e) => {
                                tracing::warn!(
                                    "rule for server '{}' has invalid pattern '{}': {}",
                                    set.name,
                                    pr.pattern,
                                    e
                                );
                                None
                            }
                        }
                    });
                    CompiledRule { item, replace }
                })
                .collect();
            rules.insert(set.name, compiled);
        }
        Self { rules }
    }

    /// Augment a matcher prompt with guidance for one server. A rule fires
    /// when any trigger matches a parameter name, any content keyword
    /// appears in the prompt, or a keyword equals the domain name.
    pub fn enhance_prompt(
        &self,
        base_prompt: &str,
        server_name: &str,
        parameters: &[String],
        domain: Option<&str>,
    ) -> String {
        let Some(items) = self.rules.get(server_name) else {
            return base_prompt.to_string();
        };

        let prompt_folded = base_prompt.to_lowercase();
        let mut prompt = base_prompt.to_string();

        for rule in items {
            let by_param = rule
                .item
                .triggers
                .iter()
                .any(|t| parameters.iter().any(|p| p == t));
            let by_keyword = rule.item.content_keywords.iter().any(|k| {
                let k = k.to_lowercase();
                prompt_folded.contains(&k) || domain.map(|d| d.eq_ignore_ascii_case(&k)) == Some(true)
            });
            if !by_param && !by_keyword {
                continue;
            }

            if let (Some(re), Some(pr)) = (&rule.replace, &rule.item.rules.parameter_replace) {
                prompt = re.replace_all(&prompt, pr.replacement.as_str()).to_string();
            }
            if let Some(extra) = &rule.item.rules.context_add {
                prompt.push_str("\n\n");
                prompt.push_str(extra);
            }
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::config::{ParameterReplace, RuleActions, ServerRuleSet};

    fn engine() -> RuleEngine {
        RuleEngine::new(RulesConfig(vec![ServerRuleSet {
            name: "filesystem".to_string(),
            items: vec![RuleItem {
                triggers: vec!["path".to_string()],
                content_keywords: vec!["directory".to_string()],
                rules: RuleActions {
                    context_add: Some("Paths are relative to the workspace root.".to_string()),
                    parameter_replace: Some(ParameterReplace {
                        pattern: "~".to_string(),
                        replacement: "/home/user".to_string(),
                    }),
                },
            }],
        }]))
    }

    #[test]
    fn test_trigger_by_parameter_name() {
        let out = engine().enhance_prompt("Write to ~/notes.txt", "filesystem", &["path".into()], None);
        assert!(out.contains("/home/user/notes.txt"));
        assert!(out.ends_with("Paths are relative to the workspace root."));
    }

    #[test]
    fn test_trigger_by_content_keyword() {
        let out = engine().enhance_prompt("List the Directory contents", "filesystem", &[], None);
        assert!(out.contains("workspace root"));
    }

    #[test]
    fn test_trigger_by_domain_name() {
        let out = engine().enhance_prompt("some prompt", "filesystem", &[], Some("directory"));
        assert!(out.contains("workspace root"));
    }

    #[test]
    fn test_no_trigger_no_change() {
        let base = "What time is it?";
        let out = engine().enhance_prompt(base, "filesystem", &["timezone".into()], Some("time"));
        assert_eq!(out, base);
    }

    #[test]
    fn test_unknown_server_no_change() {
        let base = "directory listing";
        assert_eq!(engine().enhance_prompt(base, "weather", &[], None), base);
    }
}
