use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::layers::providers::{extract_json_array, CompletionRequest, ProviderManager};

/// At most this many queries are planned for one topic.
pub const MAX_QUERIES: usize = 4;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "about", "using", "based", "towards", "their", "that", "this",
];

struct TopicPatterns {
    quoted: Regex,
    phrases: Vec<Regex>,
    filler: Regex,
    punctuation: Regex,
}

impl TopicPatterns {
    fn compile() -> Result<Self, regex::Error> {
        let phrases = [
            r"(?:research|study|investigate|explore|analyze|examine) (?:on |about |in |into )?(.+?)(?:[?.!]|$)",
            r"(?:papers|publications|articles|literature) (?:on |about |in |regarding )?(.+?)(?:[?.!]|$)",
            r"(?:interested in|working on|focusing on|looking at) (.+?)(?:[?.!]|$)",
            r"(?:topic|area|field|domain) (?:is |of )(.+?)(?:[?.!]|$)",
            r"(.+?) (?:research|studies|papers|literature)",
            r"(?:find|search|look for) (?:papers on |about |regarding )?(.+?)(?:[?.!]|$)",
            r"(.+?) (?:in|for|and) (?:healthcare|education|industry|science|technology)",
        ]
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            quoted: Regex::new(r#""([^"]+)""#)?,
            phrases,
            filler: Regex::new(r"\b(?:papers?|research|studies|literature|please|thanks)\b")?,
            punctuation: Regex::new(r"[^\w\s-]")?,
        })
    }
}

static TOPIC_PATTERNS: LazyLock<Option<TopicPatterns>> = LazyLock::new(|| TopicPatterns::compile().ok());

pub struct QueryPlanner;

impl QueryPlanner {
    /// Pulls a research topic out of free text without asking a model.
    pub fn extract_topic(input: &str) -> Option<String> {
        let patterns = TOPIC_PATTERNS.as_ref()?;
        let lower = input.trim().to_lowercase();

        if let Some(quoted) = patterns.quoted.captures(&lower).and_then(|c| c.get(1)) {
            let topic = quoted.as_str().trim();
            if !topic.is_empty() {
                return Some(topic.to_string());
            }
        }

        for pattern in &patterns.phrases {
            let Some(found) = pattern.captures(&lower).and_then(|c| c.get(1)) else {
                continue;
            };
            let cleaned = patterns.filler.replace_all(found.as_str(), "");
            let cleaned = patterns.punctuation.replace_all(&cleaned, "");
            let topic = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
            let words = topic.split_whitespace().count();
            if topic.chars().count() > 3 && words <= 8 {
                return Some(topic);
            }
        }
        None
    }

    /// Pattern extraction first; a configured model gets the final say on unclear input.
    pub async fn resolve_topic(manager: &ProviderManager, input: &str) -> Option<String> {
        if let Some(topic) = Self::extract_topic(input) {
            return Some(topic);
        }
        if manager.is_empty() {
            return None;
        }

        let prompt = format!(
            "Extract the main research topic from this user input.\n\n\
             Rules:\n\
             1. Return ONLY the core research topic (2-6 words)\n\
             2. Remove filler words like \"papers on\" or \"research about\"\n\
             3. If no clear research topic exists, return \"None\"\n\n\
             User input: \"{}\"\n\nTopic:",
            input
        );
        let request = CompletionRequest::new(prompt).with_system("You are a research topic extraction expert.");
        match manager.complete(&request).await {
            Ok(completion) => {
                let topic = completion.text.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string();
                let len = topic.chars().count();
                if !topic.eq_ignore_ascii_case("none") && len > 3 && len < 100 {
                    Some(topic)
                } else {
                    None
                }
            }
            Err(e) => {
                tracing::warn!("LLM topic extraction failed: {}", e);
                None
            }
        }
    }

    /// Queries that need no model: the topic plus a few standard variations.
    pub fn naive_queries(topic: &str) -> Vec<String> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Vec::new();
        }
        let mut queries = vec![topic.to_string()];

        if topic.split_whitespace().count() <= 3 {
            queries.push(format!("{} recent advances", topic));
            queries.push(format!("{} systematic review", topic));
            queries.push(format!("{} survey", topic));
        } else {
            let keywords: Vec<&str> = topic
                .split_whitespace()
                .filter(|w| w.chars().count() > 3 && !STOPWORDS.contains(&w.to_lowercase().as_str()))
                .take(4)
                .collect();
            if keywords.len() >= 2 {
                queries.push(keywords.join(" "));
            }
        }
        Self::dedup(queries)
    }

    /// Naive queries plus up to three model-suggested ones, deduplicated and capped.
    pub async fn generate_queries(manager: &ProviderManager, topic: &str) -> Vec<String> {
        let mut queries = Self::naive_queries(topic);
        if manager.is_empty() || queries.is_empty() {
            return queries;
        }

        let prompt = format!(
            "Generate 3 different search queries to find academic papers on: \"{}\"\n\n\
             Requirements:\n\
             1. Queries should be 2-6 words each\n\
             2. Cover different aspects of the topic\n\
             3. Use academic terminology\n\
             4. Include one query for recent reviews or surveys\n\n\
             Return ONLY a JSON array of 3 queries, like: [\"query 1\", \"query 2\", \"query 3\"]",
            topic
        );
        let request = CompletionRequest::new(prompt).with_schema(json!({
            "type": "object",
            "properties": {"queries": {"type": "array", "items": {"type": "string"}}},
            "required": ["queries"]
        }));

        match manager.complete(&request).await {
            Ok(completion) => {
                let suggested: Vec<String> = extract_json_array(&completion.text, "queries", Value::is_string)
                    .unwrap_or_default()
                    .into_iter()
                    .take(3)
                    .filter_map(|v| match v {
                        Value::String(q) => Some(q.trim().to_string()),
                        _ => None,
                    })
                    .filter(|q| (2..=8).contains(&q.split_whitespace().count()))
                    .collect();
                tracing::debug!("{} suggested {} queries", completion.provider, suggested.len());
                queries.extend(suggested);
            }
            Err(e) => tracing::warn!("LLM query generation failed: {}", e),
        }
        Self::dedup(queries)
    }

    fn dedup(queries: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        queries
            .into_iter()
            .filter(|q| seen.insert(q.trim().to_lowercase()))
            .take(MAX_QUERIES)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderFailure;
    use crate::layers::providers::tests::ScriptedAdapter;
    use crate::layers::providers::{LlmAdapter, ProviderKind};
    use std::time::Duration;

    fn manager_answering(answer: std::result::Result<String, ProviderFailure>) -> ProviderManager {
        let adapter: Box<dyn LlmAdapter> = Box::new(ScriptedAdapter::new(ProviderKind::OpenAi, vec![answer]));
        ProviderManager::with_adapters(vec![adapter], 0, Duration::ZERO)
    }

    #[test]
    fn test_extracts_quoted_topic() {
        assert_eq!(
            QueryPlanner::extract_topic(r#"Tell me about "Graph Neural Networks" please"#),
            Some("graph neural networks".to_string())
        );
    }

    #[test]
    fn test_extracts_topic_from_phrases() {
        assert_eq!(
            QueryPlanner::extract_topic("I want to research machine learning in healthcare"),
            Some("machine learning in healthcare".to_string())
        );
        assert_eq!(
            QueryPlanner::extract_topic("Find papers about climate change impacts."),
            Some("climate change impacts".to_string())
        );
        assert_eq!(
            QueryPlanner::extract_topic("I'm interested in quantum error correction!"),
            Some("quantum error correction".to_string())
        );
    }

    #[test]
    fn test_no_topic_in_small_talk() {
        assert_eq!(QueryPlanner::extract_topic("Hello how are you"), None);
    }

    #[test]
    fn test_short_topic_gets_variations() {
        let queries = QueryPlanner::naive_queries("federated learning");
        assert_eq!(
            queries,
            vec![
                "federated learning",
                "federated learning recent advances",
                "federated learning systematic review",
                "federated learning survey",
            ]
        );
    }

    #[test]
    fn test_long_topic_gets_keyword_query() {
        let queries = QueryPlanner::naive_queries("privacy preserving machine learning for the clinical domain");
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1], "privacy preserving machine learning");
    }

    #[tokio::test]
    async fn test_model_queries_are_merged_and_capped() {
        let manager = manager_answering(Ok(
            r#"{"queries": ["Federated Learning", "federated optimization heterogeneity", "x"]}"#.to_string(),
        ));
        let queries = QueryPlanner::generate_queries(&manager, "deep federated learning systems").await;
        assert_eq!(queries[0], "deep federated learning systems");
        assert!(queries.contains(&"Federated Learning".to_string()));
        assert!(queries.contains(&"federated optimization heterogeneity".to_string()));
        assert!(!queries.contains(&"x".to_string()));
        assert!(queries.len() <= MAX_QUERIES);
    }

    #[tokio::test]
    async fn test_model_failure_keeps_naive_queries() {
        let manager = manager_answering(Err(ProviderFailure::RateLimited));
        let queries = QueryPlanner::generate_queries(&manager, "soft robotics").await;
        assert_eq!(queries, QueryPlanner::naive_queries("soft robotics"));
    }

    #[tokio::test]
    async fn test_model_resolves_unclear_topics() {
        let manager = manager_answering(Ok("\"protein structure prediction\"".to_string()));
        assert_eq!(
            QueryPlanner::resolve_topic(&manager, "hmm, what about alphafold-like stuff").await,
            Some("protein structure prediction".to_string())
        );
        let manager = manager_answering(Ok("None".to_string()));
        assert_eq!(QueryPlanner::resolve_topic(&manager, "hi there").await, None);
    }
}
