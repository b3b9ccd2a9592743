//! Topic analyzer: picks at most one sub-agent for an incoming message.
//! Keywords are preferred but only when unambiguous; the LLM classifier
//! handles ambiguity and semantic matches. The analyzer is advisory, so
//! every failure path resolves to `None` and the main agent handles the turn.

use std::sync::Arc;

use tracing::{debug, warn};

use relay_core::domain::agent::SubAgent;

use crate::llm::{ChatRequest, LlmClient};

/// Message text is truncated to this many characters before it is embedded
/// in the classification prompt.
const PROMPT_TEXT_BUDGET: usize = 500;

const CLASSIFIER_MAX_TOKENS: u32 = 16;

pub struct TopicAnalyzer {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl TopicAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    /// Select the sub-agent that should handle `message`, if any.
    pub async fn select<'a>(
        &self,
        message: &str,
        candidates: &'a [SubAgent],
    ) -> Option<&'a SubAgent> {
        let message = message.trim();
        if message.is_empty() {
            return None;
        }

        let addressable: Vec<&SubAgent> =
            candidates.iter().filter(|sub| sub.routing.is_addressable()).collect();
        if addressable.is_empty() {
            return None;
        }

        // Keyword pre-filter: a single unambiguous hit short-circuits the
        // classifier entirely.
        let folded = message.to_lowercase();
        let keyword_hits: Vec<&SubAgent> = addressable
            .iter()
            .copied()
            .filter(|sub| {
                sub.routing
                    .keywords
                    .iter()
                    .any(|keyword| contains_whole_word(&folded, &keyword.to_lowercase()))
            })
            .collect();
        if let [only] = keyword_hits.as_slice() {
            debug!(
                event_name = "topic.keyword_match",
                sub_agent_id = %only.id.0,
                "routed by unambiguous keyword"
            );
            return Some(only);
        }

        let topics = candidate_topics(&addressable);
        if topics.is_empty() {
            return None;
        }

        let reply = match self.classify(message, &topics).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "topic.classifier_failed",
                    error = %error,
                    "topic classification failed; falling back to main agent"
                );
                return None;
            }
        };

        let normalized = normalize_reply(&reply);
        if normalized.is_empty() || normalized == "none" {
            return None;
        }

        addressable.into_iter().find(|sub| {
            sub.routing.topics.iter().any(|topic| topic.to_lowercase() == normalized)
        })
    }

    async fn classify(
        &self,
        message: &str,
        topics: &[String],
    ) -> Result<String, crate::llm::LlmError> {
        let truncated: String = message.chars().take(PROMPT_TEXT_BUDGET).collect();
        let listing =
            topics.iter().map(|topic| format!("- {topic}")).collect::<Vec<_>>().join("\n");
        let prompt = format!(
            "Classify the user message into exactly one of the topics below.\n\
             Reply with the topic name verbatim. If no topic applies, reply with the word none.\n\n\
             Topics:\n{listing}\n\nUser message:\n{truncated}"
        );

        let request = ChatRequest {
            model: self.model.clone(),
            system_prompt: "You are a message-routing classifier. Answer with a single word."
                .to_string(),
            temperature: 0.0,
            max_tokens: CLASSIFIER_MAX_TOKENS,
            history: Vec::new(),
            user_text: prompt,
        };
        self.llm.complete(&request).await
    }
}

/// Ordered, de-duplicated topic list across the addressable sub-agents.
fn candidate_topics(addressable: &[&SubAgent]) -> Vec<String> {
    let mut topics = Vec::new();
    for sub in addressable {
        for topic in &sub.routing.topics {
            if !topics.iter().any(|existing: &String| existing.eq_ignore_ascii_case(topic)) {
                topics.push(topic.clone());
            }
        }
    }
    topics
}

fn normalize_reply(reply: &str) -> String {
    reply
        .trim()
        .trim_matches(|ch: char| ch == '"' || ch == '\'' || ch == '.' || ch == '`')
        .to_lowercase()
}

fn contains_whole_word(folded_text: &str, folded_word: &str) -> bool {
    if folded_word.is_empty() {
        return false;
    }
    folded_text
        .split(|ch: char| !ch.is_alphanumeric())
        .any(|token| token == folded_word)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    use relay_core::domain::agent::{
        AgentId, ClientId, RoutingConfig, SubAgent, SubAgentConfig, SubAgentId,
    };

    use super::{contains_whole_word, TopicAnalyzer};
    use crate::llm::{ChatRequest, LlmClient, LlmError};

    /// LLM double that replays scripted replies and records every request.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedLlm {
        fn with_replies(replies: Vec<Result<String, LlmError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), requests: Mutex::new(Vec::new()) }
        }

        async fn request_count(&self) -> usize {
            self.requests.lock().await.len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.requests.lock().await.push(request.clone());
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Provider("script exhausted".to_string())))
        }
    }

    fn sub_agent(id: &str, topics: &[&str], keywords: &[&str]) -> SubAgent {
        SubAgent {
            id: SubAgentId(id.to_string()),
            parent_id: AgentId("agent-1".to_string()),
            client_id: Some(ClientId("client-1".to_string())),
            name: id.to_string(),
            routing: RoutingConfig {
                topics: topics.iter().map(|topic| topic.to_string()).collect(),
                keywords: keywords.iter().map(|keyword| keyword.to_string()).collect::<BTreeSet<_>>(),
            },
            inherit: BTreeSet::new(),
            config: SubAgentConfig::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn analyzer(replies: Vec<Result<String, LlmError>>) -> (TopicAnalyzer, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm::with_replies(replies));
        (TopicAnalyzer::new(llm.clone(), "llama3.1"), llm)
    }

    #[tokio::test]
    async fn unambiguous_keyword_short_circuits_the_classifier() {
        let (analyzer, llm) = analyzer(vec![]);
        let candidates =
            vec![sub_agent("sales", &["sales"], &["price", "pricing"]), sub_agent("support", &["support"], &[])];

        let selected = analyzer.select("What's the pricing?", &candidates).await;
        assert_eq!(selected.map(|sub| sub.id.0.as_str()), Some("sales"));
        assert_eq!(llm.request_count().await, 0, "keyword hit must not call the classifier");
    }

    #[tokio::test]
    async fn ambiguous_keywords_fall_through_to_the_classifier() {
        let (analyzer, llm) = analyzer(vec![Ok("support".to_string())]);
        let candidates = vec![
            sub_agent("sales", &["sales"], &["account"]),
            sub_agent("support", &["support"], &["account"]),
        ];

        let selected = analyzer.select("I need help with my account", &candidates).await;
        assert_eq!(selected.map(|sub| sub.id.0.as_str()), Some("support"));
        assert_eq!(llm.request_count().await, 1);
    }

    #[tokio::test]
    async fn classifier_none_and_unknown_replies_route_to_main_agent() {
        let candidates =
            vec![sub_agent("sales", &["sales"], &[]), sub_agent("support", &["support"], &[])];

        let (analyzer, _) = analyzer(vec![Ok("none".to_string())]);
        assert!(analyzer.select("Hello, who are you?", &candidates).await.is_none());

        let (analyzer, _) = self::analyzer(vec![Ok("billing".to_string())]);
        assert!(analyzer.select("Hello, who are you?", &candidates).await.is_none());
    }

    #[tokio::test]
    async fn classifier_reply_is_trimmed_and_case_folded() {
        let (analyzer, _) = analyzer(vec![Ok("  \"Support\".\n".to_string())]);
        let candidates =
            vec![sub_agent("sales", &["sales"], &[]), sub_agent("support", &["support"], &[])];

        let selected = analyzer.select("my widget is broken", &candidates).await;
        assert_eq!(selected.map(|sub| sub.id.0.as_str()), Some("support"));
    }

    #[tokio::test]
    async fn llm_failure_is_advisory_and_returns_none() {
        let (analyzer, _) = analyzer(vec![Err(LlmError::Timeout)]);
        let candidates = vec![sub_agent("sales", &["sales"], &[])];
        assert!(analyzer.select("tell me about plans", &candidates).await.is_none());
    }

    #[tokio::test]
    async fn empty_message_and_empty_candidates_return_none() {
        let (analyzer, llm) = analyzer(vec![]);
        assert!(analyzer.select("   ", &[sub_agent("sales", &["sales"], &[])]).await.is_none());
        assert!(analyzer.select("hello", &[]).await.is_none());
        assert_eq!(llm.request_count().await, 0);
    }

    #[tokio::test]
    async fn routing_is_stable_for_a_deterministic_classifier() {
        let candidates =
            vec![sub_agent("sales", &["sales"], &[]), sub_agent("support", &["support"], &[])];

        for _ in 0..3 {
            let (analyzer, _) = analyzer(vec![Ok("sales".to_string())]);
            let selected = analyzer.select("I want to buy the product", &candidates).await;
            assert_eq!(selected.map(|sub| sub.id.0.as_str()), Some("sales"));
        }
    }

    #[test]
    fn whole_word_matching_ignores_substrings() {
        assert!(contains_whole_word("what's the price today", "price"));
        assert!(!contains_whole_word("priceless artifacts", "price"));
        assert!(contains_whole_word("pricing, please", "pricing"));
    }
}
