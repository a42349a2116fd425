use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageType {
    String(String),
    Strings(Vec<String>),
    Dictionary(Vec<HashMap<String, String>>),
}

impl MessageType {
    /// A system prompt followed by the user query.
    pub fn chat(system_prompt: &str, user_prompt: &str) -> Self {
        MessageType::Dictionary(vec![
            HashMap::from([
                ("role".to_string(), "system".to_string()),
                ("content".to_string(), system_prompt.to_string()),
            ]),
            HashMap::from([
                ("role".to_string(), "user".to_string()),
                ("content".to_string(), user_prompt.to_string()),
            ]),
        ])
    }

    pub fn text_parts(&self) -> Vec<&str> {
        match self {
            MessageType::String(message) => vec![message.as_str()],
            MessageType::Strings(messages) => messages.iter().map(|m| m.as_str()).collect(),
            MessageType::Dictionary(messages) => messages
                .iter()
                .filter_map(|message| message.get("content").map(|c| c.as_str()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for LLMParams {
    fn default() -> Self {
        LLMParams {
            max_tokens: 1000,
            temperature: 0.0,
            top_p: 1.0,
        }
    }
}

/// Which step of a search issued a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchPhase {
    Map,
    Reduce,
    Local,
    DriftAnswer,
    DriftFollowup,
}

/// Single-prompt, non-streaming completion service.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(
        &self,
        messages: MessageType,
        llm_params: LLMParams,
        search_phase: Option<SearchPhase>,
    ) -> anyhow::Result<String>;
}
