use async_trait::async_trait;
use graphrag_search::error::LLMError;
use graphrag_search::llm::base::{Completer, LLMParams, MessageType, SearchPhase};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Serialize, Deserialize, Debug)]
pub struct OllamaChatResponse {
    pub model: String,
    pub created_at: String,
    pub message: OllamaChatMessage,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct OllamaChatMessage {
    pub role: String,
    pub content: String,
}

pub struct OllamaChat {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaChat {
    pub fn new(base_url: &str, model: &str) -> Self {
        OllamaChat {
            base_url: base_url.to_string(),
            model: model.to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Completer for OllamaChat {
    async fn complete(
        &self,
        messages: MessageType,
        llm_params: LLMParams,
        search_phase: Option<SearchPhase>,
    ) -> anyhow::Result<String> {
        let chat_url = format!("{}{}", &self.base_url, "/api/chat");

        let messages_json = match messages {
            MessageType::String(message) => json!([{"role": "user", "content": message}]),
            MessageType::Strings(messages) => json!(messages
                .into_iter()
                .map(|content| json!({"role": "user", "content": content}))
                .collect::<Vec<_>>()),
            MessageType::Dictionary(messages) => json!(messages),
        };

        let json_phase = matches!(
            search_phase,
            Some(SearchPhase::Map) | Some(SearchPhase::DriftAnswer) | Some(SearchPhase::DriftFollowup)
        );
        let mut payload = json!({
            "model": self.model,
            "messages": messages_json,
            "options": {
                "num_predict": llm_params.max_tokens,
                "temperature": llm_params.temperature,
                "top_p": llm_params.top_p,
            },
            "stream": false,
        });
        if json_phase {
            payload["format"] = json!("json");
        }

        let response = self.client.post(chat_url).json(&payload).send().await?;
        if response.status().is_client_error() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::Permanent(format!("{}: {}", status, body)).into());
        }
        let response = response.error_for_status()?;
        let response = response.json::<OllamaChatResponse>().await?;

        Ok(response.message.content)
    }
}
