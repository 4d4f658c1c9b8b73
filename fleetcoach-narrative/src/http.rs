use async_trait::async_trait;
use fleetcoach_types::TurnResult;
use serde::{Deserialize, Serialize};

use crate::parse::{parse_clean_shift, parse_shift_script, parse_turn};
use crate::prompt::{clean_shift_prompt, conversation_prompt, shift_prompt, SYSTEM_PROMPT};
use crate::{ConversationPrompt, NarrativeError, NarrativeGenerator, ShiftPrompt, ShiftScript};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Narrative generator backed by an OpenAI-compatible chat completions endpoint.
pub struct HttpNarrativeGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    /// Opening scripts.
    script_temperature: f32,
    /// Conversation turns run slightly warmer.
    conversation_temperature: f32,
}

impl HttpNarrativeGenerator {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            api_key: None,
            script_temperature: 0.7,
            conversation_temperature: 0.8,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_temperatures(mut self, script: f32, conversation: f32) -> Self {
        self.script_temperature = script;
        self.conversation_temperature = conversation;
        self
    }

    async fn complete(&self, prompt: String, temperature: f32) -> Result<String, NarrativeError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: prompt,
                },
            ],
            temperature,
            stream: false,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| NarrativeError::Unavailable(format!("HTTP error: {e}")))?;
        if !resp.status().is_success() {
            return Err(NarrativeError::Unavailable(format!(
                "HTTP status: {}",
                resp.status()
            )));
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| NarrativeError::Unavailable(format!("undecodable completion: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| NarrativeError::Unavailable("completion had no choices".into()))
    }
}

#[async_trait]
impl NarrativeGenerator for HttpNarrativeGenerator {
    async fn shift_script(&self, prompt: ShiftPrompt<'_>) -> Result<ShiftScript, NarrativeError> {
        let text = self
            .complete(shift_prompt(&prompt), self.script_temperature)
            .await?;
        parse_shift_script(&text, prompt.events)
    }

    async fn clean_shift_script(&self, driver_name: &str) -> Result<ShiftScript, NarrativeError> {
        let text = self
            .complete(clean_shift_prompt(driver_name), self.script_temperature)
            .await?;
        parse_clean_shift(&text)
    }

    async fn continue_conversation(
        &self,
        prompt: ConversationPrompt<'_>,
    ) -> Result<TurnResult, NarrativeError> {
        let text = self
            .complete(conversation_prompt(&prompt), self.conversation_temperature)
            .await?;
        parse_turn(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn clean_shift_round_trip_through_chat_endpoint() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], false);
                assert_eq!(body["response_format"]["type"], "json_object");
                assert_eq!(body["messages"][0]["role"], "system");
                Json(json!({ "choices": [{ "message": {
                    "role": "assistant",
                    "content": "```json\n{\"initialMessage\": \"Clean shift, Sam. Nice.\"}\n```"
                } }] }))
            }),
        );
        let gen = HttpNarrativeGenerator::new(serve(app).await, "coach".into());
        let script = gen.clean_shift_script("Sam Rivera").await.unwrap();
        assert_eq!(script.opening_message, "Clean shift, Sam. Nice.");
    }

    #[tokio::test]
    async fn server_errors_are_unavailable() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let gen = HttpNarrativeGenerator::new(serve(app).await, "coach".into());
        let err = gen.clean_shift_script("Sam").await.unwrap_err();
        assert!(matches!(err, NarrativeError::Unavailable(_)));
    }
}
