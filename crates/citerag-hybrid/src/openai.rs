//! OpenAI-compatible chat-completions generation collaborator.
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use citerag_core::traits::Generator;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
	client: reqwest::Client,
	auth_header: String,
	base_url: String,
	model: String,
}

impl OpenAiGenerator {
	pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
		Self::with_base_url(api_key, model, DEFAULT_OPENAI_BASE_URL)
	}

	pub fn with_base_url(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
		Self {
			client: reqwest::Client::new(),
			auth_header: format!("Bearer {}", api_key.into()),
			base_url: base_url.into().trim_end_matches('/').to_string(),
			model: model.into(),
		}
	}

	fn chat_completions_url(&self) -> String {
		format!("{}/v1/chat/completions", self.base_url)
	}
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
	role: &'a str,
	content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
	model: &'a str,
	messages: [ChatMessage<'a>; 2],
	temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
	choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
	message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
	content: Option<String>,
}

#[async_trait]
impl Generator for OpenAiGenerator {
	async fn generate(&self, system: &str, user: &str, temperature: f32) -> Result<String> {
		let request = ChatRequest {
			model: &self.model,
			messages: [ChatMessage { role: "system", content: system }, ChatMessage { role: "user", content: user }],
			temperature,
		};
		let response = self
			.client
			.post(self.chat_completions_url())
			.header("Authorization", &self.auth_header)
			.json(&request)
			.send()
			.await?;
		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			bail!("chat completion returned {status}: {body}");
		}
		let parsed: ChatResponse = response.json().await?;
		let choice = parsed.choices.into_iter().next().ok_or_else(|| anyhow!("no choices in chat completion"))?;
		let content = choice.message.content.unwrap_or_default();
		debug!(model = %self.model, chars = content.len(), "chat completion received");
		Ok(content)
	}
}
