use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{one_line, EnrichError, SentimentClassifier, Summarizer, MAX_SUMMARY_CHARS};
use crate::storage::Sentiment;

pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Article text beyond this is not sent to the provider.
const MAX_INPUT_CHARS: usize = 12_000;

const SENTIMENT_PROMPT: &str = "Classify the overall sentiment of the news article. \
     Answer with exactly one word: positive, negative, neutral, or mixed.";

const SUMMARY_PROMPT: &str = "Summarize the news article in one or two plain sentences \
     (at most 400 characters). No lists, no markdown, no preamble.";

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
///
/// Implements both [`SentimentClassifier`] and [`Summarizer`] with one
/// request per call.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        model: &str,
        api_key: Option<SecretString>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn complete(&self, system: &str, text: &str, max_tokens: u32) -> Result<String, EnrichError> {
        let key = self.api_key.as_ref().ok_or(EnrichError::MissingApiKey)?;

        let input: String = text.chars().take(MAX_INPUT_CHARS).collect();
        if input.trim().is_empty() {
            return Err(EnrichError::EmptyInput);
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: &input,
                },
            ],
            temperature: 0.0,
            max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key.expose_secret())
            .timeout(self.timeout)
            .json(&req)
            .send()
            .await
            .map_err(map_reqwest)?;

        if !resp.status().is_success() {
            return Err(EnrichError::HttpStatus(resp.status().as_u16()));
        }

        let body: Resp = resp.json().await.map_err(map_reqwest)?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(EnrichError::EmptyResponse)
    }
}

fn map_reqwest(err: reqwest::Error) -> EnrichError {
    if err.is_timeout() {
        EnrichError::Timeout
    } else {
        EnrichError::Network(err)
    }
}

/// Accept exactly one label, ignoring case, surrounding quotes and a
/// trailing full stop.
fn parse_label(answer: &str) -> Result<Sentiment, EnrichError> {
    let cleaned = answer
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim_end_matches('.');
    cleaned
        .parse::<Sentiment>()
        .map_err(|_| EnrichError::InvalidLabel(answer.to_string()))
}

#[async_trait]
impl SentimentClassifier for ChatClient {
    async fn classify(&self, text: &str) -> Result<Sentiment, EnrichError> {
        let answer = self.complete(SENTIMENT_PROMPT, text, 4).await?;
        parse_label(&answer)
    }
}

#[async_trait]
impl Summarizer for ChatClient {
    async fn summarize(&self, text: &str) -> Result<String, EnrichError> {
        let answer = self.complete(SUMMARY_PROMPT, text, 160).await?;
        let summary = one_line(&answer, MAX_SUMMARY_CHARS);
        if summary.is_empty() {
            return Err(EnrichError::EmptyResponse);
        }
        Ok(summary)
    }
}
