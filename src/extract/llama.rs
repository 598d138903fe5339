//! Client for a llama.cpp-style `/completion` endpoint.

use std::time::Duration;

use reqwest::Client;

use crate::{config::Config, prelude::*};

use super::{
    ExtractionOutcome, ExtractionResult, Extractor,
    prompt::{JSON_GRAMMAR, build_prompt},
};

/// Stop sequences sent with every request.
static STOP: &[&str] = &["</s>"];

/// Request body for `POST /completion`.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: i32,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    min_p: f32,
    repeat_penalty: f32,
    stop: &'a [&'a str],
    grammar: &'a str,
    stream: bool,
}

impl<'a> CompletionRequest<'a> {
    /// Fixed sampling parameters. Low temperature, since we want the fields
    /// copied, not invented.
    fn new(prompt: &'a str) -> Self {
        Self {
            prompt,
            n_predict: 1024,
            temperature: 0.1,
            top_k: 40,
            top_p: 0.9,
            min_p: 0.05,
            repeat_penalty: 1.1,
            stop: STOP,
            grammar: JSON_GRAMMAR,
            stream: false,
        }
    }
}

/// The part of the response we care about.
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    /// The generated text, which the grammar forces to be JSON.
    content: String,
}

/// [`Extractor`] that talks to a llama.cpp server.
#[derive(Debug)]
pub struct LlamaCppExtractor {
    client: Client,
    endpoint: String,
}

impl LlamaCppExtractor {
    /// Create an extractor for the server configured in `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.extraction_timeout {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder.build().context("failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/completion", config.base_url.trim_end_matches('/')),
        })
    }

    async fn try_extract(&self, text: &str) -> Result<ExtractionResult> {
        let prompt = build_prompt(text)?;
        let response = self
            .client
            .post(&self.endpoint)
            .json(&CompletionRequest::new(&prompt))
            .send()
            .await
            .with_context(|| format!("failed to POST to {}", self.endpoint))?;
        let status = response.status();
        debug!(%status, "Completion response");
        let response = response
            .error_for_status()
            .context("completion server returned an error")?
            .json::<CompletionResponse>()
            .await
            .context("failed to read completion response")?;
        parse_content(&response.content)
    }
}

#[async_trait]
impl Extractor for LlamaCppExtractor {
    #[instrument(level = "debug", skip_all, fields(endpoint = %self.endpoint))]
    async fn extract(&self, text: &str) -> ExtractionOutcome {
        ExtractionOutcome::from_result(self.try_extract(text).await)
    }
}

/// Parse the `content` of a completion as an extraction result.
fn parse_content(content: &str) -> Result<ExtractionResult> {
    match serde_json::from_str::<Value>(content)
        .with_context(|| format!("completion was not valid JSON: {content:?}"))?
    {
        Value::Object(fields) => Ok(fields),
        other => Err(anyhow!("expected a JSON object, found: {other}")),
    }
}
