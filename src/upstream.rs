//! Generative upstream client
//!
//! Thin typed client for the external text/vision completion service. The
//! service is treated as a black box: one request, one plain-text reply, no
//! retries. Context travels as role-tagged parts, images as inline base64.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::context::OutwardMessage;
use crate::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default generation parameters
const TEMPERATURE: f64 = 0.9;
const TOP_P: f64 = 0.95;
const TOP_K: u32 = 40;
const MAX_OUTPUT_TOKENS: u32 = 2048;

/// Client for the generative completion API
#[derive(Debug)]
pub struct GenerativeClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

/// Generation request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

/// A role-tagged content entry
#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

/// Content part: text or inline image data
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData<'a>>,
}

impl<'a> Part<'a> {
    const fn text(text: &'a str) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    const fn image(mime_type: &'a str, data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData { mime_type, data }),
        }
    }
}

/// Inline base64 image payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

/// Sampling configuration sent with every request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_p: f64,
    top_k: u32,
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: TEMPERATURE,
            top_p: TOP_P,
            top_k: TOP_K,
            max_output_tokens: MAX_OUTPUT_TOKENS,
        }
    }
}

/// Generation response
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerativeClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "generative API key required (set GEMINI_API_KEY)".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Override the API base URL (self-hosted proxies, tests)
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Model identifier used for completions
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a text reply from shaped context plus the current prompt
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if the service errors or returns no text
    pub async fn generate(&self, context: &[OutwardMessage], prompt: &str) -> Result<String> {
        let mut contents: Vec<Content<'_>> = context
            .iter()
            .map(|m| Content {
                role: m.role,
                parts: vec![Part::text(&m.text)],
            })
            .collect();
        contents.push(Content {
            role: "user",
            parts: vec![Part::text(prompt)],
        });

        self.send(contents).await
    }

    /// Generate a reply for an image plus the analysis prompt
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if the service errors or returns no text
    pub async fn generate_vision(
        &self,
        image: &[u8],
        media_type: &str,
        prompt: &str,
    ) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let contents = vec![Content {
            role: "user",
            parts: vec![Part::text(prompt), Part::image(media_type, encoded)],
        }];

        self.send(contents).await
    }

    async fn send(&self, contents: Vec<Content<'_>>) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = GenerateRequest {
            contents,
            generation_config: GenerationConfig::default(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "generative API error");
            return Err(Error::Upstream(format!("API error {status}")));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("parse error: {e}")))?;

        let text = extract_text(result);
        if text.is_empty() {
            return Err(Error::Upstream("empty response from generative API".to_string()));
        }

        Ok(text)
    }
}

/// Normalize the structured reply into a single plain-text response
fn extract_text(response: GenerateResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_joins_candidate_parts() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello" }, { "text": ", world" }] }
            }]
        }))
        .unwrap();

        assert_eq!(extract_text(response), "Hello, world");
    }

    #[test]
    fn extract_text_empty_candidates_yields_empty() {
        let response: GenerateResponse =
            serde_json::from_value(serde_json::json!({ "candidates": [] })).unwrap();
        assert_eq!(extract_text(response), "");
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let err = GenerativeClient::new(String::new(), "model-x".to_string()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn request_serializes_camel_case_wire_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part::text("hi"), Part::image("image/png", "QUJD".to_string())],
            }],
            generation_config: GenerationConfig::default(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
        // Text parts must not carry a null inlineData field
        assert!(json["contents"][0]["parts"][0].get("inlineData").is_none());
    }
}
