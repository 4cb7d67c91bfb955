//! Plain-language summary of an annotated scan from a vision chat model.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use crate::config::Config;

const SUMMARY_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TOKENS: u32 = 800;
const TEMPERATURE: f64 = 0.15;

const SYSTEM_PROMPT: &str = "You are a helpful dental assistant. Analyze the annotated dental image \
provided by the user. The image shows dental X-rays or photos with annotations/detections highlighted. \
Provide a concise analysis of the detected issues, a risk assessment (low/medium/high) with reasons, \
and recommended next actions. Reply in plain text, organized into sections: Summary:, Risk:, Actions:.";

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("OPENAI_API_KEY not set; skipping AI summary")]
    MissingApiKey,
    #[error("OpenAI API error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("No assistant content returned")]
    EmptyContent,
    #[error("AI summarization failed: {0}")]
    Request(String),
}

pub struct Summarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    api_url: String,
}

impl Summarizer {
    pub fn from_config(http: reqwest::Client, config: &Config) -> Result<Self, SummaryError> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or(SummaryError::MissingApiKey)?;
        Ok(Self {
            http,
            api_key,
            model: config.openai_model.clone(),
            api_url: config.openai_api_url.clone(),
        })
    }

    /// Describe the annotated image, taking the patient's own concern into account.
    pub async fn summarize(&self, image: &[u8], image_path: &Path, concern: &str) -> Result<String, SummaryError> {
        tracing::info!("requesting AI summary via {}", self.model);
        let body = request_body(&self.model, image, image_path, concern);

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .timeout(SUMMARY_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| SummaryError::Request(truncate(&e.to_string(), 300)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SummaryError::Upstream {
                status: status.as_u16(),
                body: truncate(&text, 400),
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| SummaryError::Request(truncate(&e.to_string(), 300)))?;
        assistant_text(&json).ok_or(SummaryError::EmptyContent)
    }
}

fn request_body(model: &str, image: &[u8], image_path: &Path, concern: &str) -> Value {
    let mime = image_mime(image, image_path);

    let concern = concern.trim();
    let prompt = if concern.is_empty() {
        "Please analyze this annotated dental image\n\nNo additional concerns provided by the patient."
            .to_string()
    } else {
        format!(
            "Please analyze this annotated dental image\n\nPatient's additional concerns: {}",
            concern
        )
    };

    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            {
                "role": "user",
                "content": [
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", mime, STANDARD.encode(image)),
                            "detail": "high"
                        }
                    },
                    { "type": "text", "text": prompt }
                ]
            }
        ],
        "max_tokens": MAX_TOKENS,
        "temperature": TEMPERATURE,
    })
}

/// MIME type sniffed from the bytes, falling back to the file extension.
fn image_mime(image: &[u8], image_path: &Path) -> &'static str {
    if let Ok(format) = image::guess_format(image) {
        return format.to_mime_type();
    }
    match image_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

/// `choices[0].message.content`, trimmed; `None` when missing or blank.
fn assistant_text(response: &Value) -> Option<String> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_embeds_image_and_concern() {
        let body = request_body("gpt-4o-mini", &[1, 2, 3], Path::new("out/output.JPG"), "  sore molar ");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["messages"][0]["role"], "system");

        let content = &body["messages"][1]["content"];
        assert_eq!(content[0]["image_url"]["url"], "data:image/jpeg;base64,AQID");
        assert_eq!(content[0]["image_url"]["detail"], "high");
        assert_eq!(
            content[1]["text"],
            "Please analyze this annotated dental image\n\nPatient's additional concerns: sore molar"
        );
    }

    #[test]
    fn body_notes_missing_concern_and_defaults_to_png() {
        let body = request_body("m", &[0], Path::new("output"), "");
        let content = &body["messages"][1]["content"];
        assert!(content[0]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert!(content[1]["text"]
            .as_str()
            .unwrap()
            .ends_with("No additional concerns provided by the patient."));
    }

    #[test]
    fn sniffed_format_wins_over_extension() {
        let png_header = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        let body = request_body("m", png_header, Path::new("output.jpg"), "");
        let url = body["messages"][1]["content"][0]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(image_mime(b"\xFF\xD8\xFF\xE0", Path::new("output.png")), "image/jpeg");
    }

    #[test]
    fn assistant_text_is_trimmed() {
        let response = json!({"choices": [{"message": {"content": "  Summary: ok\n"}}]});
        assert_eq!(assistant_text(&response).as_deref(), Some("Summary: ok"));
    }

    #[test]
    fn blank_or_missing_content_is_none() {
        assert!(assistant_text(&json!({"choices": [{"message": {"content": "   "}}]})).is_none());
        assert!(assistant_text(&json!({"choices": []})).is_none());
        assert!(assistant_text(&json!({"error": "nope"})).is_none());
    }

    #[test]
    fn missing_key_explains_skip() {
        let err = Summarizer::from_config(reqwest::Client::new(), &Config::default()).err().unwrap();
        assert_eq!(err.to_string(), "OPENAI_API_KEY not set; skipping AI summary");
    }
}
