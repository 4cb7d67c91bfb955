use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use crate::config::Config;

const REDACTED: &str = "<REDACTED_API_KEY>";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("ROBOFLOW_API_KEY is not configured")]
    MissingApiKey,
    #[error("Workflow invocation failed: {0}")]
    Request(String),
    #[error("Workflow returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("Workflow returned an unreadable body: {0}")]
    InvalidBody(String),
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Client for a hosted Roboflow workflow that annotates dental photos.
pub struct DetectionClient {
    http: reqwest::Client,
    api_key: String,
    api_url: String,
    workspace: String,
    workflow_id: String,
}

impl DetectionClient {
    pub fn from_config(http: reqwest::Client, config: &Config) -> Result<Self, DetectionError> {
        let api_key = config
            .roboflow_api_key
            .clone()
            .ok_or(DetectionError::MissingApiKey)?;
        Ok(Self {
            http,
            api_key,
            api_url: config.roboflow_api_url.clone(),
            workspace: config.roboflow_workspace.clone(),
            workflow_id: config.roboflow_workflow_id.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/{}/workflows/{}", self.api_url, self.workspace, self.workflow_id)
    }

    fn request_body(&self, image: &[u8]) -> Value {
        json!({
            "api_key": self.api_key,
            "inputs": {
                "image": { "type": "base64", "value": STANDARD.encode(image) }
            },
            // Lets the service cache the workflow definition between calls.
            "use_cache": true,
        })
    }

    /// Never let the API key leak into logs or HTTP responses.
    fn redact(&self, message: String) -> String {
        message.replace(&self.api_key, REDACTED)
    }

    /// Run the workflow on one image and return its raw JSON result.
    pub async fn run_workflow(&self, image: &[u8], timeout: Duration) -> Result<Value, DetectionError> {
        tracing::info!(
            "running workflow {}/{} on {} bytes",
            self.workspace,
            self.workflow_id,
            image.len()
        );

        let response = self
            .http
            .post(self.endpoint())
            .timeout(timeout)
            .json(&self.request_body(image))
            .send()
            .await
            .map_err(|e| DetectionError::Request(self.redact(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = self.redact(body).chars().take(500).collect();
            return Err(DetectionError::Upstream { status: status.as_u16(), body });
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| DetectionError::InvalidBody(self.redact(e.to_string())))?;
        log_result_shape(&result);
        Ok(result)
    }
}

/// Short summary of the result so large image payloads stay out of the log.
fn log_result_shape(result: &Value) {
    match result {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            tracing::info!("workflow result keys: {:?}", keys);
        }
        Value::Array(items) => {
            tracing::info!("workflow result is a list with {} items", items.len());
        }
        other => {
            let preview: String = other.to_string().chars().take(200).collect();
            tracing::info!("workflow result preview: {}", preview);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DetectionClient {
        let config = Config {
            roboflow_api_key: Some("rf_secret".to_string()),
            roboflow_api_url: "https://detect.example".to_string(),
            ..Config::default()
        };
        DetectionClient::from_config(reqwest::Client::new(), &config).unwrap()
    }

    #[test]
    fn missing_key_is_rejected() {
        let result = DetectionClient::from_config(reqwest::Client::new(), &Config::default());
        assert!(matches!(result, Err(DetectionError::MissingApiKey)));
    }

    #[test]
    fn endpoint_names_workspace_and_workflow() {
        assert_eq!(
            client().endpoint(),
            "https://detect.example/dentalissuedetectorhackgt12/workflows/small-object-detection-sahi"
        );
    }

    #[test]
    fn request_body_carries_base64_image() {
        let body = client().request_body(b"\x89PNG");
        assert_eq!(body["api_key"], "rf_secret");
        assert_eq!(body["inputs"]["image"]["type"], "base64");
        assert_eq!(body["inputs"]["image"]["value"], "iVBORw==");
        assert_eq!(body["use_cache"], true);
    }

    #[test]
    fn api_key_is_redacted() {
        let msg = client().redact("error for https://x/?api_key=rf_secret".to_string());
        assert_eq!(msg, "error for https://x/?api_key=<REDACTED_API_KEY>");
    }
}
