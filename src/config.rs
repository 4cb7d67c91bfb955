use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local-development file holding API keys.
pub const ENV_FILE: &str = ".env";

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Directory where uploaded photos and their side files are kept
    pub upload_dir: PathBuf,
    /// Where the annotated image is written
    pub output_path: PathBuf,

    // Roboflow workflow
    pub roboflow_api_key: Option<String>,
    pub roboflow_api_url: String,
    pub roboflow_workspace: String,
    pub roboflow_workflow_id: String,
    /// Upper bound for detection plus extraction
    pub detection_timeout: Duration,

    // OpenAI summary
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_api_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            upload_dir: PathBuf::from("uploads"),
            output_path: PathBuf::from("output.jpg"),
            roboflow_api_key: None,
            roboflow_api_url: "https://serverless.roboflow.com".to_string(),
            roboflow_workspace: "dentalissuedetectorhackgt12".to_string(),
            roboflow_workflow_id: "small-object-detection-sahi".to_string(),
            detection_timeout: Duration::from_secs(120),
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_api_url: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_env_and_file(Path::new(ENV_FILE))
    }

    /// Process environment first; `env_file` fills keys that are unset or blank.
    pub fn from_env_and_file(env_file: &Path) -> Self {
        let file_vars = read_env_file(env_file);
        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Self {
            bind_address: get("DENTAL_SCAN_BIND").unwrap_or(defaults.bind_address),
            upload_dir: get("DENTAL_SCAN_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            output_path: get("DENTAL_SCAN_OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_path),
            roboflow_api_key: get("ROBOFLOW_API_KEY"),
            roboflow_api_url: get("ROBOFLOW_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.roboflow_api_url),
            roboflow_workspace: get("ROBOFLOW_WORKSPACE").unwrap_or(defaults.roboflow_workspace),
            roboflow_workflow_id: get("ROBOFLOW_WORKFLOW_ID")
                .unwrap_or(defaults.roboflow_workflow_id),
            detection_timeout: get("DETECTION_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.detection_timeout),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_API_MODEL").unwrap_or(defaults.openai_model),
            openai_api_url: get("OPENAI_API_URL").unwrap_or(defaults.openai_api_url),
        }
    }
}

fn read_env_file(path: &Path) -> HashMap<String, String> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => {
            let vars: HashMap<String, String> = iter
                .filter_map(|item| match item {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        tracing::warn!("skipping malformed line in {}: {}", path.display(), e);
                        None
                    }
                })
                .collect();
            tracing::info!("loaded {} variables from {}", vars.len(), path.display());
            vars
        }
        Err(e) if e.not_found() => {
            tracing::info!("no {} file found; using process environment only", path.display());
            HashMap::new()
        }
        Err(e) => {
            tracing::warn!("could not read {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_environment_gives_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.bind_address, "0.0.0.0:8000");
        assert_eq!(config.output_path, PathBuf::from("output.jpg"));
        assert_eq!(config.detection_timeout, Duration::from_secs(120));
        assert!(config.roboflow_api_key.is_none());
        assert_eq!(config.openai_model, "gpt-4o-mini");
    }

    #[test]
    fn values_are_trimmed_and_unquoted() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", " \"sk-test\" "),
            ("ROBOFLOW_API_KEY", "   "),
            ("ROBOFLOW_API_URL", "http://localhost:9001/"),
            ("DETECTION_TIMEOUT_SECS", "15"),
            ("DENTAL_SCAN_OUTPUT_PATH", "/tmp/annotated.png"),
        ]);
        let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert!(config.roboflow_api_key.is_none());
        assert_eq!(config.roboflow_api_url, "http://localhost:9001");
        assert_eq!(config.detection_timeout, Duration::from_secs(15));
        assert_eq!(config.output_path, PathBuf::from("/tmp/annotated.png"));
    }

    #[test]
    fn unparsable_timeout_falls_back() {
        let config = Config::from_lookup(|k| (k == "DETECTION_TIMEOUT_SECS").then(|| "soon".to_string()));
        assert_eq!(config.detection_timeout, Duration::from_secs(120));
    }

    #[test]
    fn env_file_supplies_unset_keys() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(
            &env_file,
            "# local keys\nDENTAL_SCAN_UPLOAD_DIR=\"/srv/scans\"\nDETECTION_TIMEOUT_SECS=45\n",
        )
        .unwrap();

        let config = Config::from_env_and_file(&env_file);
        assert_eq!(config.upload_dir, PathBuf::from("/srv/scans"));
        assert_eq!(config.detection_timeout, Duration::from_secs(45));
    }

    #[test]
    fn missing_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_env_and_file(&dir.path().join(".env"));
        assert_eq!(config.roboflow_workspace, "dentalissuedetectorhackgt12");
    }
}
