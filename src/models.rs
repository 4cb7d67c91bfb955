use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TermsForm {
    #[serde(rename = "acceptTerms")]
    pub accept_terms: Option<String>,
    #[serde(rename = "medicalDisclaimer")]
    pub medical_disclaimer: Option<String>,
}

impl TermsForm {
    /// Both checkboxes must be ticked.
    pub fn is_complete(&self) -> bool {
        let ticked = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        ticked(&self.accept_terms) && ticked(&self.medical_disclaimer)
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub result_url: String,
    pub uploaded_filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_summary_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub terms_accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_need_both_boxes() {
        let form = |a: Option<&str>, m: Option<&str>| TermsForm {
            accept_terms: a.map(str::to_string),
            medical_disclaimer: m.map(str::to_string),
        };
        assert!(form(Some("on"), Some("on")).is_complete());
        assert!(!form(Some("on"), None).is_complete());
        assert!(!form(None, Some("on")).is_complete());
        assert!(!form(Some(""), Some("on")).is_complete());
    }

    #[test]
    fn upload_response_omits_absent_summary_fields() {
        let response = UploadResponse {
            success: true,
            result_url: "/result".to_string(),
            uploaded_filename: "teeth.jpg".to_string(),
            ai_summary: None,
            ai_summary_error: Some("OPENAI_API_KEY not set; skipping AI summary".to_string()),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("ai_summary").is_none());
        assert_eq!(json["ai_summary_error"], "OPENAI_API_KEY not set; skipping AI summary");
        assert_eq!(json["result_url"], "/result");
    }
}
