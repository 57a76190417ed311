use serde::Deserialize;

/// Body of `POST /api/tokens`.
#[allow(dead_code)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub available_data_sources: Vec<String>,
}

/// Error payload returned alongside non-2xx statuses.
///
/// `code` is numeric on some deployments and textual on others.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    pub fn code_string(&self) -> Option<String> {
        match self.code.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(code) if code.is_empty() => None,
            serde_json::Value::String(code) => Some(code.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn detail(&self) -> Option<&str> {
        self.message
            .as_deref()
            .filter(|message| !message.is_empty())
            .or_else(|| self.error.as_deref().filter(|error| !error.is_empty()))
    }
}
