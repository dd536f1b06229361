//! Remote auth-method metadata: `GET {auth_url}/info`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AuthInfoError;

/// What the auth endpoint supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub supported_auth_methods: Vec<String>,
    #[serde(default)]
    pub faucet_enabled: bool,
    #[serde(default)]
    pub faucet_amount: f64,
}

impl AuthInfo {
    /// The only supported method, if there is exactly one.
    pub fn sole_method(&self) -> Option<&str> {
        match self.supported_auth_methods.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    pub fn supports(&self, method: &str) -> bool {
        self.supported_auth_methods.iter().any(|m| m == method)
    }
}

/// Client for the auth endpoint.
#[derive(Debug, Clone)]
pub struct AuthInfoClient {
    http: reqwest::Client,
}

impl AuthInfoClient {
    pub fn new(timeout: Duration) -> Result<Self, AuthInfoError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthInfoError::Request {
                url: String::new(),
                reason: format!("HTTP client init failed: {e}"),
            })?;
        Ok(Self { http })
    }

    /// Fetch `{auth_url}/info`.
    ///
    /// Network failures and non-2xx responses are errors; the caller decides
    /// whether to retry.
    pub async fn fetch(&self, auth_url: &str) -> Result<AuthInfo, AuthInfoError> {
        let base = reqwest::Url::parse(auth_url.trim())
            .map_err(|e| AuthInfoError::InvalidUrl(format!("{auth_url}: {e}")))?;
        let url = format!("{}/info", base.as_str().trim_end_matches('/'));

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthInfoError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AuthInfoError::Request {
            url: url.clone(),
            reason: format!("response read failed: {e}"),
        })?;

        if !status.is_success() {
            return Err(AuthInfoError::Status {
                status: status.as_u16(),
                body: body.trim().chars().take(512).collect(),
            });
        }

        let info: AuthInfo =
            serde_json::from_str(&body).map_err(|e| AuthInfoError::Decode(e.to_string()))?;
        tracing::debug!(
            url = %url,
            methods = ?info.supported_auth_methods,
            "fetched auth info"
        );
        Ok(info)
    }

    /// Issue a plain `GET` against `endpoint` and return the status.
    ///
    /// Only transport failures are errors; any HTTP status is handed back.
    pub async fn reachability(&self, endpoint: &str) -> Result<reqwest::StatusCode, AuthInfoError> {
        let url = reqwest::Url::parse(endpoint.trim())
            .map_err(|e| AuthInfoError::InvalidUrl(format!("{endpoint}: {e}")))?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AuthInfoError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(response.status())
    }
}
