//! MyScript cloud batch recognition over HTTP.
//!
//! Each request body is signed with HMAC-SHA512, keyed by the application
//! key followed by the HMAC key. The lowercase hex digest goes in the `hmac`
//! header next to `applicationKey`.
//!
//! Keys are read from `RMAPI_HWR_APPLICATIONKEY` and `RMAPI_HWR_HMAC` by
//! [`MyScriptBackend::from_env`], or passed in directly.

use crate::error::InkError;
use crate::pipeline::recognize::{BatchRequest, RecognitionBackend};
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use sha2::Sha512;
use std::fmt;
use tracing::debug;

/// Batch endpoint of the MyScript cloud service.
pub const DEFAULT_ENDPOINT: &str = "https://cloud.myscript.com/api/v4.0/iink/batch";
pub const APPLICATION_KEY_ENV: &str = "RMAPI_HWR_APPLICATIONKEY";
pub const HMAC_KEY_ENV: &str = "RMAPI_HWR_HMAC";

/// [`RecognitionBackend`] that posts batch requests to MyScript.
#[derive(Clone)]
pub struct MyScriptBackend {
    client: reqwest::Client,
    endpoint: String,
    application_key: String,
    hmac_key: String,
}

impl fmt::Debug for MyScriptBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MyScriptBackend")
            .field("endpoint", &self.endpoint)
            .field("application_key", &"<redacted>")
            .field("hmac_key", &"<redacted>")
            .finish()
    }
}

impl MyScriptBackend {
    pub fn new(
        application_key: impl Into<String>,
        hmac_key: impl Into<String>,
    ) -> Result<Self, InkError> {
        let application_key = application_key.into();
        let hmac_key = hmac_key.into();
        if application_key.trim().is_empty() || hmac_key.trim().is_empty() {
            return Err(InkError::InvalidConfig(
                "MyScript application key and HMAC key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| InkError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            application_key,
            hmac_key,
        })
    }

    /// Point at a different batch endpoint, e.g. a regional deployment.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Build a backend when both keys are present.
    ///
    /// `Ok(None)` when neither key is set; an error when only one is.
    pub fn from_keys(
        application_key: Option<String>,
        hmac_key: Option<String>,
    ) -> Result<Option<Self>, InkError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        match (non_empty(application_key), non_empty(hmac_key)) {
            (Some(app), Some(hmac)) => Self::new(app, hmac).map(Some),
            (None, None) => Ok(None),
            _ => Err(InkError::InvalidConfig(format!(
                "MyScript recognition needs both {APPLICATION_KEY_ENV} and {HMAC_KEY_ENV}"
            ))),
        }
    }

    /// [`from_keys`](Self::from_keys) with the keys taken from the environment.
    pub fn from_env() -> Result<Option<Self>, InkError> {
        Self::from_keys(
            std::env::var(APPLICATION_KEY_ENV).ok(),
            std::env::var(HMAC_KEY_ENV).ok(),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, body: Vec<u8>, accept: &str) -> Result<Vec<u8>, String> {
        let signature = sign(&self.application_key, &self.hmac_key, &body)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, format!("{accept}, application/json"))
            .header(CONTENT_TYPE, "application/json")
            .header("applicationKey", &self.application_key)
            .header("hmac", signature)
            .body(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(format!(
                "HTTP {}: {}",
                status,
                String::from_utf8_lossy(&bytes).trim()
            ));
        }
        debug!("MyScript replied {} with {} bytes", status, bytes.len());
        Ok(bytes.to_vec())
    }
}

impl RecognitionBackend for MyScriptBackend {
    fn recognize<'a>(
        &'a self,
        request: &'a BatchRequest,
        accept: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, String>> {
        Box::pin(async move {
            let body = serde_json::to_vec(request)
                .map_err(|e| format!("failed to serialise request: {e}"))?;
            self.post(body, accept).await
        })
    }
}

/// Lowercase hex HMAC-SHA512 of `body`, keyed by both keys concatenated.
pub fn sign(application_key: &str, hmac_key: &str, body: &[u8]) -> Result<String, String> {
    let key = format!("{application_key}{hmac_key}");
    let mut mac = Hmac::<Sha512>::new_from_slice(key.as_bytes()).map_err(|e| e.to_string())?;
    mac.update(body);
    Ok(format!("{:x}", mac.finalize().into_bytes()))
}
