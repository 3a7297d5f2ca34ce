//! Firebase Cloud Messaging (HTTP v1) push gateway
//!
//! Authenticates with a Google service account: an RS256-signed assertion
//! is exchanged at the account's token endpoint for a short-lived access
//! token, which is cached until shortly before it expires.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{PushError, PushGateway, PushMessage, PushPriority};

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// Cap on the access token lifetime the token endpoint may claim
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(ASSERTION_LIFETIME_SECS as u64);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry configuration for transient provider errors
const MAX_RETRIES: usize = 2;
const RETRY_BASE_DELAY_MS: u64 = 100;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

/// The fields of a Google service-account key file that FCM needs
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccount {
    /// Load a service-account key file
    pub async fn from_file(path: &str) -> Result<Self, PushError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PushError::Auth(format!("cannot read service account {}: {}", path, e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, PushError> {
        serde_json::from_str(raw).map_err(|e| PushError::Auth(format!("invalid service account: {}", e)))
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct SendResponse {
    name: String,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// FCM HTTP v1 client
pub struct FcmGateway {
    account: ServiceAccount,
    api_base: String,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl FcmGateway {
    pub fn new(account: ServiceAccount, api_base: String) -> Self {
        let client = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build FCM HTTP client, falling back to defaults without request timeout");
                reqwest::Client::new()
            }
        };

        Self {
            account,
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
            token: Mutex::new(None),
        }
    }

    fn send_url(&self) -> String {
        format!("{}/v1/projects/{}/messages:send", self.api_base, self.account.project_id)
    }

    /// Current access token, refreshed when missing or about to expire
    async fn access_token(&self) -> Result<String, PushError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch_access_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    async fn fetch_access_token(&self) -> Result<CachedToken, PushError> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let claims = AssertionClaims {
            iss: &self.account.client_email,
            scope: FCM_SCOPE,
            aud: &self.account.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.account.private_key_id.clone();

        let key = EncodingKey::from_rsa_pem(self.account.private_key.as_bytes())
            .map_err(|e| PushError::Auth(format!("invalid private key: {}", e)))?;
        let assertion = jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| PushError::Auth(format!("cannot sign assertion: {}", e)))?;

        let response = self
            .client
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "FCM access token request failed");
            return Err(PushError::Auth(format!("token endpoint returned {}", status)));
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = token.expires_in, "Fetched FCM access token");

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: token_expiry(Instant::now(), token.expires_in),
        })
    }

    /// POST one request body to the send endpoint, retrying transient failures
    async fn post_message(&self, body: &Value) -> Result<String, PushError> {
        use tokio_retry::strategy::{jitter, ExponentialBackoff};
        use tokio_retry::Retry;

        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        Retry::spawn(retry_strategy, || async {
            let result = self.post_once(body).await;

            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "Transient FCM error - will retry");
                    Err(result)
                }
                Err(_) => Ok(result),
            }
        })
        .await
        .unwrap_or_else(|e| e)
    }

    async fn post_once(&self, body: &Value) -> Result<String, PushError> {
        let access_token = self.access_token().await?;

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let sent: SendResponse = response.json().await?;
            return Ok(sent.name);
        }

        let text = response.text().await.unwrap_or_default();
        let error = classify_error(status.as_u16(), text);
        if matches!(error, PushError::Auth(_)) {
            // Force a fresh token on the next call.
            *self.token.lock().await = None;
        }
        Err(error)
    }
}

/// Map a non-2xx FCM response onto a push error
fn classify_error(status: u16, body: String) -> PushError {
    let token_problem = body.contains("UNREGISTERED")
        || body.contains("SENDER_ID_MISMATCH")
        || body.contains("INVALID_ARGUMENT");

    match status {
        404 => PushError::InvalidToken(body),
        400 | 403 if token_problem => PushError::InvalidToken(body),
        401 | 403 => PushError::Auth(body),
        _ => PushError::Rejected { status, body },
    }
}

fn message_body(message: &PushMessage) -> Value {
    let (android_priority, apns_priority) = match message.priority {
        PushPriority::High => ("high", "10"),
        PushPriority::Normal => ("normal", "5"),
    };

    json!({
        "message": {
            "token": message.token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
            "android": { "priority": android_priority },
            "apns": { "headers": { "apns-priority": apns_priority } },
        }
    })
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send(&self, message: &PushMessage) -> Result<String, PushError> {
        let message_id = self.post_message(&message_body(message)).await?;
        tracing::info!(message_id = %message_id, "Push notification sent");
        Ok(message_id)
    }

    async fn validate_token(&self, token: &str) -> Result<(), PushError> {
        let body = json!({
            "validate_only": true,
            "message": { "token": token },
        });
        self.post_message(&body).await.map(|_| ())
    }
}

/// When a token issued at `now` stops being usable
fn token_expiry(now: Instant, expires_in: u64) -> Instant {
    let lifetime = Duration::from_secs(expires_in).min(MAX_TOKEN_LIFETIME);
    now.checked_add(lifetime).unwrap_or(now)
}
