//! External push gateway
//!
//! Best-effort out-of-band delivery for teachers without a live stream.
//! The gateway is opaque: a send either comes back with a provider message
//! id or a [`PushError`], and callers turn errors into failed outcomes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;

mod fcm;

pub use fcm::{FcmGateway, ServiceAccount};

/// Delivery urgency hint passed through to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushPriority {
    #[default]
    Normal,
    High,
}

/// One push notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    /// Auxiliary payload; providers only accept string values
    pub data: BTreeMap<String, String>,
    pub priority: PushPriority,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("Push gateway not configured")]
    NotConfigured,
    #[error("Push token rejected: {0}")]
    InvalidToken(String),
    #[error("Push provider authentication failed: {0}")]
    Auth(String),
    #[error("Push provider returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Push transport error: {0}")]
    Transport(String),
}

impl PushError {
    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            PushError::Transport(_) => true,
            PushError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for PushError {
    fn from(err: reqwest::Error) -> Self {
        PushError::Transport(err.to_string())
    }
}

/// Out-of-band notification channel
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Send a notification, returning the provider's message id
    async fn send(&self, message: &PushMessage) -> Result<String, PushError>;

    /// Check a token with the provider without delivering anything
    async fn validate_token(&self, token: &str) -> Result<(), PushError>;
}

/// Gateway used when no provider credentials are configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPushGateway;

#[async_trait]
impl PushGateway for DisabledPushGateway {
    async fn send(&self, _message: &PushMessage) -> Result<String, PushError> {
        Err(PushError::NotConfigured)
    }

    async fn validate_token(&self, _token: &str) -> Result<(), PushError> {
        Err(PushError::NotConfigured)
    }
}

/// Build the gateway described by the configuration
pub async fn from_config(config: &Config) -> Result<Arc<dyn PushGateway>, PushError> {
    match &config.firebase_service_account_path {
        Some(path) => {
            let account = ServiceAccount::from_file(path).await?;
            tracing::info!(project_id = %account.project_id, "FCM push gateway enabled");
            Ok(Arc::new(FcmGateway::new(account, config.fcm_api_base.clone())))
        }
        None => {
            tracing::warn!("FIREBASE_SERVICE_ACCOUNT_PATH not set, push notifications disabled");
            Ok(Arc::new(DisabledPushGateway))
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording gateway for dispatcher and scheduler tests

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[derive(Default)]
    pub struct RecordingPushGateway {
        pub sent: Mutex<Vec<PushMessage>>,
        pub validated: Mutex<Vec<String>>,
        /// Tokens for which every call fails
        pub rejected_tokens: Mutex<HashSet<String>>,
    }

    impl RecordingPushGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reject(&self, token: &str) {
            self.rejected_tokens.lock().insert(token.to_string());
        }

        pub fn sent(&self) -> Vec<PushMessage> {
            self.sent.lock().clone()
        }

        pub fn validated(&self) -> Vec<String> {
            self.validated.lock().clone()
        }
    }

    #[async_trait]
    impl PushGateway for RecordingPushGateway {
        async fn send(&self, message: &PushMessage) -> Result<String, PushError> {
            if self.rejected_tokens.lock().contains(&message.token) {
                return Err(PushError::InvalidToken(message.token.clone()));
            }
            let mut sent = self.sent.lock();
            sent.push(message.clone());
            Ok(format!("msg-{}", sent.len()))
        }

        async fn validate_token(&self, token: &str) -> Result<(), PushError> {
            self.validated.lock().push(token.to_string());
            if self.rejected_tokens.lock().contains(token) {
                return Err(PushError::InvalidToken(token.to_string()));
            }
            Ok(())
        }
    }
}
