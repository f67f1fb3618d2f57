//! Uniform contract every signing backend implements.
//!
//! The orchestrator and the webhook reconciler only ever talk to
//! [`ProviderStrategy`]; provider-specific JSON is normalized into the shapes
//! below at this boundary.

pub mod factory;
pub mod zapsign;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{CreateOptions, SignerInput};
use super::status::InternalStatus;

pub use factory::{FactoryError, ProviderFactory, ProviderKey, ProviderSettings, StrategyBuilder};
pub use zapsign::ZapSignStrategy;

/// Input to [`ProviderStrategy::create_document`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDocumentRequest {
    pub name: String,
    pub file_url: String,
    pub signers: Vec<SignerInput>,
    pub options: CreateOptions,
}

/// Signer as reported by the provider. `status` is the raw provider vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerSnapshot {
    pub name: String,
    pub email: String,
    pub token: Option<String>,
    pub sign_url: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedDocument {
    pub open_id: Option<String>,
    pub token: String,
    pub status: String,
    pub signers: Vec<SignerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub status: String,
    pub signers: Vec<SignerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerReceipt {
    pub token: Option<String>,
    pub sign_url: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    DocCreated,
    DocSigned,
    SignerSigned,
    SignerAuthenticationFailed,
    EmailBounce,
    Unknown,
}

/// Normalized webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    pub document_token: Option<String>,
    pub signer_token: Option<String>,
    pub signer_email: Option<String>,
    pub provider_status: Option<String>,
}

impl WebhookEvent {
    pub fn unknown(document_token: Option<String>) -> Self {
        Self {
            kind: WebhookEventKind::Unknown,
            document_token,
            signer_token: None,
            signer_email: None,
            provider_status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed{}: {message}", .status.map(|code| format!(" ({code})")).unwrap_or_default())]
    Request {
        status: Option<u16>,
        message: String,
    },
    #[error("provider does not know document {token}")]
    NotFound { token: String },
}

impl ProviderError {
    /// Transport failures, timeouts, and non-404 HTTP errors are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Request { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Request { status, .. } => *status,
            ProviderError::NotFound { .. } => Some(404),
        }
    }
}

#[async_trait]
pub trait ProviderStrategy: Send + Sync + Debug {
    fn code(&self) -> &str;

    async fn create_document(
        &self,
        request: &CreateDocumentRequest,
    ) -> Result<CreatedDocument, ProviderError>;

    /// Fails with [`ProviderError::NotFound`] when the provider reports the
    /// document unknown.
    async fn get_status(&self, token: &str) -> Result<DocumentSnapshot, ProviderError>;

    async fn add_signer(
        &self,
        token: &str,
        signer: &SignerInput,
    ) -> Result<SignerReceipt, ProviderError>;

    async fn cancel(&self, token: &str) -> Result<(), ProviderError>;

    /// Never fails: unrecognized payloads degrade to [`WebhookEventKind::Unknown`].
    fn parse_webhook(&self, payload: &Value) -> WebhookEvent;

    /// Total mapping of the provider's document vocabulary; unknown input is `Pending`.
    fn map_external_status(&self, provider_status: &str) -> InternalStatus;
}

/// Locates the document token in a webhook body before the owning tenant, and
/// therefore the strategy, is known.
pub fn webhook_document_token(payload: &Value) -> Option<String> {
    non_empty_str(payload.get("token"))
        .or_else(|| non_empty_str(payload.pointer("/doc/token")))
        .or_else(|| non_empty_str(payload.pointer("/document/token")))
}

pub(crate) fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(str::to_string)
}
