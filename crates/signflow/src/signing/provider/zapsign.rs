//! ZapSign REST strategy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use super::factory::FactoryError;
use super::{
    non_empty_str, webhook_document_token, CreateDocumentRequest, CreatedDocument,
    DocumentSnapshot, ProviderError, ProviderStrategy, SignerReceipt, SignerSnapshot,
    WebhookEvent, WebhookEventKind,
};
use crate::signing::domain::SignerInput;
use crate::signing::status::InternalStatus;

const ERROR_BODY_LIMIT: usize = 500;

pub struct ZapSignStrategy {
    client: Client,
    api_token: String,
    base_url: String,
}

impl ZapSignStrategy {
    pub const CODE: &'static str = "zapsign";

    pub fn new(api_token: &str, base_url: &str, timeout: Duration) -> Result<Self, FactoryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FactoryError::Client(err.to_string()))?;

        Ok(Self {
            client,
            api_token: api_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.api_token)
    }

    /// Sends the request, mapping 404 to `NotFound` and everything else that
    /// is not a success to `Request`.
    async fn send(
        &self,
        operation: &'static str,
        token: Option<&str>,
        builder: RequestBuilder,
    ) -> Result<Value, ProviderError> {
        let response = self.authorized(builder).send().await.map_err(|err| {
            error!(operation, error = %err, "zapsign transport failure");
            ProviderError::Request {
                status: err.status().map(|status| status.as_u16()),
                message: err.to_string(),
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            if let Some(token) = token {
                return Err(ProviderError::NotFound {
                    token: token.to_string(),
                });
            }
        }

        let body = response.text().await.map_err(|err| ProviderError::Request {
            status: Some(status.as_u16()),
            message: err.to_string(),
        })?;

        if !status.is_success() {
            let detail: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            error!(operation, status = status.as_u16(), %detail, "zapsign rejected request");
            return Err(ProviderError::Request {
                status: Some(status.as_u16()),
                message: detail,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|err| ProviderError::Request {
            status: Some(status.as_u16()),
            message: format!("invalid response body: {err}"),
        })
    }
}

impl std::fmt::Debug for ZapSignStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZapSignStrategy")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct CreatePayload<'a> {
    name: &'a str,
    url_pdf: &'a str,
    signers: &'a [SignerInput],
    #[serde(skip_serializing_if = "Option::is_none")]
    date_limit_to_sign: Option<String>,
    #[serde(flatten)]
    extras: &'a crate::signing::domain::ZapSignOptions,
}

#[derive(Debug, Deserialize)]
struct DocumentBody {
    #[serde(default)]
    open_id: Option<Value>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    signers: Vec<SignerBody>,
}

#[derive(Debug, Deserialize)]
struct SignerBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    sign_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl From<SignerBody> for SignerSnapshot {
    fn from(body: SignerBody) -> Self {
        SignerSnapshot {
            name: body.name.unwrap_or_default(),
            email: body.email.unwrap_or_default(),
            token: body.token.filter(|token| !token.is_empty()),
            sign_url: body.sign_url.filter(|url| !url.is_empty()),
            status: body.status.unwrap_or_else(|| "new".to_string()),
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|err| ProviderError::Request {
        status: None,
        message: format!("unexpected response shape: {err}"),
    })
}

fn open_id_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(raw) if !raw.is_empty() => Some(raw),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[async_trait]
impl ProviderStrategy for ZapSignStrategy {
    fn code(&self) -> &str {
        Self::CODE
    }

    async fn create_document(
        &self,
        request: &CreateDocumentRequest,
    ) -> Result<CreatedDocument, ProviderError> {
        let payload = CreatePayload {
            name: &request.name,
            url_pdf: &request.file_url,
            signers: &request.signers,
            date_limit_to_sign: request
                .options
                .date_limit_to_sign
                .map(|limit| limit.to_rfc3339()),
            extras: &request.options.zapsign,
        };

        let value = self
            .send(
                "create_document",
                None,
                self.client.post(self.url("/api/v1/docs/")).json(&payload),
            )
            .await?;
        let body: DocumentBody = decode(value)?;

        let token = body.token.filter(|token| !token.is_empty()).ok_or_else(|| {
            ProviderError::Request {
                status: None,
                message: "create response did not include a document token".to_string(),
            }
        })?;

        Ok(CreatedDocument {
            open_id: open_id_string(body.open_id),
            token,
            status: body.status.unwrap_or_else(|| "pending".to_string()),
            signers: body.signers.into_iter().map(SignerSnapshot::from).collect(),
        })
    }

    async fn get_status(&self, token: &str) -> Result<DocumentSnapshot, ProviderError> {
        let value = self
            .send(
                "get_status",
                Some(token),
                self.client
                    .get(self.url(&format!("/api/v1/documents/{token}/"))),
            )
            .await?;
        let body: DocumentBody = decode(value)?;

        Ok(DocumentSnapshot {
            status: body.status.unwrap_or_else(|| "pending".to_string()),
            signers: body.signers.into_iter().map(SignerSnapshot::from).collect(),
        })
    }

    async fn add_signer(
        &self,
        token: &str,
        signer: &SignerInput,
    ) -> Result<SignerReceipt, ProviderError> {
        let value = self
            .send(
                "add_signer",
                Some(token),
                self.client
                    .post(self.url(&format!("/api/v1/documents/{token}/signers")))
                    .json(signer),
            )
            .await?;
        let body: SignerBody = decode(value)?;

        Ok(SignerReceipt {
            token: body.token.filter(|token| !token.is_empty()),
            sign_url: body.sign_url.filter(|url| !url.is_empty()),
            status: body.status.unwrap_or_else(|| "new".to_string()),
        })
    }

    async fn cancel(&self, token: &str) -> Result<(), ProviderError> {
        self.send(
            "cancel",
            Some(token),
            self.client
                .post(self.url(&format!("/api/v1/documents/{token}/cancel/"))),
        )
        .await
        .map(|_| ())
    }

    fn parse_webhook(&self, payload: &Value) -> WebhookEvent {
        let document_token = webhook_document_token(payload);
        let event = non_empty_str(payload.get("event_type"))
            .or_else(|| non_empty_str(payload.get("event")))
            .map(|raw| raw.to_ascii_lowercase());

        let Some(event) = event else {
            return WebhookEvent::unknown(document_token);
        };

        let provider_status = non_empty_str(payload.get("status"))
            .or_else(|| non_empty_str(payload.pointer("/doc/status")));

        let (kind, signer) = match event.as_str() {
            "doc_created" => (WebhookEventKind::DocCreated, None),
            "doc_signed" => (WebhookEventKind::DocSigned, None),
            "signer_signed" => (WebhookEventKind::SignerSigned, payload.get("signer")),
            "signer_authentication_failed" | "signer_auth_failed" | "authentication_failed" => (
                WebhookEventKind::SignerAuthenticationFailed,
                payload
                    .get("unauthenticated_signer")
                    .filter(|value| value.is_object())
                    .or_else(|| payload.get("signer")),
            ),
            "email_bounce" => (WebhookEventKind::EmailBounce, payload.get("signer")),
            _ => return WebhookEvent::unknown(document_token),
        };

        let signer_token = signer.and_then(|value| non_empty_str(value.get("token")));
        let signer_email = signer
            .and_then(|value| non_empty_str(value.get("email")))
            .or_else(|| non_empty_str(payload.get("email")));

        WebhookEvent {
            kind,
            document_token,
            signer_token,
            signer_email,
            provider_status,
        }
    }

    fn map_external_status(&self, provider_status: &str) -> InternalStatus {
        match provider_status.trim().to_ascii_lowercase().as_str() {
            "pending" => InternalStatus::Pending,
            "signed" => InternalStatus::Signed,
            "cancelled" => InternalStatus::Cancelled,
            "rejected" | "refused" => InternalStatus::Rejected,
            "expired" => InternalStatus::Expired,
            _ => InternalStatus::Pending,
        }
    }
}
