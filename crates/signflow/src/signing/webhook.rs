//! Push channel of the reconciliation core.
//!
//! Provider deliveries are at-least-once and unordered relative to polling, so
//! every event is applied as a forward-only delta against the row as currently
//! stored. The outcome is reported to the caller for logging; the HTTP edge
//! acknowledges every delivery regardless.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::domain::{Document, DocumentId};
use super::orchestrator::{force_advance_signed, rederive, SIGNED};
use super::provider::{
    webhook_document_token, ProviderFactory, ProviderStrategy, WebhookEvent, WebhookEventKind,
};
use super::repository::SignatureRepository;
use super::status::{InternalStatus, SignerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    MissingDocumentToken,
    UnknownDocument,
    UnknownProvider,
    UnknownEvent,
    SignerNotFound,
    Storage,
}

impl DiscardReason {
    pub fn label(self) -> &'static str {
        match self {
            DiscardReason::MissingDocumentToken => "missing_document_token",
            DiscardReason::UnknownDocument => "unknown_document",
            DiscardReason::UnknownProvider => "unknown_provider",
            DiscardReason::UnknownEvent => "unknown_event",
            DiscardReason::SignerNotFound => "signer_not_found",
            DiscardReason::Storage => "storage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied {
        document_id: DocumentId,
        internal_status: InternalStatus,
    },
    /// Duplicate, stale, or aimed at a terminal document.
    Unchanged { document_id: DocumentId },
    Discarded(DiscardReason),
}

pub struct WebhookReconciler<R> {
    repository: Arc<R>,
    factory: Arc<ProviderFactory>,
}

impl<R> WebhookReconciler<R>
where
    R: SignatureRepository + 'static,
{
    pub fn new(repository: Arc<R>, factory: Arc<ProviderFactory>) -> Self {
        Self {
            repository,
            factory,
        }
    }

    /// Applies one provider delivery. Never fails.
    pub fn handle(&self, provider_code: &str, payload: &Value) -> WebhookOutcome {
        let Some(token) = webhook_document_token(payload) else {
            warn!(provider = provider_code, "webhook without document token discarded");
            return WebhookOutcome::Discarded(DiscardReason::MissingDocumentToken);
        };

        let document = match self.repository.document_by_token(&token) {
            Ok(Some(document)) => document,
            Ok(None) => {
                warn!(provider = provider_code, %token, "webhook for unknown document discarded");
                return WebhookOutcome::Discarded(DiscardReason::UnknownDocument);
            }
            Err(err) => {
                warn!(provider = provider_code, %token, error = %err, "webhook lookup failed");
                return WebhookOutcome::Discarded(DiscardReason::Storage);
            }
        };

        let company = match self.repository.company(document.company_id) {
            Ok(Some(company)) => company,
            Ok(None) => {
                warn!(document_id = %document.id, "webhook document has no owning company");
                return WebhookOutcome::Discarded(DiscardReason::UnknownDocument);
            }
            Err(err) => {
                warn!(document_id = %document.id, error = %err, "webhook company lookup failed");
                return WebhookOutcome::Discarded(DiscardReason::Storage);
            }
        };

        if !company
            .binding
            .provider_code
            .eq_ignore_ascii_case(provider_code.trim())
        {
            debug!(
                document_id = %document.id,
                path_provider = provider_code,
                company_provider = %company.binding.provider_code,
                "webhook provider differs from the company binding; using the path provider"
            );
        }

        let strategy = match self.factory.get(
            provider_code,
            &company.binding.api_token,
            company.binding.base_url.as_deref(),
        ) {
            Ok(strategy) => strategy,
            Err(err) => {
                warn!(provider = provider_code, error = %err, "webhook for unresolvable provider discarded");
                return WebhookOutcome::Discarded(DiscardReason::UnknownProvider);
            }
        };

        let event = strategy.parse_webhook(payload);
        if event.kind == WebhookEventKind::Unknown {
            warn!(document_id = %document.id, provider = provider_code, "unrecognized webhook event discarded");
            return WebhookOutcome::Discarded(DiscardReason::UnknownEvent);
        }

        self.apply(document.id, &event, strategy.as_ref())
    }

    fn apply(
        &self,
        document_id: DocumentId,
        event: &WebhookEvent,
        strategy: &dyn ProviderStrategy,
    ) -> WebhookOutcome {
        let mut signer_missing = false;
        let mut changed = false;
        let updated = self.repository.update_document(document_id, &mut |current| {
            if current.internal_status.is_terminal() {
                return false;
            }
            let before = current.clone();
            signer_missing = !apply_event(current, event, strategy);
            changed = *current != before;
            changed
        });

        let updated = match updated {
            Ok(updated) => updated,
            Err(err) => {
                warn!(%document_id, error = %err, "webhook update failed");
                return WebhookOutcome::Discarded(DiscardReason::Storage);
            }
        };

        if signer_missing {
            warn!(
                %document_id,
                event = ?event.kind,
                signer_token = ?event.signer_token,
                signer_email = ?event.signer_email,
                "webhook signer not found; ignored"
            );
            return WebhookOutcome::Discarded(DiscardReason::SignerNotFound);
        }

        if changed {
            info!(
                %document_id,
                event = ?event.kind,
                status = %updated.internal_status,
                "webhook applied"
            );
            WebhookOutcome::Applied {
                document_id,
                internal_status: updated.internal_status,
            }
        } else {
            debug!(%document_id, event = ?event.kind, "webhook produced no change");
            WebhookOutcome::Unchanged { document_id }
        }
    }
}

/// Mutates `document` for `event`; returns `false` when the addressed signer
/// does not exist.
fn apply_event(document: &mut Document, event: &WebhookEvent, strategy: &dyn ProviderStrategy) -> bool {
    match event.kind {
        WebhookEventKind::DocCreated => {
            if let Some(status) = event.provider_status.as_deref() {
                document.provider_status = Some(status.to_string());
            }
        }
        WebhookEventKind::DocSigned => {
            document.provider_status = Some(SIGNED.to_string());
            force_advance_signed(document);
        }
        WebhookEventKind::SignerSigned => {
            if !advance_signer(document, event, SignerStatus::Signed) {
                return false;
            }
            if document
                .signers
                .iter()
                .all(|signer| signer.status == SignerStatus::Signed)
            {
                document.provider_status = Some(SIGNED.to_string());
            }
        }
        WebhookEventKind::SignerAuthenticationFailed | WebhookEventKind::EmailBounce => {
            if !advance_signer(document, event, SignerStatus::Rejected) {
                return false;
            }
        }
        WebhookEventKind::Unknown => return true,
    }
    rederive(document, strategy);
    true
}

/// Bounces are addressed by email, everything else by signer token; each
/// falls back to the other identity when its primary one is absent.
fn advance_signer(document: &mut Document, event: &WebhookEvent, observed: SignerStatus) -> bool {
    let by_token = |document: &mut Document| {
        event
            .signer_token
            .as_deref()
            .and_then(|token| document.signer_by_token_mut(token))
            .map(|signer| {
                signer.advance_to(observed);
            })
            .is_some()
    };
    let by_email = |document: &mut Document| {
        event
            .signer_email
            .as_deref()
            .and_then(|email| document.signer_by_email_mut(email))
            .map(|signer| {
                signer.advance_to(observed);
            })
            .is_some()
    };

    if event.kind == WebhookEventKind::EmailBounce {
        by_email(document) || by_token(document)
    } else {
        by_token(document) || by_email(document)
    }
}
