use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};

use crate::signing::analysis::{AnalysisRequest, AnalysisTrigger};
use crate::signing::domain::{
    Company, CompanyRequest, CreateOptions, Document, DocumentRequest, SignerInput,
};
use crate::signing::provider::{
    non_empty_str, webhook_document_token, CreateDocumentRequest, CreatedDocument,
    DocumentSnapshot, FactoryError, ProviderError, ProviderFactory, ProviderKey, ProviderSettings,
    ProviderStrategy, SignerReceipt, SignerSnapshot, WebhookEvent, WebhookEventKind,
};
use crate::signing::repository::InMemorySignatureRepository;
use crate::signing::retry::RetryPolicy;
use crate::signing::router::signing_router;
use crate::signing::status::InternalStatus;
use crate::signing::{SignatureOrchestrator, WebhookReconciler};

pub(super) const SCRIPTED: &str = "scripted";

/// In-process provider whose responses are queued by the test. Empty queues
/// fall back to a well-behaved provider.
#[derive(Debug, Default)]
pub(super) struct ScriptedStrategy {
    pub created: Mutex<VecDeque<Result<CreatedDocument, ProviderError>>>,
    pub statuses: Mutex<VecDeque<Result<DocumentSnapshot, ProviderError>>>,
    pub receipts: Mutex<VecDeque<Result<SignerReceipt, ProviderError>>>,
    pub cancels: Mutex<VecDeque<Result<(), ProviderError>>>,
    pub calls: Mutex<Vec<&'static str>>,
    next_document: AtomicU64,
}

impl ScriptedStrategy {
    pub fn push_created(&self, result: Result<CreatedDocument, ProviderError>) {
        self.created.lock().expect("script lock").push_back(result);
    }

    pub fn push_status(&self, result: Result<DocumentSnapshot, ProviderError>) {
        self.statuses.lock().expect("script lock").push_back(result);
    }

    pub fn push_receipt(&self, result: Result<SignerReceipt, ProviderError>) {
        self.receipts.lock().expect("script lock").push_back(result);
    }

    pub fn push_cancel(&self, result: Result<(), ProviderError>) {
        self.cancels.lock().expect("script lock").push_back(result);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("script lock").clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|call| **call == operation).count()
    }

    fn record(&self, operation: &'static str) {
        self.calls.lock().expect("script lock").push(operation);
    }
}

#[async_trait]
impl ProviderStrategy for ScriptedStrategy {
    fn code(&self) -> &str {
        SCRIPTED
    }

    async fn create_document(
        &self,
        request: &CreateDocumentRequest,
    ) -> Result<CreatedDocument, ProviderError> {
        self.record("create_document");
        if let Some(scripted) = self.created.lock().expect("script lock").pop_front() {
            return scripted;
        }
        let number = self.next_document.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("doc-{number}");
        let signers = request
            .signers
            .iter()
            .enumerate()
            .map(|(index, signer)| SignerSnapshot {
                name: signer.name.clone(),
                email: signer.email.clone(),
                token: Some(format!("{token}-s{}", index + 1)),
                sign_url: Some(format!("https://sign.example.com/{token}/{}", index + 1)),
                status: "new".to_string(),
            })
            .collect();
        Ok(CreatedDocument {
            open_id: Some(number.to_string()),
            token,
            status: "pending".to_string(),
            signers,
        })
    }

    async fn get_status(&self, token: &str) -> Result<DocumentSnapshot, ProviderError> {
        self.record("get_status");
        self.statuses
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::NotFound {
                    token: token.to_string(),
                })
            })
    }

    async fn add_signer(
        &self,
        token: &str,
        signer: &SignerInput,
    ) -> Result<SignerReceipt, ProviderError> {
        self.record("add_signer");
        if let Some(scripted) = self.receipts.lock().expect("script lock").pop_front() {
            return scripted;
        }
        Ok(SignerReceipt {
            token: Some(format!("{token}-{}", signer.email)),
            sign_url: Some(format!("https://sign.example.com/{token}/extra")),
            status: "new".to_string(),
        })
    }

    async fn cancel(&self, _token: &str) -> Result<(), ProviderError> {
        self.record("cancel");
        self.cancels
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn parse_webhook(&self, payload: &Value) -> WebhookEvent {
        let kind = match payload.get("event").and_then(Value::as_str) {
            Some("doc_created") => WebhookEventKind::DocCreated,
            Some("doc_signed") => WebhookEventKind::DocSigned,
            Some("signer_signed") => WebhookEventKind::SignerSigned,
            Some("signer_authentication_failed") => WebhookEventKind::SignerAuthenticationFailed,
            Some("email_bounce") => WebhookEventKind::EmailBounce,
            _ => return WebhookEvent::unknown(webhook_document_token(payload)),
        };
        WebhookEvent {
            kind,
            document_token: webhook_document_token(payload),
            signer_token: non_empty_str(payload.pointer("/signer/token")),
            signer_email: non_empty_str(payload.pointer("/signer/email"))
                .or_else(|| non_empty_str(payload.get("email"))),
            provider_status: non_empty_str(payload.get("status")),
        }
    }

    fn map_external_status(&self, provider_status: &str) -> InternalStatus {
        match provider_status.trim().to_ascii_lowercase().as_str() {
            "signed" => InternalStatus::Signed,
            "cancelled" => InternalStatus::Cancelled,
            "rejected" | "refused" => InternalStatus::Rejected,
            "expired" => InternalStatus::Expired,
            _ => InternalStatus::Pending,
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct RecordingAnalysis {
    pub requests: Mutex<Vec<AnalysisRequest>>,
}

impl RecordingAnalysis {
    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().expect("analysis lock").clone()
    }
}

impl AnalysisTrigger for RecordingAnalysis {
    fn schedule(&self, request: AnalysisRequest) {
        self.requests.lock().expect("analysis lock").push(request);
    }
}

pub(super) fn scripted_factory(strategy: Arc<ScriptedStrategy>) -> ProviderFactory {
    ProviderFactory::empty(ProviderSettings::default()).register(
        SCRIPTED,
        Arc::new(
            move |_: &ProviderKey,
                  _: &ProviderSettings|
                  -> Result<Arc<dyn ProviderStrategy>, FactoryError> {
                Ok(Arc::clone(&strategy) as Arc<dyn ProviderStrategy>)
            },
        ),
    )
}

pub(super) struct Harness<A = RecordingAnalysis> {
    pub repository: Arc<InMemorySignatureRepository>,
    pub strategy: Arc<ScriptedStrategy>,
    pub analysis: Arc<A>,
    pub orchestrator: Arc<SignatureOrchestrator<InMemorySignatureRepository, A>>,
    pub webhooks: Arc<WebhookReconciler<InMemorySignatureRepository>>,
    pub company: Company,
}

impl<A: AnalysisTrigger + 'static> Harness<A> {
    pub fn router(&self) -> Router {
        signing_router(Arc::clone(&self.orchestrator), Arc::clone(&self.webhooks))
    }

    pub async fn create(&self, emails: &[&str]) -> Document {
        self.orchestrator
            .create_document(self.company.id, document_request(emails, false))
            .await
            .expect("document created")
    }

    pub async fn draft(&self, emails: &[&str]) -> Document {
        self.orchestrator
            .create_document(self.company.id, document_request(emails, true))
            .await
            .expect("draft created")
    }

    pub fn stored(&self, document: &Document) -> Document {
        self.orchestrator
            .document(document.id)
            .expect("document still stored")
    }

    pub fn webhook(&self, payload: Value) -> crate::signing::WebhookOutcome {
        self.webhooks.handle(SCRIPTED, &payload)
    }
}

pub(super) fn harness() -> Harness {
    harness_with(Arc::new(RecordingAnalysis::default()))
}

pub(super) fn harness_with<A: AnalysisTrigger + 'static>(analysis: Arc<A>) -> Harness<A> {
    let repository = Arc::new(InMemorySignatureRepository::default());
    let strategy = Arc::new(ScriptedStrategy::default());
    let factory = Arc::new(scripted_factory(Arc::clone(&strategy)));
    let orchestrator = Arc::new(SignatureOrchestrator::new(
        Arc::clone(&repository),
        Arc::clone(&factory),
        Arc::clone(&analysis),
    ));
    let webhooks = Arc::new(WebhookReconciler::new(
        Arc::clone(&repository),
        Arc::clone(&factory),
    ));
    let company = orchestrator
        .register_company(company_request("Acme Rentals"))
        .expect("company registered");

    Harness {
        repository,
        strategy,
        analysis,
        orchestrator,
        webhooks,
        company,
    }
}

pub(super) fn company_request(name: &str) -> CompanyRequest {
    CompanyRequest {
        name: name.to_string(),
        provider_code: SCRIPTED.to_string(),
        api_token: format!("{}-secret", name.to_ascii_lowercase().replace(' ', "-")),
        base_url: None,
        retry: Some(RetryPolicy::new(3, Duration::ZERO)),
    }
}

pub(super) fn document_request(emails: &[&str], as_draft: bool) -> DocumentRequest {
    DocumentRequest {
        name: "Lease agreement".to_string(),
        file_url: "https://files.example.com/lease.pdf".to_string(),
        signers: emails
            .iter()
            .map(|email| SignerInput {
                name: email.split('@').next().unwrap_or("signer").to_string(),
                email: email.to_string(),
            })
            .collect(),
        options: CreateOptions::default(),
        as_draft,
    }
}

pub(super) fn snapshot(status: &str, signers: &[(&str, &str)]) -> DocumentSnapshot {
    DocumentSnapshot {
        status: status.to_string(),
        signers: signers
            .iter()
            .map(|(token, status)| SignerSnapshot {
                name: String::new(),
                email: String::new(),
                token: Some(token.to_string()),
                sign_url: None,
                status: status.to_string(),
            })
            .collect(),
    }
}

pub(super) fn server_error() -> ProviderError {
    ProviderError::Request {
        status: Some(503),
        message: "upstream unavailable".to_string(),
    }
}

pub(super) fn signer_token(document: &Document, index: usize) -> String {
    document.signers[index]
        .token
        .clone()
        .expect("signer has a provider token")
}

pub(super) fn signer_signed(document: &Document, index: usize) -> Value {
    json!({
        "event": "signer_signed",
        "token": document.token,
        "signer": { "token": signer_token(document, index) }
    })
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
