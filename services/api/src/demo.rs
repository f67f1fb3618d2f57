use crate::infra::signing_services;
use async_trait::async_trait;
use chrono::Utc;
use clap::Args;
use serde_json::{json, Value};
use signflow::error::AppError;
use signflow::signing::{
    document_alerts, document_metrics, CompanyRequest, CreateDocumentRequest, CreateOptions,
    CreatedDocument, DisabledAnalysis, Document, DocumentRequest, DocumentSnapshot,
    FactoryError, InMemorySignatureRepository, InternalStatus, ProviderError, ProviderFactory,
    ProviderKey, ProviderSettings, ProviderStrategy, SignerInput, SignerReceipt, SignerSnapshot,
    WebhookEvent, WebhookEventKind, WebhookOutcome,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const SANDBOX_CODE: &str = "sandbox";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of signers attached to each demo document.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=8))]
    pub(crate) signers: u8,
    /// Print every stored document as JSON once the walkthrough completes.
    #[arg(long)]
    pub(crate) dump_documents: bool,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            signers: 2,
            dump_documents: false,
        }
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        signers,
        dump_documents,
    } = args;

    let sandbox = Arc::new(SandboxProvider::default());
    let factory = sandbox_factory(Arc::clone(&sandbox));
    let services = signing_services(
        Arc::new(InMemorySignatureRepository::default()),
        Arc::new(factory),
        Arc::new(DisabledAnalysis),
    );
    let orchestrator = services.orchestrator;
    let webhooks = services.webhooks;

    println!("E-signature lifecycle demo (sandbox provider)");
    let company = orchestrator.register_company(CompanyRequest {
        name: "Demo Realty".to_string(),
        provider_code: SANDBOX_CODE.to_string(),
        api_token: "sandbox-token".to_string(),
        base_url: None,
        retry: None,
    })?;
    println!(
        "- Registered company {} ({}) on provider '{}'",
        company.id.0, company.name, company.binding.provider_code
    );

    println!("\nWebhook-driven completion");
    let lease = orchestrator
        .create_document(company.id, demo_request("Lease agreement", signers))
        .await?;
    print_document("Created", &lease);

    let lease_token = lease.token.clone().unwrap_or_default();
    for index in 0..lease.signers.len() {
        let Some(payload) = sandbox.sign(&lease_token, index) else {
            println!("  Sandbox has no signer #{index}");
            continue;
        };
        let outcome = webhooks.handle(SANDBOX_CODE, &payload);
        println!("  Webhook signer_signed #{} -> {}", index + 1, describe(&outcome));
    }

    let replay = sandbox
        .sign(&lease_token, 0)
        .map(|payload| webhooks.handle(SANDBOX_CODE, &payload));
    if let Some(outcome) = replay {
        println!("  Replayed first webhook -> {}", describe(&outcome));
    }

    let polled = orchestrator.refresh_status(lease.id).await?;
    print_document("Polled", &polled);

    println!("\nPartial signing then cancellation");
    let addendum = orchestrator
        .create_document(company.id, demo_request("Pet addendum", signers))
        .await?;
    print_document("Created", &addendum);

    if let Some(payload) = sandbox.sign(addendum.token.as_deref().unwrap_or_default(), 0) {
        let outcome = webhooks.handle(SANDBOX_CODE, &payload);
        println!("  Webhook signer_signed #1 -> {}", describe(&outcome));
    }
    let cancelled = orchestrator.cancel_document(addendum.id).await?;
    print_document("Cancelled", &cancelled);

    let late = webhooks.handle(
        SANDBOX_CODE,
        &json!({ "event_type": "doc_signed", "token": addendum.token }),
    );
    println!("  Late doc_signed webhook -> {}", describe(&late));

    let documents = orchestrator.documents(company.id)?;
    let now = Utc::now();
    let metrics = document_metrics(&documents, now);
    println!("\nCompany metrics");
    println!("- Total documents: {}", metrics.total_documents);
    for (status, count) in &metrics.status_breakdown {
        println!("  {status}: {count}");
    }
    println!("- Signature rate: {:.1}%", metrics.signature_rate);
    match metrics.average_signature_time_hours {
        Some(hours) => println!("- Average signature time: {hours:.2}h"),
        None => println!("- Average signature time: n/a"),
    }
    println!("- Expiring soon: {}", metrics.expiring_soon_count);

    let alerts = document_alerts(&documents, now);
    if alerts.is_empty() {
        println!("- Alerts: none");
    } else {
        println!("- Alerts:");
        for alert in alerts {
            println!("    - [{:?}] {}", alert.severity, alert.message);
        }
    }

    if dump_documents {
        match serde_json::to_string_pretty(&documents) {
            Ok(json) => println!("\nStored documents:\n{json}"),
            Err(err) => println!("\nStored documents unavailable: {err}"),
        }
    }

    Ok(())
}

fn sandbox_factory(sandbox: Arc<SandboxProvider>) -> ProviderFactory {
    ProviderFactory::new(ProviderSettings::default()).register(
        SANDBOX_CODE,
        Arc::new(
            move |_key: &ProviderKey,
                  _settings: &ProviderSettings|
                  -> Result<Arc<dyn ProviderStrategy>, FactoryError> {
                let strategy: Arc<dyn ProviderStrategy> = sandbox.clone();
                Ok(strategy)
            },
        ),
    )
}

fn demo_request(name: &str, signers: u8) -> DocumentRequest {
    let slug = name.to_ascii_lowercase().replace(' ', "-");
    DocumentRequest {
        name: name.to_string(),
        file_url: format!("https://files.demo-realty.test/{slug}.pdf"),
        signers: (1..=signers)
            .map(|index| SignerInput {
                name: format!("Signer {index}"),
                email: format!("signer{index}@demo-realty.test"),
            })
            .collect(),
        options: CreateOptions::default(),
        as_draft: false,
    }
}

fn print_document(label: &str, document: &Document) {
    println!(
        "- {label} document {} '{}' -> {} (provider: {})",
        document.id.0,
        document.name,
        document.internal_status,
        document.provider_status.as_deref().unwrap_or("-")
    );
    let statuses: Vec<String> = document
        .signers
        .iter()
        .map(|signer| format!("{}={}", signer.email, signer.status))
        .collect();
    println!("  Signers: {}", statuses.join(", "));
}

fn describe(outcome: &WebhookOutcome) -> String {
    match outcome {
        WebhookOutcome::Applied {
            document_id,
            internal_status,
        } => format!("applied to document {} ({internal_status})", document_id.0),
        WebhookOutcome::Unchanged { document_id } => {
            format!("no change for document {}", document_id.0)
        }
        WebhookOutcome::Discarded(reason) => format!("discarded ({})", reason.label()),
    }
}

#[derive(Debug, Clone)]
struct SandboxDocument {
    status: String,
    signers: Vec<SignerSnapshot>,
}

/// In-process provider that keeps documents in memory and emits webhook
/// payloads when a signer signs.
#[derive(Debug, Default)]
struct SandboxProvider {
    sequence: AtomicU64,
    documents: Mutex<HashMap<String, SandboxDocument>>,
}

impl SandboxProvider {
    fn next_token(&self, prefix: &str) -> String {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{id:04}")
    }

    fn with_documents<T>(
        &self,
        apply: impl FnOnce(&mut HashMap<String, SandboxDocument>) -> T,
    ) -> Result<T, ProviderError> {
        let mut documents = self.documents.lock().map_err(|_| ProviderError::Request {
            status: None,
            message: "sandbox state poisoned".to_string(),
        })?;
        Ok(apply(&mut documents))
    }

    /// Marks the signer at `index` as signed and returns the webhook the
    /// provider would push.
    fn sign(&self, document_token: &str, index: usize) -> Option<Value> {
        self.with_documents(|documents| {
            let document = documents.get_mut(document_token)?;
            let signer = document.signers.get_mut(index)?;
            signer.status = "signed".to_string();
            let payload = json!({
                "event_type": "signer_signed",
                "token": document_token,
                "signer": { "token": signer.token, "email": signer.email },
            });
            if document.signers.iter().all(|signer| signer.status == "signed") {
                document.status = "signed".to_string();
            }
            Some(payload)
        })
        .ok()
        .flatten()
    }

    fn not_found(token: &str) -> ProviderError {
        ProviderError::NotFound {
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl ProviderStrategy for SandboxProvider {
    fn code(&self) -> &str {
        SANDBOX_CODE
    }

    async fn create_document(
        &self,
        request: &CreateDocumentRequest,
    ) -> Result<CreatedDocument, ProviderError> {
        let token = self.next_token("sbx-doc");
        let signers: Vec<SignerSnapshot> = request
            .signers
            .iter()
            .map(|input| {
                let signer_token = self.next_token("sbx-signer");
                SignerSnapshot {
                    name: input.name.clone(),
                    email: input.email.clone(),
                    sign_url: Some(format!("https://sandbox.test/sign/{signer_token}")),
                    token: Some(signer_token),
                    status: "new".to_string(),
                }
            })
            .collect();
        let document = SandboxDocument {
            status: "pending".to_string(),
            signers: signers.clone(),
        };
        self.with_documents(|documents| documents.insert(token.clone(), document))?;

        Ok(CreatedDocument {
            open_id: None,
            token,
            status: "pending".to_string(),
            signers,
        })
    }

    async fn get_status(&self, token: &str) -> Result<DocumentSnapshot, ProviderError> {
        self.with_documents(|documents| documents.get(token).cloned())?
            .map(|document| DocumentSnapshot {
                status: document.status,
                signers: document.signers,
            })
            .ok_or_else(|| Self::not_found(token))
    }

    async fn add_signer(
        &self,
        token: &str,
        signer: &SignerInput,
    ) -> Result<SignerReceipt, ProviderError> {
        let signer_token = self.next_token("sbx-signer");
        let snapshot = SignerSnapshot {
            name: signer.name.clone(),
            email: signer.email.clone(),
            sign_url: Some(format!("https://sandbox.test/sign/{signer_token}")),
            token: Some(signer_token),
            status: "new".to_string(),
        };
        let added = self.with_documents(|documents| {
            documents
                .get_mut(token)
                .map(|document| document.signers.push(snapshot.clone()))
                .is_some()
        })?;
        if !added {
            return Err(Self::not_found(token));
        }

        Ok(SignerReceipt {
            token: snapshot.token,
            sign_url: snapshot.sign_url,
            status: snapshot.status,
        })
    }

    async fn cancel(&self, token: &str) -> Result<(), ProviderError> {
        let cancelled = self.with_documents(|documents| {
            documents
                .get_mut(token)
                .map(|document| document.status = "cancelled".to_string())
                .is_some()
        })?;
        if cancelled {
            Ok(())
        } else {
            Err(Self::not_found(token))
        }
    }

    fn parse_webhook(&self, payload: &Value) -> WebhookEvent {
        let document_token = payload
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string);
        let kind = match payload.get("event_type").and_then(Value::as_str) {
            Some("doc_created") => WebhookEventKind::DocCreated,
            Some("doc_signed") => WebhookEventKind::DocSigned,
            Some("signer_signed") => WebhookEventKind::SignerSigned,
            _ => return WebhookEvent::unknown(document_token),
        };
        let signer_field = |field: &str| {
            payload
                .pointer(&format!("/signer/{field}"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        WebhookEvent {
            kind,
            document_token,
            signer_token: signer_field("token"),
            signer_email: signer_field("email"),
            provider_status: None,
        }
    }

    fn map_external_status(&self, provider_status: &str) -> InternalStatus {
        match provider_status {
            "signed" => InternalStatus::Signed,
            "cancelled" => InternalStatus::Cancelled,
            _ => InternalStatus::Pending,
        }
    }
}
