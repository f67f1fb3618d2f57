use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use signflow::signing::{
    Company, CompanyRequest, CreateOptions, DisabledAnalysis, DocumentRequest,
    InMemorySignatureRepository, InternalStatus, ProviderFactory, ProviderSettings, RetryPolicy,
    SignatureOrchestrator, SignerInput, SignerStatus, WebhookOutcome, WebhookReconciler,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Stack {
    orchestrator: SignatureOrchestrator<InMemorySignatureRepository, DisabledAnalysis>,
    webhooks: WebhookReconciler<InMemorySignatureRepository>,
    company: Company,
}

fn stack(server: &MockServer) -> Stack {
    let repository = Arc::new(InMemorySignatureRepository::default());
    let factory = Arc::new(ProviderFactory::new(ProviderSettings::default()));
    let orchestrator = SignatureOrchestrator::new(
        Arc::clone(&repository),
        Arc::clone(&factory),
        Arc::new(DisabledAnalysis),
    );
    let webhooks = WebhookReconciler::new(repository, factory);
    let company = orchestrator
        .register_company(CompanyRequest {
            name: "Acme Rentals".to_string(),
            provider_code: "zapsign".to_string(),
            api_token: "zap-token".to_string(),
            base_url: Some(server.uri()),
            retry: Some(RetryPolicy::new(3, Duration::ZERO)),
        })
        .expect("company registered");

    Stack {
        orchestrator,
        webhooks,
        company,
    }
}

fn request() -> DocumentRequest {
    DocumentRequest {
        name: "Lease".to_string(),
        file_url: "https://files.example.com/lease.pdf".to_string(),
        signers: vec![
            SignerInput {
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
            },
            SignerInput {
                name: "Bo".to_string(),
                email: "bo@example.com".to_string(),
            },
        ],
        options: CreateOptions::default(),
        as_draft: false,
    }
}

async fn mount_create(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/docs/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "open_id": 10,
            "token": "doc-1",
            "status": "pending",
            "signers": [
                { "name": "Ana", "email": "ana@example.com", "token": "s1", "status": "new" },
                { "name": "Bo", "email": "bo@example.com", "token": "s2", "status": "new" }
            ]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn webhook_and_poll_complete_a_document() {
    let server = MockServer::start().await;
    mount_create(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/documents/doc-1/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("try again"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/documents/doc-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "signed",
            "signers": [
                { "token": "s1", "status": "signed" },
                { "token": "s2", "status": "link-opened" }
            ]
        })))
        .mount(&server)
        .await;
    let stack = stack(&server);

    let document = stack
        .orchestrator
        .create_document(stack.company.id, request())
        .await
        .expect("document created");
    assert_eq!(document.internal_status, InternalStatus::Pending);

    let outcome = stack.webhooks.handle(
        "zapsign",
        &json!({
            "event_type": "signer_signed",
            "token": "doc-1",
            "signer": { "token": "s1", "email": "ana@example.com" }
        }),
    );
    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            document_id: document.id,
            internal_status: InternalStatus::InProgress,
        }
    );

    let refreshed = stack
        .orchestrator
        .refresh_status(document.id)
        .await
        .expect("third attempt succeeds");
    assert_eq!(refreshed.internal_status, InternalStatus::Signed);
    assert_eq!(
        refreshed.signer_statuses(),
        vec![SignerStatus::Signed, SignerStatus::Signed]
    );
}

#[tokio::test]
async fn vanished_provider_document_keeps_local_state() {
    let server = MockServer::start().await;
    mount_create(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/documents/doc-1/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    let stack = stack(&server);

    let document = stack
        .orchestrator
        .create_document(stack.company.id, request())
        .await
        .expect("document created");
    let refreshed = stack
        .orchestrator
        .refresh_status(document.id)
        .await
        .expect("404 is not an error");

    assert_eq!(refreshed, document);
}

#[tokio::test]
async fn cancel_reaches_the_provider_and_freezes_the_document() {
    let server = MockServer::start().await;
    mount_create(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/documents/doc-1/cancel/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "ok" })))
        .expect(1)
        .mount(&server)
        .await;
    let stack = stack(&server);

    let document = stack
        .orchestrator
        .create_document(stack.company.id, request())
        .await
        .expect("document created");
    let cancelled = stack
        .orchestrator
        .cancel_document(document.id)
        .await
        .expect("cancelled");
    assert_eq!(cancelled.internal_status, InternalStatus::Cancelled);

    let outcome = stack.webhooks.handle(
        "zapsign",
        &json!({ "event_type": "doc_signed", "token": "doc-1" }),
    );
    assert_eq!(
        outcome,
        WebhookOutcome::Unchanged {
            document_id: document.id
        }
    );
    assert_eq!(
        stack
            .orchestrator
            .document(document.id)
            .expect("document stored")
            .internal_status,
        InternalStatus::Cancelled
    );
}
