use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use super::alerts::{document_alerts, document_metrics};
use super::analysis::AnalysisTrigger;
use super::domain::{CompanyId, CompanyRequest, Document, DocumentId, DocumentRequest, SignerInput};
use super::orchestrator::{OrchestratorError, SignatureOrchestrator};
use super::provider::FactoryError;
use super::repository::{RepositoryError, SignatureRepository};
use super::webhook::WebhookReconciler;

/// Shared handler state: the lifecycle service plus the push-channel reconciler.
pub struct SigningState<R, A> {
    pub orchestrator: Arc<SignatureOrchestrator<R, A>>,
    pub webhooks: Arc<WebhookReconciler<R>>,
}

type Shared<R, A> = State<Arc<SigningState<R, A>>>;

/// Router builder exposing company, document, and webhook endpoints.
pub fn signing_router<R, A>(
    orchestrator: Arc<SignatureOrchestrator<R, A>>,
    webhooks: Arc<WebhookReconciler<R>>,
) -> Router
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    let state = Arc::new(SigningState {
        orchestrator,
        webhooks,
    });
    let document = "/api/v1/companies/:company_id/documents/:document_id";

    Router::new()
        .route("/api/v1/providers", get(providers_handler::<R, A>))
        .route(
            "/api/v1/companies",
            post(create_company_handler::<R, A>).get(list_companies_handler::<R, A>),
        )
        .route(
            "/api/v1/companies/:company_id",
            get(company_handler::<R, A>),
        )
        .route(
            "/api/v1/companies/:company_id/documents",
            post(create_document_handler::<R, A>).get(list_documents_handler::<R, A>),
        )
        .route(
            "/api/v1/companies/:company_id/alerts",
            get(alerts_handler::<R, A>),
        )
        .route(
            "/api/v1/companies/:company_id/metrics",
            get(metrics_handler::<R, A>),
        )
        .route(document, get(document_handler::<R, A>))
        .route(
            &format!("{document}/promote"),
            post(promote_handler::<R, A>),
        )
        .route(
            &format!("{document}/refresh_status"),
            post(refresh_handler::<R, A>),
        )
        .route(
            &format!("{document}/add_signer"),
            post(add_signer_handler::<R, A>),
        )
        .route(
            &format!("{document}/cancel"),
            post(cancel_handler::<R, A>),
        )
        .route(
            &format!("{document}/signers"),
            get(signers_handler::<R, A>),
        )
        .route("/webhooks/:provider_code", post(webhook_handler::<R, A>))
        .with_state(state)
}

pub(crate) fn error_response(error: OrchestratorError) -> Response {
    let status = match &error {
        OrchestratorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::CompanyNotFound(_)
        | OrchestratorError::DocumentNotFound(_)
        | OrchestratorError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        OrchestratorError::InvalidState { .. }
        | OrchestratorError::Precondition(_)
        | OrchestratorError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        OrchestratorError::Factory(FactoryError::UnknownProvider(_)) => StatusCode::BAD_REQUEST,
        OrchestratorError::Provider(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::Factory(FactoryError::Client(_))
        | OrchestratorError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let payload = json!({
        "error": error.to_string(),
    });
    (status, Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, OrchestratorError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(error) => error_response(error),
    }
}

impl<R, A> SigningState<R, A>
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    /// Loads a document, hiding documents owned by other companies.
    fn owned_document(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<Document, OrchestratorError> {
        let document = self.orchestrator.document(document_id)?;
        if document.company_id != company_id {
            return Err(OrchestratorError::DocumentNotFound(document_id));
        }
        Ok(document)
    }
}

pub(crate) async fn providers_handler<R, A>(State(state): Shared<R, A>) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    let providers = state.orchestrator.factory().provider_codes();
    (StatusCode::OK, Json(json!({ "providers": providers }))).into_response()
}

pub(crate) async fn create_company_handler<R, A>(
    State(state): Shared<R, A>,
    Json(request): Json<CompanyRequest>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    respond(StatusCode::CREATED, state.orchestrator.register_company(request))
}

pub(crate) async fn list_companies_handler<R, A>(State(state): Shared<R, A>) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    respond(StatusCode::OK, state.orchestrator.companies())
}

pub(crate) async fn company_handler<R, A>(
    State(state): Shared<R, A>,
    Path(company_id): Path<CompanyId>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    respond(StatusCode::OK, state.orchestrator.company(company_id))
}

pub(crate) async fn create_document_handler<R, A>(
    State(state): Shared<R, A>,
    Path(company_id): Path<CompanyId>,
    Json(request): Json<DocumentRequest>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    let result = state
        .orchestrator
        .create_document(company_id, request)
        .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn list_documents_handler<R, A>(
    State(state): Shared<R, A>,
    Path(company_id): Path<CompanyId>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    respond(StatusCode::OK, state.orchestrator.documents(company_id))
}

pub(crate) async fn alerts_handler<R, A>(
    State(state): Shared<R, A>,
    Path(company_id): Path<CompanyId>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    let result = state
        .orchestrator
        .documents(company_id)
        .map(|documents| document_alerts(&documents, Utc::now()));
    respond(StatusCode::OK, result)
}

pub(crate) async fn metrics_handler<R, A>(
    State(state): Shared<R, A>,
    Path(company_id): Path<CompanyId>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    let result = state
        .orchestrator
        .documents(company_id)
        .map(|documents| document_metrics(&documents, Utc::now()));
    respond(StatusCode::OK, result)
}

pub(crate) async fn document_handler<R, A>(
    State(state): Shared<R, A>,
    Path((company_id, document_id)): Path<(CompanyId, DocumentId)>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    respond(StatusCode::OK, state.owned_document(company_id, document_id))
}

pub(crate) async fn signers_handler<R, A>(
    State(state): Shared<R, A>,
    Path((company_id, document_id)): Path<(CompanyId, DocumentId)>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    let result = state.owned_document(company_id, document_id).map(|document| document.signers);
    respond(StatusCode::OK, result)
}

pub(crate) async fn promote_handler<R, A>(
    State(state): Shared<R, A>,
    Path((company_id, document_id)): Path<(CompanyId, DocumentId)>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    if let Err(error) = state.owned_document(company_id, document_id) {
        return error_response(error);
    }
    respond(
        StatusCode::OK,
        state.orchestrator.promote_draft(document_id).await,
    )
}

pub(crate) async fn refresh_handler<R, A>(
    State(state): Shared<R, A>,
    Path((company_id, document_id)): Path<(CompanyId, DocumentId)>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    if let Err(error) = state.owned_document(company_id, document_id) {
        return error_response(error);
    }
    respond(
        StatusCode::OK,
        state.orchestrator.refresh_status(document_id).await,
    )
}

pub(crate) async fn add_signer_handler<R, A>(
    State(state): Shared<R, A>,
    Path((company_id, document_id)): Path<(CompanyId, DocumentId)>,
    Json(signer): Json<SignerInput>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    if let Err(error) = state.owned_document(company_id, document_id) {
        return error_response(error);
    }
    respond(
        StatusCode::CREATED,
        state.orchestrator.add_signer(document_id, signer).await,
    )
}

pub(crate) async fn cancel_handler<R, A>(
    State(state): Shared<R, A>,
    Path((company_id, document_id)): Path<(CompanyId, DocumentId)>,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    if let Err(error) = state.owned_document(company_id, document_id) {
        return error_response(error);
    }
    respond(
        StatusCode::OK,
        state.orchestrator.cancel_document(document_id).await,
    )
}

/// Provider-facing: acknowledges every delivery with 200 so the provider never
/// enters a retry storm.
pub(crate) async fn webhook_handler<R, A>(
    State(state): Shared<R, A>,
    Path(provider_code): Path<String>,
    body: Bytes,
) -> Response
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => {
            state.webhooks.handle(&provider_code, &payload);
        }
        Err(err) => {
            warn!(provider = %provider_code, error = %err, "webhook body is not JSON; discarded");
        }
    }
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}
