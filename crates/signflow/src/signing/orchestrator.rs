use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::analysis::{AnalysisRequest, AnalysisTrigger};
use super::domain::{
    Company, CompanyId, CompanyRequest, Document, DocumentId, DocumentRequest, NewDocument,
    NewSigner, Signer, SignerInput,
};
use super::provider::{
    CreateDocumentRequest, DocumentSnapshot, FactoryError, ProviderError, ProviderFactory,
    ProviderStrategy, SignerSnapshot,
};
use super::repository::{RepositoryError, SignatureRepository};
use super::status::{derive_internal_status, InternalStatus, SignerStatus};

/// Provider status written when local signer progress proves the document complete.
pub(crate) const SIGNED: &str = "signed";
pub(crate) const CANCELLED: &str = "cancelled";

/// Recomputes `internal_status` from the current provider status and signers.
pub(crate) fn rederive(document: &mut Document, strategy: &dyn ProviderStrategy) {
    let provider = strategy.map_external_status(document.provider_status.as_deref().unwrap_or(""));
    document.internal_status = derive_internal_status(provider, &document.signer_statuses());
}

/// Provider's aggregate "signed" is authoritative over individual signer rows.
pub(crate) fn force_advance_signed(document: &mut Document) -> usize {
    document.advance_signers_where(
        |signer| matches!(signer.status, SignerStatus::Pending | SignerStatus::InProgress),
        SignerStatus::Signed,
    )
}

/// Applies a polled snapshot to the stored row. Terminal documents are left alone.
pub(crate) fn apply_snapshot(
    document: &mut Document,
    snapshot: &DocumentSnapshot,
    strategy: &dyn ProviderStrategy,
) -> bool {
    if document.internal_status.is_terminal() {
        return false;
    }
    let before = document.clone();

    document.provider_status = Some(snapshot.status.clone());
    for entry in &snapshot.signers {
        let Some(token) = entry.token.as_deref() else {
            continue;
        };
        if let Some(signer) = document.signer_by_token_mut(token) {
            signer.advance_to(SignerStatus::from_provider(&entry.status));
            if signer.sign_url.is_none() {
                signer.sign_url = entry.sign_url.clone();
            }
        }
    }

    if strategy.map_external_status(&snapshot.status) == InternalStatus::Signed {
        force_advance_signed(document);
    }
    rederive(document, strategy);

    *document != before
}

fn new_signers(returned: &[SignerSnapshot], requested: &[SignerInput]) -> Vec<NewSigner> {
    if returned.is_empty() {
        return requested.iter().map(NewSigner::pending).collect();
    }
    returned
        .iter()
        .map(|signer| NewSigner {
            name: signer.name.clone(),
            email: signer.email.clone(),
            token: signer.token.clone(),
            sign_url: signer.sign_url.clone(),
            status: SignerStatus::from_provider(&signer.status),
        })
        .collect()
}

/// Matches provider signers to the draft's rows: by email first, then by position.
fn match_returned_signers<'a>(
    locals: &[Signer],
    returned: &'a [SignerSnapshot],
) -> Vec<Option<&'a SignerSnapshot>> {
    let mut used = vec![false; returned.len()];
    let mut matches: Vec<Option<usize>> = locals
        .iter()
        .map(|local| {
            let found = returned.iter().enumerate().position(|(index, candidate)| {
                !used[index] && candidate.email.trim().eq_ignore_ascii_case(local.email.trim())
            });
            if let Some(index) = found {
                used[index] = true;
            }
            found
        })
        .collect();

    for (position, slot) in matches.iter_mut().enumerate() {
        if slot.is_none() && position < returned.len() && !used[position] {
            used[position] = true;
            *slot = Some(position);
        }
    }

    matches
        .into_iter()
        .map(|slot| slot.map(|index| &returned[index]))
        .collect()
}

/// Document lifecycle service: the single place where provider responses
/// become persisted state.
pub struct SignatureOrchestrator<R, A> {
    repository: Arc<R>,
    factory: Arc<ProviderFactory>,
    analysis: Arc<A>,
}

impl<R, A> SignatureOrchestrator<R, A>
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    pub fn new(repository: Arc<R>, factory: Arc<ProviderFactory>, analysis: Arc<A>) -> Self {
        Self {
            repository,
            factory,
            analysis,
        }
    }

    pub fn factory(&self) -> &Arc<ProviderFactory> {
        &self.factory
    }

    pub fn register_company(&self, request: CompanyRequest) -> Result<Company, OrchestratorError> {
        request.validate().map_err(OrchestratorError::Validation)?;
        if !self.factory.is_registered(&request.provider_code) {
            return Err(FactoryError::UnknownProvider(request.provider_code).into());
        }
        let (name, binding) = request.into_binding();
        let company = self.repository.insert_company(name, binding)?;
        info!(company_id = %company.id, provider = %company.binding.provider_code, "company registered");
        Ok(company)
    }

    pub fn company(&self, id: CompanyId) -> Result<Company, OrchestratorError> {
        self.repository
            .company(id)?
            .ok_or(OrchestratorError::CompanyNotFound(id))
    }

    pub fn companies(&self) -> Result<Vec<Company>, OrchestratorError> {
        Ok(self.repository.companies()?)
    }

    pub fn document(&self, id: DocumentId) -> Result<Document, OrchestratorError> {
        self.repository
            .document(id)?
            .ok_or(OrchestratorError::DocumentNotFound(id))
    }

    pub fn documents(&self, company: CompanyId) -> Result<Vec<Document>, OrchestratorError> {
        self.company(company)?;
        Ok(self.repository.documents_for_company(company)?)
    }

    /// Creates a document, either as a local draft or immediately at the provider.
    pub async fn create_document(
        &self,
        company_id: CompanyId,
        request: DocumentRequest,
    ) -> Result<Document, OrchestratorError> {
        let company = self.company(company_id)?;
        request
            .validate(Utc::now())
            .map_err(OrchestratorError::Validation)?;

        let document = if request.as_draft {
            self.repository.insert_document(NewDocument {
                company_id,
                name: request.name.trim().to_string(),
                file_url: request.file_url.trim().to_string(),
                open_id: None,
                token: None,
                provider_status: None,
                internal_status: InternalStatus::Draft,
                signers: request.signers.iter().map(NewSigner::pending).collect(),
                options: request.options,
            })?
        } else {
            let strategy = self.factory.for_company(&company)?;
            let provider_request = CreateDocumentRequest {
                name: request.name.trim().to_string(),
                file_url: request.file_url.trim().to_string(),
                signers: request.signers,
                options: request.options,
            };
            let created = {
                let strategy = strategy.as_ref();
                let provider_request = &provider_request;
                company
                    .binding
                    .retry
                    .run("create_document", move || {
                        strategy.create_document(provider_request)
                    })
                    .await?
            };

            let signers = new_signers(&created.signers, &provider_request.signers);
            let statuses: Vec<SignerStatus> = signers.iter().map(|signer| signer.status).collect();
            let internal_status = derive_internal_status(
                strategy.map_external_status(&created.status),
                &statuses,
            );

            self.repository.insert_document(NewDocument {
                company_id,
                name: provider_request.name,
                file_url: provider_request.file_url,
                open_id: created.open_id,
                token: Some(created.token),
                provider_status: Some(created.status),
                internal_status,
                options: provider_request.options,
                signers,
            })?
        };

        info!(
            document_id = %document.id,
            company_id = %company_id,
            status = %document.internal_status,
            "document created"
        );
        self.analysis.schedule(AnalysisRequest {
            company_id,
            document_id: document.id,
            file_url: document.file_url.clone(),
        });

        Ok(document)
    }

    /// Sends a draft to the provider, updating the existing rows in place.
    pub async fn promote_draft(&self, id: DocumentId) -> Result<Document, OrchestratorError> {
        let draft = self.document(id)?;
        if draft.internal_status != InternalStatus::Draft {
            return Err(OrchestratorError::InvalidState {
                document_id: id,
                status: draft.internal_status,
                expected: InternalStatus::Draft,
            });
        }
        draft
            .options
            .validate(Utc::now())
            .map_err(OrchestratorError::Validation)?;

        let company = self.company(draft.company_id)?;
        let strategy = self.factory.for_company(&company)?;
        let provider_request = CreateDocumentRequest {
            name: draft.name.clone(),
            file_url: draft.file_url.clone(),
            signers: draft.signers.iter().map(Signer::input).collect(),
            options: draft.options.clone(),
        };
        let created = {
            let strategy = strategy.as_ref();
            let provider_request = &provider_request;
            company
                .binding
                .retry
                .run("create_document", move || {
                    strategy.create_document(provider_request)
                })
                .await?
        };

        let mut promoted = false;
        let document = self.repository.update_document(id, &mut |document| {
            if document.internal_status != InternalStatus::Draft {
                return false;
            }
            document.open_id = created.open_id.clone();
            document.token = Some(created.token.clone());
            document.provider_status = Some(created.status.clone());

            let matches = match_returned_signers(&document.signers, &created.signers);
            for (signer, returned) in document.signers.iter_mut().zip(matches) {
                if let Some(returned) = returned {
                    signer.token = returned.token.clone();
                    signer.sign_url = returned.sign_url.clone();
                    signer.advance_to(SignerStatus::from_provider(&returned.status));
                }
            }
            rederive(document, strategy.as_ref());
            promoted = true;
            true
        })?;

        if !promoted {
            warn!(
                document_id = %id,
                token = %created.token,
                "draft was promoted concurrently; provider document left unlinked"
            );
            return Err(OrchestratorError::InvalidState {
                document_id: id,
                status: document.internal_status,
                expected: InternalStatus::Draft,
            });
        }

        info!(document_id = %id, status = %document.internal_status, "draft promoted");
        Ok(document)
    }

    /// Polls the provider and reconciles the stored document.
    ///
    /// A document the provider no longer knows is returned unchanged.
    pub async fn refresh_status(&self, id: DocumentId) -> Result<Document, OrchestratorError> {
        let document = self.document(id)?;
        let token = document
            .provider_token()
            .ok_or_else(|| {
                OrchestratorError::Precondition(
                    "document token is required to refresh status".to_string(),
                )
            })?
            .to_string();

        if document.internal_status.is_terminal() {
            debug!(document_id = %id, status = %document.internal_status, "refresh skipped for terminal document");
            return Ok(document);
        }

        let company = self.company(document.company_id)?;
        let strategy = self.factory.for_company(&company)?;
        let polled = {
            let strategy = strategy.as_ref();
            let token = token.as_str();
            company
                .binding
                .retry
                .run("get_status", move || strategy.get_status(token))
                .await
        };

        let snapshot = match polled {
            Ok(snapshot) => snapshot,
            Err(ProviderError::NotFound { .. }) => {
                warn!(document_id = %id, %token, "provider does not know document; keeping current state");
                return Ok(document);
            }
            Err(err) => return Err(err.into()),
        };

        let updated = self.repository.update_document(id, &mut |current| {
            apply_snapshot(current, &snapshot, strategy.as_ref())
        })?;

        if updated.internal_status != document.internal_status {
            info!(
                document_id = %id,
                from = %document.internal_status,
                to = %updated.internal_status,
                "document status refreshed"
            );
        }
        Ok(updated)
    }

    pub async fn add_signer(
        &self,
        id: DocumentId,
        input: SignerInput,
    ) -> Result<Signer, OrchestratorError> {
        input.validate().map_err(OrchestratorError::Validation)?;
        let document = self.document(id)?;
        let token = document
            .provider_token()
            .ok_or_else(|| {
                OrchestratorError::Precondition(
                    "document token is required to add a signer".to_string(),
                )
            })?
            .to_string();
        if document.internal_status.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                document_id: id,
                status: document.internal_status,
                expected: InternalStatus::Pending,
            });
        }

        let company = self.company(document.company_id)?;
        let strategy = self.factory.for_company(&company)?;
        let receipt = {
            let strategy = strategy.as_ref();
            let token = token.as_str();
            let input = &input;
            company
                .binding
                .retry
                .run("add_signer", move || strategy.add_signer(token, input))
                .await?
        };

        let signer = self.repository.insert_signer(
            id,
            NewSigner {
                name: input.name.trim().to_string(),
                email: input.email.trim().to_string(),
                token: receipt.token,
                sign_url: receipt.sign_url,
                status: SignerStatus::from_provider(&receipt.status),
            },
        )?;
        self.repository.update_document(id, &mut |current| {
            if current.internal_status.is_terminal() {
                return false;
            }
            let before = current.internal_status;
            rederive(current, strategy.as_ref());
            current.internal_status != before
        })?;

        info!(document_id = %id, signer_id = %signer.id, "signer added");
        Ok(signer)
    }

    /// Cancels at the provider and forces the terminal override locally.
    pub async fn cancel_document(&self, id: DocumentId) -> Result<Document, OrchestratorError> {
        let document = self.document(id)?;
        let token = document
            .provider_token()
            .ok_or_else(|| {
                OrchestratorError::Precondition("document token is required to cancel".to_string())
            })?
            .to_string();

        let company = self.company(document.company_id)?;
        let strategy = self.factory.for_company(&company)?;
        {
            let strategy = strategy.as_ref();
            let token = token.as_str();
            company
                .binding
                .retry
                .run("cancel", move || strategy.cancel(token))
                .await?;
        }

        let updated = self.repository.update_document(id, &mut |current| {
            let changed = current.provider_status.as_deref() != Some(CANCELLED)
                || current.internal_status != InternalStatus::Cancelled;
            current.provider_status = Some(CANCELLED.to_string());
            current.internal_status = InternalStatus::Cancelled;
            changed
        })?;

        info!(document_id = %id, "document cancelled");
        Ok(updated)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Factory(#[from] FactoryError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("document {document_id} is {status}; expected {expected}")]
    InvalidState {
        document_id: DocumentId,
        status: InternalStatus,
        expected: InternalStatus,
    },
    #[error("{0}")]
    Precondition(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("company {0} not found")]
    CompanyNotFound(CompanyId),
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),
}
