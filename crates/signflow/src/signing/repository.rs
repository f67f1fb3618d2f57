use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use super::domain::{
    Company, CompanyId, Document, DocumentId, NewDocument, NewSigner, ProviderBinding, Signer,
    SignerId,
};

/// Storage abstraction for companies, documents, and their signers.
///
/// `update_document` is the only mutation path for existing documents: the
/// closure runs against the row as currently stored and returns whether it
/// changed anything, so concurrent writers never overwrite each other's deltas
/// with stale copies.
pub trait SignatureRepository: Send + Sync {
    fn insert_company(
        &self,
        name: String,
        binding: ProviderBinding,
    ) -> Result<Company, RepositoryError>;
    fn company(&self, id: CompanyId) -> Result<Option<Company>, RepositoryError>;
    fn companies(&self) -> Result<Vec<Company>, RepositoryError>;

    fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError>;
    fn document(&self, id: DocumentId) -> Result<Option<Document>, RepositoryError>;
    fn document_by_token(&self, token: &str) -> Result<Option<Document>, RepositoryError>;
    fn documents_for_company(&self, company: CompanyId) -> Result<Vec<Document>, RepositoryError>;
    fn insert_signer(
        &self,
        document: DocumentId,
        signer: NewSigner,
    ) -> Result<Signer, RepositoryError>;
    fn update_document(
        &self,
        id: DocumentId,
        apply: &mut dyn FnMut(&mut Document) -> bool,
    ) -> Result<Document, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    companies: BTreeMap<CompanyId, Company>,
    documents: BTreeMap<DocumentId, Document>,
    next_company: u64,
    next_document: u64,
    next_signer: u64,
}

impl MemoryState {
    fn signer_id(&mut self) -> SignerId {
        self.next_signer += 1;
        SignerId(self.next_signer)
    }

    fn materialize(&mut self, signer: NewSigner) -> Signer {
        Signer {
            id: self.signer_id(),
            name: signer.name,
            email: signer.email,
            token: signer.token,
            sign_url: signer.sign_url,
            status: signer.status,
        }
    }
}

/// Mutex-guarded store used by the service binary and the tests.
#[derive(Debug, Default, Clone)]
pub struct InMemorySignatureRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemorySignatureRepository {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SignatureRepository for InMemorySignatureRepository {
    fn insert_company(
        &self,
        name: String,
        binding: ProviderBinding,
    ) -> Result<Company, RepositoryError> {
        let mut state = self.lock();
        if state
            .companies
            .values()
            .any(|company| company.name.eq_ignore_ascii_case(&name))
        {
            return Err(RepositoryError::Conflict);
        }
        state.next_company += 1;
        let company = Company {
            id: CompanyId(state.next_company),
            name,
            binding,
            created_at: Utc::now(),
        };
        state.companies.insert(company.id, company.clone());
        Ok(company)
    }

    fn company(&self, id: CompanyId) -> Result<Option<Company>, RepositoryError> {
        Ok(self.lock().companies.get(&id).cloned())
    }

    fn companies(&self) -> Result<Vec<Company>, RepositoryError> {
        Ok(self.lock().companies.values().cloned().collect())
    }

    fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        let mut state = self.lock();
        if !state.companies.contains_key(&document.company_id) {
            return Err(RepositoryError::NotFound);
        }
        if let Some(token) = document.token.as_deref() {
            if state
                .documents
                .values()
                .any(|existing| existing.token.as_deref() == Some(token))
            {
                return Err(RepositoryError::Conflict);
            }
        }

        state.next_document += 1;
        let id = DocumentId(state.next_document);
        let signers = document
            .signers
            .into_iter()
            .map(|signer| state.materialize(signer))
            .collect();
        let now = Utc::now();
        let stored = Document {
            id,
            company_id: document.company_id,
            name: document.name,
            file_url: document.file_url,
            open_id: document.open_id,
            token: document.token,
            provider_status: document.provider_status,
            internal_status: document.internal_status,
            options: document.options,
            signers,
            created_at: now,
            updated_at: now,
        };
        state.documents.insert(id, stored.clone());
        Ok(stored)
    }

    fn document(&self, id: DocumentId) -> Result<Option<Document>, RepositoryError> {
        Ok(self.lock().documents.get(&id).cloned())
    }

    fn document_by_token(&self, token: &str) -> Result<Option<Document>, RepositoryError> {
        Ok(self
            .lock()
            .documents
            .values()
            .find(|document| document.token.as_deref() == Some(token))
            .cloned())
    }

    fn documents_for_company(&self, company: CompanyId) -> Result<Vec<Document>, RepositoryError> {
        let state = self.lock();
        let mut documents: Vec<Document> = state
            .documents
            .values()
            .filter(|document| document.company_id == company)
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(documents)
    }

    fn insert_signer(
        &self,
        document: DocumentId,
        signer: NewSigner,
    ) -> Result<Signer, RepositoryError> {
        let mut state = self.lock();
        if !state.documents.contains_key(&document) {
            return Err(RepositoryError::NotFound);
        }
        let signer = state.materialize(signer);
        let stored = state
            .documents
            .get_mut(&document)
            .ok_or(RepositoryError::NotFound)?;
        stored.signers.push(signer.clone());
        stored.updated_at = Utc::now();
        Ok(signer)
    }

    fn update_document(
        &self,
        id: DocumentId,
        apply: &mut dyn FnMut(&mut Document) -> bool,
    ) -> Result<Document, RepositoryError> {
        let mut state = self.lock();
        let stored = state.documents.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        let mut working = stored.clone();
        if apply(&mut working) {
            working.updated_at = Utc::now();
            *stored = working;
        }
        Ok(stored.clone())
    }
}
