//! Signature lifecycle reconciliation.
//!
//! Two independent channels write the same document rows: callers polling
//! through [`SignatureOrchestrator::refresh_status`] and providers pushing
//! through [`WebhookReconciler::handle`]. Both apply forward-only deltas and
//! recompute the internal status with [`derive_internal_status`], so they
//! converge regardless of arrival order.

pub mod alerts;
pub mod analysis;
pub mod domain;
pub mod orchestrator;
pub mod provider;
pub mod repository;
pub mod retry;
pub mod router;
pub mod status;
pub mod webhook;

#[cfg(test)]
mod tests;

pub use alerts::{
    document_alerts, document_metrics, AlertKind, AlertSeverity, DocumentAlert, DocumentMetrics,
};
pub use analysis::{
    AnalysisError, AnalysisQueue, AnalysisRequest, AnalysisTrigger, DisabledAnalysis,
    DocumentAnalyzer, LoggingAnalyzer,
};
pub use domain::{
    Company, CompanyId, CompanyRequest, CreateOptions, Document, DocumentId, DocumentRequest,
    ProviderBinding, Signer, SignerId, SignerInput, ZapSignOptions,
};
pub use orchestrator::{OrchestratorError, SignatureOrchestrator};
pub use provider::{
    CreateDocumentRequest, CreatedDocument, DocumentSnapshot, FactoryError, ProviderError,
    ProviderFactory, ProviderKey, ProviderSettings, ProviderStrategy, SignerReceipt,
    SignerSnapshot, StrategyBuilder, WebhookEvent, WebhookEventKind, ZapSignStrategy,
};
pub use repository::{InMemorySignatureRepository, RepositoryError, SignatureRepository};
pub use retry::RetryPolicy;
pub use router::{signing_router, SigningState};
pub use status::{derive_internal_status, InternalStatus, SignerStatus};
pub use webhook::{DiscardReason, WebhookOutcome, WebhookReconciler};
