//! Fire-and-forget handoff of freshly created documents to the analysis pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::domain::{CompanyId, DocumentId};

/// Pending requests held before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub company_id: CompanyId,
    pub document_id: DocumentId,
    pub file_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis failed: {0}")]
    Failed(String),
}

/// Receives scheduling requests from the orchestrator. Implementations must
/// return immediately and never surface failures to the caller.
pub trait AnalysisTrigger: Send + Sync {
    fn schedule(&self, request: AnalysisRequest);
}

#[async_trait]
pub trait DocumentAnalyzer: Send + Sync + 'static {
    async fn analyze(&self, request: AnalysisRequest) -> Result<(), AnalysisError>;
}

/// Channel-backed trigger; a worker task drains it, running each job in its
/// own task so an error or panic is logged and contained.
#[derive(Debug, Clone)]
pub struct AnalysisQueue {
    sender: mpsc::Sender<AnalysisRequest>,
}

impl AnalysisQueue {
    /// Spawns the worker on the current runtime.
    pub fn spawn<A: DocumentAnalyzer>(analyzer: Arc<A>) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(analyzer, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity<A: DocumentAnalyzer>(
        analyzer: Arc<A>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<AnalysisRequest>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let document_id = request.document_id;
                let analyzer = Arc::clone(&analyzer);
                let job = tokio::spawn(async move { analyzer.analyze(request).await });
                match job.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!(%document_id, error = %err, "document analysis failed")
                    }
                    Err(join) => {
                        error!(%document_id, error = %join, "document analysis task aborted")
                    }
                }
            }
        });
        (Self { sender }, worker)
    }
}

impl AnalysisTrigger for AnalysisQueue {
    fn schedule(&self, request: AnalysisRequest) {
        let document_id = request.document_id;
        match self.sender.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%document_id, "analysis queue is full; dropping request");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%document_id, "analysis worker is gone; dropping request");
            }
        }
    }
}

/// Trigger used when analysis is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAnalysis;

impl AnalysisTrigger for DisabledAnalysis {
    fn schedule(&self, _request: AnalysisRequest) {}
}

/// Default analyzer: records the request. The NLP pipeline plugs in here.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAnalyzer;

#[async_trait]
impl DocumentAnalyzer for LoggingAnalyzer {
    async fn analyze(&self, request: AnalysisRequest) -> Result<(), AnalysisError> {
        info!(
            document_id = %request.document_id,
            company_id = %request.company_id,
            file_url = %request.file_url,
            "document queued for analysis"
        );
        Ok(())
    }
}
