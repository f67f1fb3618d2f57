use metrics_exporter_prometheus::PrometheusHandle;
use signflow::signing::{
    AnalysisTrigger, ProviderFactory, SignatureOrchestrator, SignatureRepository,
    WebhookReconciler,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Both reconciliation channels wired to one store and one provider factory.
pub(crate) struct SigningServices<R, A> {
    pub(crate) orchestrator: Arc<SignatureOrchestrator<R, A>>,
    pub(crate) webhooks: Arc<WebhookReconciler<R>>,
}

pub(crate) fn signing_services<R, A>(
    repository: Arc<R>,
    factory: Arc<ProviderFactory>,
    analysis: Arc<A>,
) -> SigningServices<R, A>
where
    R: SignatureRepository + 'static,
    A: AnalysisTrigger + 'static,
{
    let orchestrator = Arc::new(SignatureOrchestrator::new(
        Arc::clone(&repository),
        Arc::clone(&factory),
        analysis,
    ));
    let webhooks = Arc::new(WebhookReconciler::new(repository, factory));
    SigningServices {
        orchestrator,
        webhooks,
    }
}
