use crate::cli::ServeArgs;
use crate::infra::{signing_services, AppState};
use crate::routes::with_signing_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use signflow::config::AppConfig;
use signflow::error::AppError;
use signflow::signing::{
    AnalysisQueue, DisabledAnalysis, InMemorySignatureRepository, LoggingAnalyzer,
    ProviderFactory, ProviderSettings,
};
use signflow::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(InMemorySignatureRepository::default());
    let factory = Arc::new(ProviderFactory::new(ProviderSettings::from(
        &config.provider,
    )));

    let app = if config.analysis.enabled {
        let (queue, _worker) = AnalysisQueue::spawn(Arc::new(LoggingAnalyzer));
        with_signing_routes(signing_services(repository, factory, Arc::new(queue)))
    } else {
        info!("document analysis disabled");
        with_signing_routes(signing_services(
            repository,
            factory,
            Arc::new(DisabledAnalysis),
        ))
    }
    .layer(Extension(app_state))
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "signature service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
