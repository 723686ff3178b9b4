use std::sync::Arc;

use facturo_api::app::{self, services::AppServices};
use facturo_infra::jobs::queue::QueueConfig;
use facturo_ocr::{TesseractCli, TesseractConfig};
use facturo_sunat::{ScriptRetriever, ScriptRetrieverConfig, SireClient, SireConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    facturo_observability::init();

    let automation_cmd = std::env::var("FACTURO_AUTOMATION_CMD").unwrap_or_else(|_| {
        tracing::warn!("FACTURO_AUTOMATION_CMD not set; using `node`");
        "node".to_string()
    });
    let automation_args = std::env::var("FACTURO_AUTOMATION_ARGS")
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_else(|_| vec!["scripts/portal-download.js".to_string()]);

    let retriever = Arc::new(ScriptRetriever::new(ScriptRetrieverConfig {
        command: automation_cmd,
        args: automation_args,
    }));
    let recognizer = Arc::new(TesseractCli::new(TesseractConfig::default()));

    let sire = match SireConfig::from_env() {
        Ok(config) => Some(SireClient::new(config)),
        Err(e) => {
            tracing::warn!(error = %e, "SIRE reporting disabled");
            None
        }
    };

    let workers = std::env::var("FACTURO_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);

    let services = AppServices::build(
        retriever,
        recognizer,
        sire,
        QueueConfig::default(),
        workers,
    );
    let app = app::build_app(services);

    let addr = std::env::var("FACTURO_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
