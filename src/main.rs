use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;

use llm_service::utils::{setup_logging, LogConfig};
use llm_service::{api, LlmService, ServiceConfig};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = setup_logging(LogConfig::from(&config.monitoring)) {
        eprintln!("{}", e);
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "service terminated");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    tracing::info!(
        version = llm_service::VERSION,
        model = %config.model.model_id,
        device = ?config.model.device,
        "starting service"
    );

    let addr = config.server.bind_addr();
    let service = LlmService::builder()
        .with_config(config)
        .build()
        .await
        .context("model failed to load")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, "listening");

    api::serve(listener, Arc::new(service), shutdown_signal()).await?;
    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
