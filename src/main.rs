use std::process::ExitCode;
use std::sync::Arc;

use pgmend::db::handle::{ConnectionFactory, PgConnectionFactory};
use pgmend::db::supervisor::Supervisor;
use pgmend::shutdown::ShutdownCoordinator;
use pgmend::{config, db, routes, state};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env();

    let target = db::target::resolve(&config.service, config.role);
    match &target {
        Some(target) => tracing::info!(%target, "PostgreSQL target resolved"),
        None => tracing::error!(
            key = %db::target::connection_key(&config.service),
            role = %config.role,
            "PostgreSQL target configuration absent"
        ),
    }

    // Non-fatal: the database may still be starting; the supervisor heals later.
    if config.run_migrations {
        if let Some(target) = &target {
            if let Err(e) = db::run_migrations(target).await {
                tracing::warn!(error = %e, "schema migrations skipped");
            }
        }
    }

    let factory: Arc<dyn ConnectionFactory> = Arc::new(PgConnectionFactory::new(config.connect_timeout));
    let (supervisor, supervisor_task) = Supervisor::start(target, factory, config.reconnect);

    let coordinator = ShutdownCoordinator::new();
    let _signals = coordinator.listen_for_signals();

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, port = config.port, "failed to bind");
            coordinator.release(&supervisor).await;
            return ExitCode::FAILURE;
        }
    };

    let app = routes::app(state::AppState::new(supervisor.clone(), config.role));
    let server = {
        let coordinator = coordinator.clone();
        axum::serve(listener, app).with_graceful_shutdown(async move {
            coordinator.triggered().await;
        })
    };

    tracing::info!(port = config.port, "listening; the web server started");
    let code = coordinator
        .run_until_shutdown(server.into_future(), &supervisor, config.shutdown_grace)
        .await;

    if let Err(e) = supervisor_task.await {
        tracing::error!(error = %e, "supervisor task ended abnormally");
    }
    tracing::info!("shutdown complete");
    code
}
