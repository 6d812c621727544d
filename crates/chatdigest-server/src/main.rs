use std::{env, net::SocketAddr, sync::Arc};

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use chatdigest_core::{
    ChatSummarizer, Classifier, Config, Database, GenaiLLMClient, LLMClient, LibsqlStore,
    LocalArchive, MessageStore, RuleRepository, RuleStore, RunRepository, RunnerSettings,
    SchedulerConfig, SummarizerSettings, TelegramTransport, Transport, WindowedRunner,
    init_telemetry, migrations, run_scheduler,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod api;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub classifier: Arc<Classifier>,
    pub runner: Arc<WindowedRunner>,
    pub next_run: watch::Receiver<Option<DateTime<Utc>>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = init_telemetry(&config.app, &config.telemetry)?;

    let db = Database::new(&config.paths.database).await?;
    migrations::run_migrations(&db).await?;
    let interrupted = RunRepository::new(db.clone()).fail_interrupted().await?;
    if interrupted > 0 {
        warn!(count = interrupted, "marked interrupted runs as failed");
    }

    let rule_store: Arc<dyn RuleStore> = Arc::new(RuleRepository::new(db.clone()));
    let classifier = Arc::new(Classifier::load(rule_store).await?);

    let llm: Arc<dyn LLMClient> = Arc::new(GenaiLLMClient::new(db.clone(), &config.model));
    let summarizer = ChatSummarizer::new(
        llm,
        SummarizerSettings::from_config(&config.model, &config.summarizer),
    );
    let store: Arc<dyn MessageStore> = Arc::new(LibsqlStore::new(db.clone()));
    let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::from_config(&config.telegram));

    let mut runner = WindowedRunner::new(
        store,
        classifier.clone(),
        summarizer,
        transport,
        RunnerSettings::from_config(&config),
    );
    if config.archive.enabled {
        info!(dir = %config.archive.dir.display(), "archiving enabled");
        runner = runner.with_archive(Arc::new(LocalArchive::new(config.archive.dir.clone())));
    }
    let runner = Arc::new(runner);

    let shutdown = CancellationToken::new();
    let (next_run_tx, next_run) = watch::channel(None);
    let scheduler_handle = tokio::spawn(run_scheduler(
        runner.clone(),
        SchedulerConfig::from_config(&config.schedule),
        next_run_tx,
        shutdown.child_token(),
    ));

    let state = AppState {
        db: db.clone(),
        classifier,
        runner,
        next_run,
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("chatdigest listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = scheduler_handle.await;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api::router())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    database: String,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_status = match state.db.health_check().await {
        Ok(_) => "ok",
        Err(_) => "unhealthy",
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if db_status == "ok" {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: db_status.to_string(),
        }),
    )
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, shutting down");
        }
        _ = terminate => {
            warn!("received terminate signal, shutting down");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chatdigest_core::{
        ChatSummarizer, Classifier, Database, LibsqlStore, MockLLMClient, RuleRepository,
        RunnerSettings, SummarizerSettings, Transport, TransportError, WindowedRunner,
        migrations::run_migrations,
    };
    use tempfile::TempDir;
    use tokio::sync::watch;

    use crate::AppState;

    /// Records sent texts. Sending waits while a test holds `hold`.
    #[derive(Default, Clone)]
    pub struct RecordingTransport {
        pub sent: Arc<Mutex<Vec<(String, String)>>>,
        pub hold: Arc<tokio::sync::Mutex<()>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_text(&self, target: &str, text: &str) -> Result<(), TransportError> {
            let _held = self.hold.lock().await;
            self.sent
                .lock()
                .expect("sent lock")
                .push((target.to_string(), text.to_string()));
            Ok(())
        }
    }

    pub struct TestApp {
        pub state: AppState,
        pub llm: MockLLMClient,
        pub transport: RecordingTransport,
        pub _dir: TempDir,
    }

    pub async fn test_app() -> TestApp {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("test.sqlite"))
            .await
            .expect("create db");
        run_migrations(&db).await.expect("migrations");

        let classifier = Arc::new(
            Classifier::load(Arc::new(RuleRepository::new(db.clone())))
                .await
                .expect("classifier"),
        );
        let llm = MockLLMClient::new();
        let transport = RecordingTransport::default();
        let runner = WindowedRunner::new(
            Arc::new(LibsqlStore::new(db.clone())),
            classifier.clone(),
            ChatSummarizer::new(
                Arc::new(llm.clone()),
                SummarizerSettings {
                    char_budget: 16_000,
                    temperature: 0.2,
                    max_tokens: 500,
                },
            ),
            Arc::new(transport.clone()),
            RunnerSettings {
                window: chrono::Duration::hours(1),
                run_timeout: std::time::Duration::from_secs(30),
                concurrency: 2,
                target_chat_id: "owner".into(),
            },
        );
        let (_tx, next_run) = watch::channel(None);

        TestApp {
            state: AppState {
                db,
                classifier,
                runner: Arc::new(runner),
                next_run,
            },
            llm,
            transport,
            _dir: dir,
        }
    }
}
