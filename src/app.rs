use crate::backup::{BackupPolicy, RecordingBackupWorker};
use crate::config::Config;
use crate::crm::{CrmClient, HubspotClient};
use crate::error::{SyncError, SyncResult};
use crate::handler::middleware::request_log::log_requests;
use crate::models::create_db;
use crate::storage::Storage;
use crate::submission::DispositionService;
use crate::telephony::{HttpRecordingSource, RecordingSource};
use crate::webhook::WebhookReconciler;
use anyhow::Result;
use axum::{middleware, Router};
use sea_orm::DatabaseConnection;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub db: DatabaseConnection,
    pub crm: Option<Arc<dyn CrmClient>>,
    pub storage: Option<Storage>,
    pub recording_source: Arc<dyn RecordingSource>,
    pub reconciler: WebhookReconciler,
    pub dispositions: DispositionService,
    pub token: CancellationToken,
}

pub type AppState = Arc<AppStateInner>;

#[derive(Default)]
pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub db: Option<DatabaseConnection>,
    pub crm: Option<Arc<dyn CrmClient>>,
    pub recording_source: Option<Arc<dyn RecordingSource>>,
}

impl AppStateInner {
    /// A worker over the shared handles. Fails when no storage is configured.
    pub fn backup_worker(&self) -> SyncResult<RecordingBackupWorker> {
        let storage = self
            .storage
            .clone()
            .ok_or(SyncError::NotConfigured("recording storage"))?;
        Ok(RecordingBackupWorker::new(
            self.db.clone(),
            storage,
            self.recording_source.clone(),
            BackupPolicy::new(self.config.backup.max_attempts),
            self.config.backup.batch_size,
        )
        .with_crm(self.crm.clone())
        .with_public_url(self.config.public_url.clone()))
    }
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_db(mut self, db: DatabaseConnection) -> Self {
        self.db = Some(db);
        self
    }

    /// Overrides the client otherwise built from `[crm]`.
    pub fn with_crm(mut self, crm: Arc<dyn CrmClient>) -> Self {
        self.crm = Some(crm);
        self
    }

    pub fn with_recording_source(mut self, source: Arc<dyn RecordingSource>) -> Self {
        self.recording_source = Some(source);
        self
    }

    pub async fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        config.check()?;

        let db = match self.db {
            Some(db) => db,
            None => create_db(&config.database_url).await?,
        };

        let crm = match self.crm {
            Some(crm) => Some(crm),
            None => {
                let client = match config.crm.as_ref() {
                    Some(crm) => HubspotClient::from_config(crm)?,
                    None => None,
                };
                if client.is_none() {
                    warn!("CRM access token not configured; webhook and form processing will fail");
                }
                client.map(|c| Arc::new(c) as Arc<dyn CrmClient>)
            }
        };

        let storage = match config.storage.as_ref() {
            Some(storage) => Some(Storage::new(storage)?),
            None => {
                warn!("recording storage not configured; backups are disabled");
                None
            }
        };

        let recording_source = match self.recording_source {
            Some(source) => source,
            None => Arc::new(HttpRecordingSource::new(&config.telephony)?) as Arc<dyn RecordingSource>,
        };

        let reconciler = WebhookReconciler::from_config(&config, db.clone(), crm.clone())?;
        let dispositions = DispositionService::from_config(&config, db.clone(), crm.clone());

        Ok(Arc::new(AppStateInner {
            config,
            db,
            crm,
            storage,
            recording_source,
            reconciler,
            dispositions,
            token: CancellationToken::new(),
        }))
    }
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();
    let app = create_router(state.clone());
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };
    info!("listening on {}", addr);

    let http_task = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    select! {
        http_result = http_task => {
            match http_result {
                Ok(_) => info!("Server shut down gracefully"),
                Err(e) => {
                    tracing::error!("Server error: {}", e);
                    return Err(anyhow::anyhow!("Server error: {}", e));
                }
            }
        }
        _ = token.cancelled() => {
            info!("Application shutting down due to cancellation");
        }
    }
    token.cancel();
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);

    let skip_paths = Arc::new(state.config.access_log_skip_paths.clone());
    crate::handler::router()
        .with_state(state)
        .layer(middleware::from_fn_with_state(skip_paths, log_requests))
        .layer(cors)
}
