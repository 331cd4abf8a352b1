use crate::config::recording_stream_url;
use crate::crm::{engagement::patch_call_recording_url, CrmClient};
use crate::models::call_recording::{self, Column};
use crate::storage::Storage;
use crate::telephony::RecordingSource;
use crate::utils::sanitize_id;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    NoRecording,
    Pending,
    Downloading,
    Uploaded,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::NoRecording => "no_recording",
            BackupStatus::Pending => "pending",
            BackupStatus::Downloading => "downloading",
            BackupStatus::Uploaded => "uploaded",
            BackupStatus::Failed => "failed",
        }
    }

    /// Rows in a terminal state are never picked up by the worker again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackupStatus::NoRecording | BackupStatus::Uploaded | BackupStatus::Failed
        )
    }

    pub fn initial(source_url: Option<&str>) -> Self {
        if source_url.is_some_and(|url| !url.trim().is_empty()) {
            BackupStatus::Pending
        } else {
            BackupStatus::NoRecording
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_recording" => Ok(BackupStatus::NoRecording),
            "pending" => Ok(BackupStatus::Pending),
            "downloading" => Ok(BackupStatus::Downloading),
            "uploaded" => Ok(BackupStatus::Uploaded),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(anyhow!("unknown backup status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupPolicy {
    pub max_attempts: u32,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl BackupPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn can_attempt(&self, attempts: i32) -> bool {
        attempts < self.max_attempts as i32
    }

    /// Status after the `attempts`-th try failed.
    pub fn after_failure(&self, attempts: i32) -> BackupStatus {
        if self.can_attempt(attempts) {
            BackupStatus::Pending
        } else {
            BackupStatus::Failed
        }
    }
}

/// What the reconciler knows about a call when it registers its recording.
#[derive(Debug, Clone, Default)]
pub struct BackupRequest {
    pub call_id: String,
    pub contact_id: Option<String>,
    pub engagement_id: Option<String>,
    pub agent_name: Option<String>,
    pub disposition: Option<String>,
    pub phone: Option<String>,
    pub call_started_at: Option<DateTime<Utc>>,
    pub source_url: Option<String>,
}

/// Inserts the backup row for a call. A repeated webhook overwrites the row
/// and restarts the backup, unless the row is already `downloading` or
/// `uploaded`: then only the call metadata is refreshed and the backup state
/// is left to the worker.
pub async fn upsert_backup_row(db: &DatabaseConnection, request: &BackupRequest) -> Result<BackupStatus> {
    let now = Utc::now();
    if let Some(existing) = call_recording::Entity::find()
        .filter(Column::CallId.eq(request.call_id.as_str()))
        .one(db)
        .await?
    {
        let current: BackupStatus = existing.backup_status.parse()?;
        if matches!(current, BackupStatus::Downloading | BackupStatus::Uploaded) {
            let mut active: call_recording::ActiveModel = existing.into();
            active.contact_id = Set(request.contact_id.clone());
            active.engagement_id = Set(request.engagement_id.clone());
            active.agent_name = Set(request.agent_name.clone());
            active.disposition = Set(request.disposition.clone());
            active.phone = Set(request.phone.clone());
            active.source_url = Set(request.source_url.clone());
            active.updated_at = Set(now);
            active.update(db).await?;
            return Ok(current);
        }
    }

    let status = BackupStatus::initial(request.source_url.as_deref());
    let row = call_recording::ActiveModel {
        call_id: Set(request.call_id.clone()),
        contact_id: Set(request.contact_id.clone()),
        engagement_id: Set(request.engagement_id.clone()),
        agent_name: Set(request.agent_name.clone()),
        disposition: Set(request.disposition.clone()),
        phone: Set(request.phone.clone()),
        call_started_at: Set(request.call_started_at),
        source_url: Set(request.source_url.clone()),
        backup_status: Set(status.as_str().to_string()),
        backup_attempts: Set(0),
        storage_file_id: Set(None),
        storage_url: Set(None),
        last_error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    call_recording::Entity::insert(row)
        .on_conflict(
            OnConflict::column(Column::CallId)
                .update_columns([
                    Column::ContactId,
                    Column::EngagementId,
                    Column::AgentName,
                    Column::Disposition,
                    Column::Phone,
                    Column::CallStartedAt,
                    Column::SourceUrl,
                    Column::BackupStatus,
                    Column::BackupAttempts,
                    Column::StorageFileId,
                    Column::StorageUrl,
                    Column::LastError,
                    Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(status)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub processed: usize,
    pub uploaded: usize,
    pub retried: usize,
    pub failed: usize,
    pub no_recording: usize,
}

/// `<date>_<time>_<agent>_<disposition>_<phone>.<ext>`, stable for a given row.
pub fn recording_filename(row: &call_recording::Model, ext: &str) -> String {
    let started = row.call_started_at.unwrap_or(row.created_at);
    let part = |value: Option<&str>| {
        value
            .map(sanitize_id)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    };
    let phone: String = row
        .phone
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    format!(
        "{}_{}_{}_{}_{}.{}",
        started.format("%Y-%m-%d"),
        started.format("%H%M%S"),
        part(row.agent_name.as_deref()),
        part(row.disposition.as_deref()),
        if phone.is_empty() { "unknown" } else { phone.as_str() },
        ext
    )
}

fn object_key(row: &call_recording::Model, ext: &str) -> String {
    let started = row.call_started_at.unwrap_or(row.created_at);
    format!("{}/{}", started.format("%Y/%m"), recording_filename(row, ext))
}

/// Moves pending recordings from the telephony platform into storage.
pub struct RecordingBackupWorker {
    db: DatabaseConnection,
    storage: Storage,
    source: Arc<dyn RecordingSource>,
    crm: Option<Arc<dyn CrmClient>>,
    policy: BackupPolicy,
    batch_size: u64,
    public_url: Option<String>,
}

enum RowOutcome {
    Uploaded,
    Retried,
    Failed,
    NoRecording,
}

impl RecordingBackupWorker {
    pub fn new(
        db: DatabaseConnection,
        storage: Storage,
        source: Arc<dyn RecordingSource>,
        policy: BackupPolicy,
        batch_size: u64,
    ) -> Self {
        Self {
            db,
            storage,
            source,
            crm: None,
            policy,
            batch_size: batch_size.max(1),
            public_url: None,
        }
    }

    pub fn with_crm(mut self, crm: Option<Arc<dyn CrmClient>>) -> Self {
        self.crm = crm;
        self
    }

    /// Base URL of this service, used to point CRM calls at the stream route.
    pub fn with_public_url(mut self, public_url: Option<String>) -> Self {
        self.public_url = public_url;
        self
    }

    /// Processes at most one batch of eligible rows, oldest first.
    pub async fn run_batch(&self) -> Result<BatchReport> {
        let rows = call_recording::Entity::find()
            .filter(Column::BackupStatus.eq(BackupStatus::Pending.as_str()))
            .filter(Column::BackupAttempts.lt(self.policy.max_attempts as i32))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .limit(self.batch_size)
            .all(&self.db)
            .await?;

        let mut report = BatchReport::default();
        for row in rows {
            report.processed += 1;
            match self.process_row(row).await? {
                RowOutcome::Uploaded => report.uploaded += 1,
                RowOutcome::Retried => report.retried += 1,
                RowOutcome::Failed => report.failed += 1,
                RowOutcome::NoRecording => report.no_recording += 1,
            }
        }
        if report.processed > 0 {
            info!(?report, "recording backup batch finished");
        }
        Ok(report)
    }

    async fn process_row(&self, row: call_recording::Model) -> Result<RowOutcome> {
        let attempts = row.backup_attempts + 1;
        let mut active: call_recording::ActiveModel = row.clone().into();
        active.backup_status = Set(BackupStatus::Downloading.as_str().to_string());
        active.backup_attempts = Set(attempts);
        active.updated_at = Set(Utc::now());
        let row = active.update(&self.db).await?;

        let Some(source_url) = row.source_url.clone().filter(|u| !u.trim().is_empty()) else {
            self.finish(&row, BackupStatus::NoRecording, None).await?;
            return Ok(RowOutcome::NoRecording);
        };

        match self.copy_recording(&row, &source_url).await {
            Ok((file_id, storage_url)) => {
                let mut active: call_recording::ActiveModel = row.clone().into();
                active.backup_status = Set(BackupStatus::Uploaded.as_str().to_string());
                active.storage_file_id = Set(Some(file_id.clone()));
                active.storage_url = Set(storage_url);
                active.last_error = Set(None);
                active.updated_at = Set(Utc::now());
                active.update(&self.db).await?;
                info!(call_id = %row.call_id, file_id = %file_id, "recording backed up");
                self.patch_crm(&row).await;
                Ok(RowOutcome::Uploaded)
            }
            Err(e) => {
                let status = self.policy.after_failure(attempts);
                warn!(
                    call_id = %row.call_id,
                    attempts,
                    status = %status,
                    "recording backup failed: {:#}",
                    e
                );
                self.finish(&row, status, Some(format!("{:#}", e))).await?;
                Ok(if status == BackupStatus::Failed {
                    RowOutcome::Failed
                } else {
                    RowOutcome::Retried
                })
            }
        }
    }

    async fn finish(
        &self,
        row: &call_recording::Model,
        status: BackupStatus,
        last_error: Option<String>,
    ) -> Result<()> {
        let mut active: call_recording::ActiveModel = row.clone().into();
        active.backup_status = Set(status.as_str().to_string());
        active.last_error = Set(last_error);
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn copy_recording(
        &self,
        row: &call_recording::Model,
        source_url: &str,
    ) -> Result<(String, Option<String>)> {
        let media = self.source.fetch(source_url).await?;
        let key = object_key(row, &media.extension(source_url));
        let file_id = self
            .storage
            .write(&key, media.bytes, media.content_type.as_deref())
            .await?;
        let storage_url = match self.storage.public_url(&file_id) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(call_id = %row.call_id, "no public url for recording: {}", e);
                None
            }
        };
        Ok((file_id, storage_url))
    }

    async fn patch_crm(&self, row: &call_recording::Model) {
        let (Some(crm), Some(engagement_id), Some(public_url)) = (
            self.crm.as_ref(),
            row.engagement_id.as_deref(),
            self.public_url.as_deref(),
        ) else {
            return;
        };
        let url = recording_stream_url(public_url, &row.call_id);
        if let Err(e) = patch_call_recording_url(crm.as_ref(), engagement_id, &url).await {
            warn!(call_id = %row.call_id, engagement_id, "crm recording url patch failed: {:#}", e);
        }
    }
}
