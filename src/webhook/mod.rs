use crate::backup::{upsert_backup_row, BackupRequest};
use crate::config::{Config, TelephonyConfig};
use crate::crm::{
    engagement::{call_title, render_note, NoteContent},
    CallDirection, CallEngagement, Contact, CrmClient,
};
use crate::disposition::{map_disposition, Disposition, DispositionMap};
use crate::error::{best_effort, SyncError, SyncResult};
use crate::models::webhook_log;
use crate::normalize::{agent_display_name, parse_call_duration, resolved, PhoneFormat};
use crate::timestamp::TimestampResolver;
use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub mod payload;

pub use payload::{assign_numbers, CallEvent, TelephonyWebhook};

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// Auto-fired event without an agent disposition.
    Skipped { call_id: Option<String> },
    Processed {
        call_id: String,
        contact_id: String,
        engagement_id: String,
        note_id: Option<String>,
        warnings: Vec<String>,
    },
}

impl WebhookOutcome {
    pub fn to_json(&self) -> Value {
        match self {
            WebhookOutcome::Skipped { call_id } => json!({
                "success": true,
                "skipped": true,
                "callId": call_id,
            }),
            WebhookOutcome::Processed {
                call_id,
                contact_id,
                engagement_id,
                note_id,
                warnings,
            } => json!({
                "success": true,
                "skipped": false,
                "callId": call_id,
                "contactId": contact_id,
                "engagementId": engagement_id,
                "noteId": note_id,
                "warnings": warnings,
            }),
        }
    }
}

/// Turns telephony webhooks into CRM call logs and backup rows. Holds only
/// immutable handles so one instance serves every request.
pub struct WebhookReconciler {
    db: DatabaseConnection,
    crm: Option<Arc<dyn CrmClient>>,
    dispositions: DispositionMap,
    timestamps: TimestampResolver,
    phone: PhoneFormat,
    telephony: TelephonyConfig,
}

impl WebhookReconciler {
    pub fn new(
        db: DatabaseConnection,
        crm: Option<Arc<dyn CrmClient>>,
        dispositions: DispositionMap,
        timestamps: TimestampResolver,
        phone: PhoneFormat,
        telephony: TelephonyConfig,
    ) -> Self {
        Self {
            db,
            crm,
            dispositions,
            timestamps,
            phone,
            telephony,
        }
    }

    pub fn from_config(
        config: &Config,
        db: DatabaseConnection,
        crm: Option<Arc<dyn CrmClient>>,
    ) -> Result<Self> {
        Ok(Self::new(
            db,
            crm,
            config
                .crm
                .as_ref()
                .map(|crm| crm.disposition_map())
                .unwrap_or_default(),
            config.telephony.timestamp_resolver()?,
            config.phone.clone(),
            config.telephony.clone(),
        ))
    }

    pub async fn process(&self, raw: Value) -> SyncResult<WebhookOutcome> {
        let webhook: TelephonyWebhook = serde_json::from_value(raw.clone())
            .map_err(|e| SyncError::InvalidPayload(e.to_string()))?;

        let Some(raw_disposition) = webhook.disposition() else {
            info!(call_id = ?webhook.call_id(), "auto-fired webhook skipped");
            return Ok(WebhookOutcome::Skipped {
                call_id: webhook.call_id().map(str::to_string),
            });
        };

        let mut warnings = Vec::new();
        let contact_id = webhook
            .extern_id()
            .map(|id| self.telephony.strip_extern_prefix(id).to_string())
            .filter(|id| !id.is_empty());
        best_effort(
            "webhook audit log",
            self.log_webhook(webhook.call_id(), contact_id.as_deref(), raw)
                .await,
            &mut warnings,
        );

        let crm = self.crm.as_ref().ok_or(SyncError::NotConfigured("CRM"))?;
        let contact_id = contact_id.ok_or(SyncError::MissingField("extern_id"))?;
        let call_id = webhook
            .call_id()
            .ok_or(SyncError::MissingField("call_id"))?
            .to_string();

        let contact = crm
            .get_contact(&contact_id)
            .await
            .map_err(|e| SyncError::upstream("contact lookup", e))?
            .ok_or_else(|| SyncError::UnknownContact(contact_id.clone()))?;

        let disposition = map_disposition(raw_disposition)?;
        let event = self.build_event(&webhook, call_id, &contact, disposition);

        let call = CallEngagement {
            timestamp: event.start_instant,
            title: call_title(event.direction, event.disposition, &event.agent_display_name),
            body: event.body(),
            direction: event.direction,
            duration_secs: event.duration_seconds,
            disposition_id: self.dispositions.crm_id(event.disposition).to_string(),
            from_number: event.from_number.clone(),
            to_number: event.to_number.clone(),
            recording_url: event.recording_url.clone(),
        };
        let engagement_id = crm
            .create_call(&call, &contact.id)
            .await
            .map_err(|e| SyncError::upstream("call log write", e))?;
        info!(
            call_id = %event.call_id,
            contact_id = %contact.id,
            engagement_id = %engagement_id,
            disposition = %event.disposition,
            "call logged"
        );

        let note = render_note(
            event.disposition,
            &NoteContent {
                agent_name: &event.agent_display_name,
                summary: event.summary.as_deref(),
                notes: event.notes.as_deref(),
                duration_secs: Some(event.duration_seconds),
                recording_url: event.recording_url.as_deref(),
                ..Default::default()
            },
        );
        let note_id = best_effort(
            "note write",
            crm.create_note(&note, event.start_instant, &contact.id).await,
            &mut warnings,
        );

        let customer_phone = match event.direction {
            CallDirection::Outbound => event.to_number.clone(),
            CallDirection::Inbound => event.from_number.clone(),
        };
        let backup = BackupRequest {
            call_id: event.call_id.clone(),
            contact_id: Some(contact.id.clone()),
            engagement_id: Some(engagement_id.clone()),
            agent_name: Some(event.agent_display_name.clone()),
            disposition: Some(event.disposition.as_str().to_string()),
            phone: customer_phone.or_else(|| contact.phone.clone()),
            call_started_at: Some(event.start_instant),
            source_url: event.recording_url.clone(),
        };
        if let Some(status) = best_effort(
            "recording backup registration",
            upsert_backup_row(&self.db, &backup).await,
            &mut warnings,
        ) {
            info!(call_id = %event.call_id, status = %status, "recording backup registered");
        }

        Ok(WebhookOutcome::Processed {
            call_id: event.call_id,
            contact_id: contact.id,
            engagement_id,
            note_id,
            warnings,
        })
    }

    fn build_event(
        &self,
        webhook: &TelephonyWebhook,
        call_id: String,
        contact: &Contact,
        disposition: Disposition,
    ) -> CallEvent {
        let (direction, from_number, to_number) = assign_numbers(
            webhook.explicit_direction(),
            webhook.ani.as_deref(),
            webhook.dnis.as_deref(),
            contact.phone.as_deref(),
            &self.phone,
        );
        let start_instant = match resolved(webhook.call_start.as_deref()) {
            Some(raw) => self.timestamps.resolve(raw),
            None => {
                warn!(call_id = %call_id, "webhook has no call_start, using current time");
                Utc::now()
            }
        };
        CallEvent {
            call_id,
            external_contact_id: contact.id.clone(),
            direction,
            duration_seconds: parse_call_duration(webhook.call_duration.as_deref().unwrap_or_default()),
            start_instant,
            disposition,
            agent_display_name: agent_display_name(
                webhook.agent_username.as_deref(),
                webhook.agent_id.as_deref(),
            ),
            notes: resolved(webhook.notes.as_deref()).map(str::to_string),
            summary: resolved(webhook.summary.as_deref()).map(str::to_string),
            recording_url: webhook.recording_url().map(str::to_string),
            from_number,
            to_number,
        }
    }

    async fn log_webhook(
        &self,
        call_id: Option<&str>,
        contact_id: Option<&str>,
        payload: Value,
    ) -> Result<()> {
        webhook_log::ActiveModel {
            call_id: Set(call_id.map(str::to_string)),
            contact_id: Set(contact_id.map(str::to_string)),
            payload: Set(payload),
            processed_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::mock::MockCrm;
    use crate::models::{call_recording, create_db};
    use sea_orm::{ConnectionTrait, EntityTrait, PaginatorTrait};

    fn reconciler(db: DatabaseConnection, crm: Option<MockCrm>) -> WebhookReconciler {
        WebhookReconciler::new(
            db,
            crm.map(|crm| Arc::new(crm) as Arc<dyn CrmClient>),
            DispositionMap::default(),
            TimestampResolver::from_name("Australia/Sydney").unwrap(),
            PhoneFormat::default(),
            TelephonyConfig::default(),
        )
    }

    fn disposition_webhook() -> Value {
        json!({
            "call_id": 555001,
            "call_duration": "02:05",
            "call_start": "2026-01-29 13:39:00",
            "agent_id": "17",
            "agent_username": "ada.lovelace",
            "extern_id": "hubspot_101",
            "ani": "0412345678",
            "dnis": "0299990000",
            "agent_disposition": "Appointment Booked",
            "notes": "Prefers mornings",
            "summary": "#summary#",
            "recording_url": "https://pbx.example.com/rec/555001.mp3",
        })
    }

    fn known_contact(crm: &mut MockCrm) {
        crm.expect_get_contact()
            .withf(|id| id == "101")
            .returning(|_| {
                Ok(Some(Contact {
                    id: "101".to_string(),
                    phone: Some("+61412345678".to_string()),
                    ..Default::default()
                }))
            });
    }

    #[tokio::test]
    async fn test_auto_fire_is_skipped_without_writes() -> Result<()> {
        let db = create_db("sqlite::memory:").await?;
        let mut payload = disposition_webhook();
        payload["agent_disposition"] = json!("#agent_disposition#");

        // any CRM call would panic on the unconfigured mock
        let outcome = reconciler(db.clone(), Some(MockCrm::new()))
            .process(payload)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Skipped {
                call_id: Some("555001".to_string())
            }
        );
        assert_eq!(outcome.to_json()["skipped"], true);
        assert_eq!(webhook_log::Entity::find().count(&db).await?, 0);
        assert_eq!(call_recording::Entity::find().count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_disposition_webhook_logs_call() -> Result<()> {
        let db = create_db("sqlite::memory:").await?;
        let mut crm = MockCrm::new();
        known_contact(&mut crm);
        crm.expect_create_call()
            .withf(|call, contact_id| {
                contact_id == "101"
                    && call.direction == CallDirection::Inbound
                    && call.from_number.as_deref() == Some("+61412345678")
                    && call.to_number.as_deref() == Some("+61299990000")
                    && call.duration_secs == 125
                    && call.timestamp.timestamp() == 1_769_654_340
                    && call.body == "Prefers mornings"
                    && call.disposition_id == "f240bbac-87c9-4f6e-bf70-924b57d47db7"
            })
            .times(1)
            .returning(|_, _| Ok("9001".to_string()));
        crm.expect_create_note()
            .withf(|body, _, contact_id| {
                contact_id == "101"
                    && body.contains("Notes: Prefers mornings")
                    && body.ends_with("Recording: https://pbx.example.com/rec/555001.mp3")
            })
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("HTTP 400")));

        let outcome = reconciler(db.clone(), Some(crm))
            .process(disposition_webhook())
            .await
            .unwrap();
        let WebhookOutcome::Processed {
            call_id,
            contact_id,
            engagement_id,
            note_id,
            warnings,
        } = outcome
        else {
            panic!("expected processed outcome");
        };
        assert_eq!(call_id, "555001");
        assert_eq!(contact_id, "101");
        assert_eq!(engagement_id, "9001");
        assert_eq!(note_id, None);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("note write failed"));

        assert_eq!(webhook_log::Entity::find().count(&db).await?, 1);
        let rows = call_recording::Entity::find().all(&db).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].backup_status, "pending");
        assert_eq!(rows[0].engagement_id.as_deref(), Some("9001"));
        assert_eq!(rows[0].agent_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(rows[0].phone.as_deref(), Some("+61412345678"));
        Ok(())
    }

    #[tokio::test]
    async fn test_validation_errors() -> Result<()> {
        let db = create_db("sqlite::memory:").await?;

        let err = reconciler(db.clone(), None)
            .process(disposition_webhook())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotConfigured(_)));

        let mut payload = disposition_webhook();
        payload["extern_id"] = json!("#extern_id#");
        let err = reconciler(db.clone(), Some(MockCrm::new()))
            .process(payload)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingField("extern_id")));

        let mut crm = MockCrm::new();
        crm.expect_get_contact().returning(|_| Ok(None));
        let err = reconciler(db.clone(), Some(crm))
            .process(disposition_webhook())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownContact(ref id) if id == "101"));

        let mut crm = MockCrm::new();
        known_contact(&mut crm);
        crm.expect_create_call().never();
        let mut payload = disposition_webhook();
        payload["agent_disposition"] = json!("Maybe Later");
        let err = reconciler(db.clone(), Some(crm))
            .process(payload)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);

        // every disposition-bearing attempt is audited before CRM checks
        assert_eq!(webhook_log::Entity::find().count(&db).await?, 4);
        assert_eq!(call_recording::Entity::find().count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_call_log_failure_is_fatal() -> Result<()> {
        let db = create_db("sqlite::memory:").await?;
        let mut crm = MockCrm::new();
        known_contact(&mut crm);
        crm.expect_create_call()
            .returning(|_, _| Err(anyhow::anyhow!("HTTP 502")));
        crm.expect_create_note().never();
        let err = reconciler(db.clone(), Some(crm))
            .process(disposition_webhook())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Upstream { step: "call log write", .. }));
        assert_eq!(call_recording::Entity::find().count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_webhook_keeps_one_backup_row() -> Result<()> {
        let db = create_db("sqlite::memory:").await?;
        let mut crm = MockCrm::new();
        known_contact(&mut crm);
        crm.expect_create_call()
            .times(2)
            .returning(|_, _| Ok("9001".to_string()));
        crm.expect_create_note()
            .times(2)
            .returning(|_, _, _| Ok("n1".to_string()));
        let reconciler = reconciler(db.clone(), Some(crm));

        reconciler.process(disposition_webhook()).await.unwrap();
        let mut payload = disposition_webhook();
        payload["recording_url"] = json!("#recording_url#");
        let outcome = reconciler.process(payload).await.unwrap();
        assert_eq!(outcome.to_json()["noteId"], "n1");

        let rows = call_recording::Entity::find().all(&db).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].backup_status, "no_recording");
        Ok(())
    }

    fn succeeding_crm() -> MockCrm {
        let mut crm = MockCrm::new();
        known_contact(&mut crm);
        crm.expect_create_call()
            .times(1)
            .returning(|_, _| Ok("9001".to_string()));
        crm.expect_create_note()
            .times(1)
            .returning(|_, _, _| Ok("n1".to_string()));
        crm
    }

    #[tokio::test]
    async fn test_backup_registration_failure_is_a_warning() -> Result<()> {
        let db = create_db("sqlite::memory:").await?;
        db.execute_unprepared("DROP TABLE call_recordings").await?;

        let outcome = reconciler(db.clone(), Some(succeeding_crm()))
            .process(disposition_webhook())
            .await
            .unwrap();
        let json = outcome.to_json();
        assert_eq!(json["success"], true);
        assert_eq!(json["engagementId"], "9001");
        assert_eq!(json["noteId"], "n1");
        let warnings = json["warnings"].as_array().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0]
            .as_str()
            .unwrap()
            .starts_with("recording backup registration failed"));
        assert_eq!(webhook_log::Entity::find().count(&db).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_audit_failure_is_a_warning() -> Result<()> {
        let db = create_db("sqlite::memory:").await?;
        db.execute_unprepared("DROP TABLE webhook_logs").await?;

        let outcome = reconciler(db.clone(), Some(succeeding_crm()))
            .process(disposition_webhook())
            .await
            .unwrap();
        let WebhookOutcome::Processed {
            engagement_id,
            warnings,
            ..
        } = outcome
        else {
            panic!("expected processed outcome");
        };
        assert_eq!(engagement_id, "9001");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("webhook audit log failed"));
        let rows = call_recording::Entity::find().all(&db).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].backup_status, "pending");
        Ok(())
    }
}
