use crate::config::Config;
use crate::crm::{
    engagement::{render_note, NoteContent},
    resolve, CrmClient,
};
use crate::disposition::fields::{DispositionForm, FieldBuilder};
use crate::error::{best_effort, SyncError, SyncResult};
use crate::models::form_submission;
use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionOutcome {
    pub submission_id: String,
    pub contact_id: String,
    pub contact_created: bool,
    pub deal_id: Option<String>,
    pub note_id: Option<String>,
    pub warnings: Vec<String>,
}

impl SubmissionOutcome {
    pub fn to_json(&self) -> Value {
        json!({
            "success": true,
            "submissionId": self.submission_id,
            "contactId": self.contact_id,
            "contactCreated": self.contact_created,
            "dealId": self.deal_id,
            "noteId": self.note_id,
            "warnings": self.warnings,
        })
    }
}

/// Applies an agent's disposition form to the CRM.
pub struct DispositionService {
    db: DatabaseConnection,
    crm: Option<Arc<dyn CrmClient>>,
    fields: FieldBuilder,
    deal_pipeline: String,
    deal_stage: String,
}

impl DispositionService {
    pub fn new(
        db: DatabaseConnection,
        crm: Option<Arc<dyn CrmClient>>,
        fields: FieldBuilder,
        deal_pipeline: String,
        deal_stage: String,
    ) -> Self {
        Self {
            db,
            crm,
            fields,
            deal_pipeline,
            deal_stage,
        }
    }

    pub fn from_config(config: &Config, db: DatabaseConnection, crm: Option<Arc<dyn CrmClient>>) -> Self {
        let crm_config = config.crm.clone().unwrap_or_default();
        Self::new(
            db,
            crm,
            FieldBuilder::new(config.phone.clone()),
            crm_config.deal_pipeline,
            crm_config.deal_stage,
        )
    }

    pub async fn submit(&self, raw: Value) -> SyncResult<SubmissionOutcome> {
        let form = DispositionForm::from_value(raw.clone())?;
        let crm = self.crm.as_ref().ok_or(SyncError::NotConfigured("CRM"))?;
        let disposition = form.disposition();
        let properties = self.fields.build(&form);
        let contact = form.contact();

        let resolution = resolve(
            crm.as_ref(),
            contact.contact_id.as_deref(),
            contact.email.as_deref(),
            properties.get("phone"),
            &properties,
        )
        .await
        .map_err(|e| SyncError::upstream("contact resolution", e))?;
        if !resolution.created() {
            crm.update_contact(&resolution.id, &properties)
                .await
                .map_err(|e| SyncError::upstream("contact update", e))?;
        }
        info!(
            contact_id = %resolution.id,
            matched_by = ?resolution.matched_by,
            disposition = %disposition,
            properties = properties.len(),
            "disposition applied to contact"
        );

        let mut warnings = Vec::new();
        let deal_id = match form.deal_request() {
            Some(deal) => best_effort(
                "deal creation",
                crm.create_deal(&deal, &self.deal_pipeline, &self.deal_stage, &resolution.id)
                    .await,
                &mut warnings,
            ),
            None => None,
        };

        let context = form.context();
        let sub_reason = form.sub_reason();
        let agent = context
            .agent_name
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or("Unknown Agent");
        let note = render_note(
            disposition,
            &NoteContent {
                agent_name: agent,
                sub_reason: sub_reason.as_deref(),
                notes: context.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()),
                ..Default::default()
            },
        );
        let note_id = best_effort(
            "note write",
            crm.create_note(&note, Utc::now(), &resolution.id).await,
            &mut warnings,
        );

        let submission_id = uuid::Uuid::new_v4().to_string();
        best_effort(
            "submission audit log",
            self.log_submission(&submission_id, &form, &resolution.id, raw)
                .await,
            &mut warnings,
        );

        Ok(SubmissionOutcome {
            submission_id,
            contact_created: resolution.created(),
            contact_id: resolution.id,
            deal_id,
            note_id,
            warnings,
        })
    }

    async fn log_submission(
        &self,
        submission_id: &str,
        form: &DispositionForm,
        contact_id: &str,
        payload: Value,
    ) -> Result<()> {
        form_submission::ActiveModel {
            submission_id: Set(submission_id.to_string()),
            disposition: Set(form.disposition().as_str().to_string()),
            contact_id: Set(Some(contact_id.to_string())),
            agent_name: Set(form.context().agent_name.clone()),
            payload: Set(payload),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }
}
