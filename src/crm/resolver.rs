use super::CrmClient;
use crate::disposition::fields::CrmProperties;
use anyhow::Result;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    Explicit,
    Email,
    Phone,
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactResolution {
    pub id: String,
    pub matched_by: MatchedBy,
}

impl ContactResolution {
    pub fn created(&self) -> bool {
        self.matched_by == MatchedBy::Created
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Finds the contact for a submission: explicit id, then exact email, then
/// exact phone, otherwise a new contact created from `properties`.
pub async fn resolve(
    crm: &dyn CrmClient,
    explicit_id: Option<&str>,
    email: Option<&str>,
    phone: Option<&str>,
    properties: &CrmProperties,
) -> Result<ContactResolution> {
    if let Some(id) = present(explicit_id) {
        return Ok(ContactResolution {
            id: id.to_string(),
            matched_by: MatchedBy::Explicit,
        });
    }
    if let Some(email) = present(email) {
        if let Some(id) = crm.search_contact("email", email).await? {
            return Ok(ContactResolution {
                id,
                matched_by: MatchedBy::Email,
            });
        }
    }
    if let Some(phone) = present(phone) {
        if let Some(id) = crm.search_contact("phone", phone).await? {
            return Ok(ContactResolution {
                id,
                matched_by: MatchedBy::Phone,
            });
        }
    }
    let id = crm.create_contact(properties).await?;
    info!(contact_id = %id, "created crm contact");
    Ok(ContactResolution {
        id,
        matched_by: MatchedBy::Created,
    })
}
