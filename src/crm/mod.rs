use crate::config::CrmConfig;
use crate::disposition::fields::{CrmProperties, DealRequest};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub mod engagement;
#[cfg(test)]
pub(crate) mod mock;
pub mod resolver;

pub use engagement::{CallDirection, CallEngagement};
pub use resolver::{resolve, ContactResolution, MatchedBy};

pub const CALL_TO_CONTACT: u32 = 194;
pub const NOTE_TO_CONTACT: u32 = 202;
pub const DEAL_TO_CONTACT: u32 = 3;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// The CRM object operations the reconciler and form service need.
#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn get_contact(&self, id: &str) -> Result<Option<Contact>>;
    /// Exact-match search on one contact property, returning the first id.
    async fn search_contact(&self, property: &str, value: &str) -> Result<Option<String>>;
    async fn create_contact(&self, properties: &CrmProperties) -> Result<String>;
    async fn update_contact(&self, id: &str, properties: &CrmProperties) -> Result<()>;
    async fn create_call(&self, call: &CallEngagement, contact_id: &str) -> Result<String>;
    async fn update_call(&self, id: &str, properties: &CrmProperties) -> Result<()>;
    async fn create_note(
        &self,
        body: &str,
        timestamp: DateTime<Utc>,
        contact_id: &str,
    ) -> Result<String>;
    async fn create_deal(
        &self,
        deal: &DealRequest,
        pipeline: &str,
        stage: &str,
        contact_id: &str,
    ) -> Result<String>;
}

#[derive(Deserialize)]
struct ObjectRef {
    id: String,
}

#[derive(Deserialize)]
struct ContactObject {
    id: String,
    #[serde(default)]
    properties: std::collections::HashMap<String, Option<String>>,
}

#[derive(Deserialize)]
struct SearchResults {
    #[serde(default)]
    results: Vec<ObjectRef>,
}

fn association(to_id: &str, type_id: u32) -> Value {
    json!([{
        "to": { "id": to_id },
        "types": [{
            "associationCategory": "HUBSPOT_DEFINED",
            "associationTypeId": type_id,
        }],
    }])
}

/// HubSpot CRM v3 object API client.
pub struct HubspotClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HubspotClient {
    pub fn new(base_url: &str, token: &str, timeout: Option<Duration>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::version::get_useragent())
            .timeout(timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
            .build()
            .context("build crm http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// `Ok(None)` when no access token is available.
    pub fn from_config(config: &CrmConfig) -> Result<Option<Self>> {
        let Some(token) = config.access_token() else {
            return Ok(None);
        };
        Self::new(
            &config.base_url,
            &token,
            config.timeout_secs.map(Duration::from_secs),
        )
        .map(Some)
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("{} {}", method, path))?;
        debug!(%method, path, status = %response.status(), "crm request");
        Ok(response)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let response = self.send(method.clone(), path, body).await?;
        let response = check_status(response, &method, path).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("decode response of {} {}", method, path))
    }

    async fn create_object(&self, object: &str, body: Value) -> Result<String> {
        let created: ObjectRef = self
            .call(Method::POST, &format!("/crm/v3/objects/{}", object), Some(&body))
            .await?;
        Ok(created.id)
    }

    async fn patch_object(&self, object: &str, id: &str, properties: &CrmProperties) -> Result<()> {
        let path = format!("/crm/v3/objects/{}/{}", object, urlencoding::encode(id));
        let body = json!({ "properties": properties });
        let response = self.send(Method::PATCH, &path, Some(&body)).await?;
        check_status(response, &Method::PATCH, &path).await?;
        Ok(())
    }
}

async fn check_status(
    response: reqwest::Response,
    method: &Method,
    path: &str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(300).collect();
    Err(anyhow!("{} {} returned {}: {}", method, path, status, body))
}

#[async_trait]
impl CrmClient for HubspotClient {
    async fn get_contact(&self, id: &str) -> Result<Option<Contact>> {
        let path = format!(
            "/crm/v3/objects/contacts/{}?properties=email,phone,firstname,lastname",
            urlencoding::encode(id)
        );
        let response = self.send(Method::GET, &path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, &Method::GET, &path).await?;
        let mut object: ContactObject = response.json().await.context("decode contact")?;
        let mut take = |key: &str| object.properties.remove(key).flatten();
        let (email, phone, first_name, last_name) =
            (take("email"), take("phone"), take("firstname"), take("lastname"));
        Ok(Some(Contact {
            id: object.id,
            email,
            phone,
            first_name,
            last_name,
        }))
    }

    async fn search_contact(&self, property: &str, value: &str) -> Result<Option<String>> {
        let body = json!({
            "filterGroups": [{
                "filters": [{ "propertyName": property, "operator": "EQ", "value": value }],
            }],
            "properties": ["email", "phone"],
            "limit": 1,
        });
        let found: SearchResults = self
            .call(Method::POST, "/crm/v3/objects/contacts/search", Some(&body))
            .await?;
        Ok(found.results.into_iter().next().map(|r| r.id))
    }

    async fn create_contact(&self, properties: &CrmProperties) -> Result<String> {
        self.create_object("contacts", json!({ "properties": properties }))
            .await
    }

    async fn update_contact(&self, id: &str, properties: &CrmProperties) -> Result<()> {
        self.patch_object("contacts", id, properties).await
    }

    async fn create_call(&self, call: &CallEngagement, contact_id: &str) -> Result<String> {
        self.create_object(
            "calls",
            json!({
                "properties": call.to_properties(),
                "associations": association(contact_id, CALL_TO_CONTACT),
            }),
        )
        .await
    }

    async fn update_call(&self, id: &str, properties: &CrmProperties) -> Result<()> {
        self.patch_object("calls", id, properties).await
    }

    async fn create_note(
        &self,
        body: &str,
        timestamp: DateTime<Utc>,
        contact_id: &str,
    ) -> Result<String> {
        self.create_object(
            "notes",
            json!({
                "properties": {
                    "hs_timestamp": timestamp.timestamp_millis().to_string(),
                    "hs_note_body": body,
                },
                "associations": association(contact_id, NOTE_TO_CONTACT),
            }),
        )
        .await
    }

    async fn create_deal(
        &self,
        deal: &DealRequest,
        pipeline: &str,
        stage: &str,
        contact_id: &str,
    ) -> Result<String> {
        let mut properties = CrmProperties::new();
        properties.set("dealname", deal.name.as_str());
        properties.set("pipeline", pipeline);
        properties.set("dealstage", stage);
        if let Some(amount) = deal.amount {
            properties.set("amount", amount.to_string());
        }
        self.create_object(
            "deals",
            json!({
                "properties": properties,
                "associations": association(contact_id, DEAL_TO_CONTACT),
            }),
        )
        .await
    }
}
