use super::{CallEngagement, Contact, CrmClient};
use crate::disposition::fields::{CrmProperties, DealRequest};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;

mock! {
    pub Crm {}

    #[async_trait]
    impl CrmClient for Crm {
        async fn get_contact(&self, id: &str) -> Result<Option<Contact>>;
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
}
