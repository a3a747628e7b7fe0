use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::commerce::{CampaignStatus, CommerceCampaign, CommerceStore, Price};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::StudioType;

pub struct MemoryCommerceStore {
    campaigns: Arc<RwLock<HashMap<Uuid, CommerceCampaign>>>,
}

impl MemoryCommerceStore {
    pub fn new() -> Self {
        Self {
            campaigns: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryCommerceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommerceStore for MemoryCommerceStore {
    async fn create_campaign(
        &self,
        user_id: Uuid,
        target_studio_type: StudioType,
        target_payload: serde_json::Value,
        price: Price,
        currency: &str,
        quote_expires_at: DateTime<Utc>,
    ) -> OrchestratorResult<CommerceCampaign> {
        let now = Utc::now();
        let campaign = CommerceCampaign {
            id: Uuid::new_v4(),
            user_id,
            target_studio_type,
            target_payload,
            status: CampaignStatus::Quoted,
            price_cents: price.cents,
            currency: currency.to_string(),
            quote_expires_at,
            studio_job_id: None,
            meta: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        self.campaigns.write().insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> OrchestratorResult<CommerceCampaign> {
        self.campaigns
            .read()
            .get(&campaign_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::Internal(format!("campaign {campaign_id} not found")))
    }

    async fn update_campaign(&self, campaign: CommerceCampaign) -> OrchestratorResult<()> {
        self.campaigns.write().insert(campaign.id, campaign);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_round_trip() {
        let store = MemoryCommerceStore::new();
        let campaign = store
            .create_campaign(
                Uuid::new_v4(),
                StudioType::Face,
                serde_json::json!({"prompt": "x"}),
                Price { cents: 500 },
                "usd",
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap();

        let fetched = store.get_campaign(campaign.id).await.unwrap();
        assert_eq!(fetched.price_cents, 500);
        assert_eq!(fetched.status, CampaignStatus::Quoted);
    }
}
