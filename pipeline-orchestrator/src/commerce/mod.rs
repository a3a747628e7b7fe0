//! Commerce domain model: quote -> confirm
//! -> campaign -> studio job chain. Pricing itself is an external
//! collaborator; this crate
//! only persists quotes, re-runs them through [`PricingProvider`] on
//! request, and advances a campaign through its own small state machine
//! once a quote is confirmed.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorResult;
use crate::job::StudioType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Quoted,
    Confirmed,
    Running,
    Succeeded,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quoted => "quoted",
            Self::Confirmed => "confirmed",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = crate::error::OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quoted" => Ok(Self::Quoted),
            "confirmed" => Ok(Self::Confirmed),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(crate::error::OrchestratorError::Internal(format!(
                "unknown campaign status {other:?}"
            ))),
        }
    }
}

/// A priced, not-yet-committed request for a downstream studio job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommerceCampaign {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target_studio_type: StudioType,
    pub target_payload: serde_json::Value,
    pub status: CampaignStatus,
    pub price_cents: i64,
    pub currency: String,
    pub quote_expires_at: DateTime<Utc>,
    pub studio_job_id: Option<Uuid>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pricing is out of scope for this crate; this is the narrow
/// seam the commerce processor calls through to get (and re-get) a price.
#[async_trait::async_trait]
pub trait PricingProvider: Send + Sync {
    async fn quote(
        &self,
        target_studio_type: StudioType,
        target_payload: &serde_json::Value,
    ) -> OrchestratorResult<Price>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Price {
    pub cents: i64,
}

#[async_trait::async_trait]
pub trait CommerceStore: Send + Sync {
    async fn create_campaign(
        &self,
        user_id: Uuid,
        target_studio_type: StudioType,
        target_payload: serde_json::Value,
        price: Price,
        currency: &str,
        quote_expires_at: DateTime<Utc>,
    ) -> OrchestratorResult<CommerceCampaign>;

    async fn get_campaign(&self, campaign_id: Uuid) -> OrchestratorResult<CommerceCampaign>;

    async fn update_campaign(&self, campaign: CommerceCampaign) -> OrchestratorResult<()>;
}
