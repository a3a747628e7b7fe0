use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::commerce::{CommerceCampaign, CommerceStore, Price};
use crate::error::OrchestratorResult;
use crate::job::StudioType;

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id: Uuid,
    user_id: Uuid,
    target_studio_type: String,
    target_payload: serde_json::Value,
    status: String,
    price_cents: i64,
    currency: String,
    quote_expires_at: DateTime<Utc>,
    studio_job_id: Option<Uuid>,
    meta: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CampaignRow {
    fn into_campaign(self) -> OrchestratorResult<CommerceCampaign> {
        Ok(CommerceCampaign {
            id: self.id,
            user_id: self.user_id,
            target_studio_type: self.target_studio_type.parse()?,
            target_payload: self.target_payload,
            status: self.status.parse()?,
            price_cents: self.price_cents,
            currency: self.currency,
            quote_expires_at: self.quote_expires_at,
            studio_job_id: self.studio_job_id,
            meta: self.meta,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct PostgresCommerceStore {
    pool: PgPool,
}

impl PostgresCommerceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommerceStore for PostgresCommerceStore {
    async fn create_campaign(
        &self,
        user_id: Uuid,
        target_studio_type: StudioType,
        target_payload: serde_json::Value,
        price: Price,
        currency: &str,
        quote_expires_at: DateTime<Utc>,
    ) -> OrchestratorResult<CommerceCampaign> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO commerce_campaigns (
                id, user_id, target_studio_type, target_payload, status,
                price_cents, currency, quote_expires_at, studio_job_id, meta,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, 'quoted', $5, $6, $7, NULL, $8, $9, $9)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(target_studio_type.as_str())
        .bind(&target_payload)
        .bind(price.cents)
        .bind(currency)
        .bind(quote_expires_at)
        .bind(serde_json::json!({}))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(CommerceCampaign {
            id,
            user_id,
            target_studio_type,
            target_payload,
            status: crate::commerce::CampaignStatus::Quoted,
            price_cents: price.cents,
            currency: currency.to_string(),
            quote_expires_at,
            studio_job_id: None,
            meta: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> OrchestratorResult<CommerceCampaign> {
        let row: CampaignRow = sqlx::query_as("SELECT * FROM commerce_campaigns WHERE id = $1")
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await?;
        row.into_campaign()
    }

    async fn update_campaign(&self, campaign: CommerceCampaign) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            UPDATE commerce_campaigns SET
                status = $2, price_cents = $3, currency = $4,
                quote_expires_at = $5, studio_job_id = $6, meta = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(campaign.id)
        .bind(campaign.status.as_str())
        .bind(campaign.price_cents)
        .bind(&campaign.currency)
        .bind(campaign.quote_expires_at)
        .bind(campaign.studio_job_id)
        .bind(&campaign.meta)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
