//! Commerce processor.
//!
//! quote -> confirm -> campaign -> studio job chain. Pricing is an external
//! collaborator this crate only calls through [`crate::commerce::PricingProvider`].
//! `quote`/`requote` run outside the job queue, against a campaign still in
//! `quoted` state. `confirm` is the hinge: it marks the campaign `confirmed`
//! and enqueues one `StudioType::Commerce` job, idempotent by campaign id,
//! whose own [`process`] ticks are what the worker loop actually drives -
//! the first tick reserves the downstream studio job, every tick after that
//! syncs the campaign against that job's terminal status.

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::commerce::{CampaignStatus, CommerceCampaign, CommerceStore, PricingProvider};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::{request_hash, Job, JobStore, StudioType};
use crate::studios::ProcessorOutcome;

#[derive(Debug, Deserialize)]
struct CommercePayload {
    campaign_id: Uuid,
}

pub struct QuoteRequest {
    pub user_id: Uuid,
    pub target_studio_type: StudioType,
    pub target_payload: serde_json::Value,
}

/// Quote: persists a fresh price against a target studio
/// payload, valid until `quote_ttl`.
pub async fn quote(
    store: &dyn CommerceStore,
    pricing: &dyn PricingProvider,
    request: QuoteRequest,
    currency: &str,
    quote_ttl: std::time::Duration,
) -> OrchestratorResult<CommerceCampaign> {
    let price = pricing.quote(request.target_studio_type, &request.target_payload).await?;
    let expires_at = Utc::now() + chrono::Duration::from_std(quote_ttl).unwrap_or_default();
    store
        .create_campaign(request.user_id, request.target_studio_type, request.target_payload, price, currency, expires_at)
        .await
}

/// Re-quote: refreshes the price and TTL on an
/// existing campaign still in `quoted` state.
pub async fn requote(
    store: &dyn CommerceStore,
    pricing: &dyn PricingProvider,
    campaign_id: Uuid,
    quote_ttl: std::time::Duration,
) -> OrchestratorResult<CommerceCampaign> {
    let mut campaign = store.get_campaign(campaign_id).await?;
    if campaign.status != CampaignStatus::Quoted {
        return Err(OrchestratorError::BadRequest(
            "only a quoted campaign can be re-quoted".to_string(),
        ));
    }
    let price = pricing.quote(campaign.target_studio_type, &campaign.target_payload).await?;
    campaign.price_cents = price.cents;
    campaign.quote_expires_at = Utc::now() + chrono::Duration::from_std(quote_ttl).unwrap_or_default();
    campaign.updated_at = Utc::now();
    store.update_campaign(campaign.clone()).await?;
    Ok(campaign)
}

/// Confirm: rejects an expired quote with
/// [`OrchestratorError::QuoteExpired`], otherwise marks the campaign
/// `confirmed` and enqueues the `StudioType::Commerce` job that drives the
/// rest of the chain through [`process`].
pub async fn confirm(store: &dyn CommerceStore, jobs: &dyn JobStore, campaign_id: Uuid) -> OrchestratorResult<Job> {
    let mut campaign = store.get_campaign(campaign_id).await?;
    if campaign.status != CampaignStatus::Quoted {
        return Err(OrchestratorError::BadRequest(
            "campaign is not awaiting confirmation".to_string(),
        ));
    }
    if campaign.quote_expires_at < Utc::now() {
        return Err(OrchestratorError::QuoteExpired);
    }

    campaign.status = CampaignStatus::Confirmed;
    campaign.updated_at = Utc::now();
    store.update_campaign(campaign.clone()).await?;

    let hash = request_hash(&campaign.user_id, &serde_json::json!({"commerce_campaign_id": campaign.id}));
    jobs.submit(
        campaign.user_id,
        StudioType::Commerce,
        hash,
        serde_json::json!({"campaign_id": campaign.id}),
        serde_json::json!({}),
    )
    .await
}

/// Worker-loop entry point for `StudioType::Commerce` jobs. The
/// first tick reserves the downstream studio job idempotently and advances
/// the campaign to `running`; every tick after that just syncs the campaign
/// against that job's terminal status.
pub async fn process(job: &Job, store: &dyn CommerceStore, jobs: &dyn JobStore) -> OrchestratorResult<ProcessorOutcome> {
    let payload: CommercePayload = serde_json::from_value(job.payload.clone())
        .map_err(|e| OrchestratorError::CommerceWorkerError(format!("invalid commerce payload: {e}")))?;
    let mut campaign = store.get_campaign(payload.campaign_id).await?;

    let studio_job_id = match campaign.studio_job_id {
        Some(id) => id,
        None => {
            let hash = request_hash(&campaign.user_id, &campaign.target_payload);
            let target_job = jobs
                .submit(
                    campaign.user_id,
                    campaign.target_studio_type,
                    hash,
                    campaign.target_payload.clone(),
                    serde_json::json!({"commerce_campaign_id": campaign.id}),
                )
                .await?;

            campaign.status = CampaignStatus::Running;
            campaign.studio_job_id = Some(target_job.id);
            campaign.updated_at = Utc::now();
            store.update_campaign(campaign).await?;
            return Ok(ProcessorOutcome::InProgress);
        }
    };

    let target_job = jobs.get(studio_job_id).await?;
    match target_job.status {
        crate::job::JobStatus::Succeeded => {
            campaign.status = CampaignStatus::Succeeded;
            campaign.updated_at = Utc::now();
            store.update_campaign(campaign).await?;
            Ok(ProcessorOutcome::Succeeded)
        }
        crate::job::JobStatus::Failed => {
            if let (Some(code), Some(msg)) = (&target_job.error_code, &target_job.error_message) {
                if let serde_json::Value::Object(meta) = &mut campaign.meta {
                    meta.insert("studio_job_error_code".to_string(), serde_json::Value::String(code.clone()));
                    meta.insert("studio_job_error_message".to_string(), serde_json::Value::String(msg.clone()));
                }
            }
            campaign.status = CampaignStatus::Failed;
            campaign.updated_at = Utc::now();
            store.update_campaign(campaign).await?;
            Err(OrchestratorError::CommerceWorkerError(
                target_job.error_message.unwrap_or_else(|| "studio job failed".to_string()),
            ))
        }
        _ => Ok(ProcessorOutcome::InProgress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commerce::{memory::MemoryCommerceStore, Price};
    use crate::job::memory::MemoryJobStore;

    struct FixedPricing(i64);

    #[async_trait::async_trait]
    impl PricingProvider for FixedPricing {
        async fn quote(&self, _studio_type: StudioType, _payload: &serde_json::Value) -> OrchestratorResult<Price> {
            Ok(Price { cents: self.0 })
        }
    }

    async fn quoted_campaign(store: &MemoryCommerceStore, ttl: std::time::Duration) -> CommerceCampaign {
        let pricing = FixedPricing(500);
        quote(
            store,
            &pricing,
            QuoteRequest {
                user_id: Uuid::new_v4(),
                target_studio_type: StudioType::Audio,
                target_payload: serde_json::json!({"text": "hi"}),
            },
            "usd",
            ttl,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn quote_persists_a_priced_campaign() {
        let store = MemoryCommerceStore::new();
        let campaign = quoted_campaign(&store, std::time::Duration::from_secs(3600)).await;
        assert_eq!(campaign.price_cents, 500);
        assert_eq!(campaign.status, CampaignStatus::Quoted);
    }

    #[tokio::test]
    async fn confirm_rejects_an_expired_quote() {
        let store = MemoryCommerceStore::new();
        let jobs = MemoryJobStore::new();
        // zero-ttl quote is already expired
        let campaign = quoted_campaign(&store, std::time::Duration::from_secs(0)).await;
        let err = confirm(&store, &jobs, campaign.id).await.unwrap_err();
        assert_eq!(err.error_code(), "quote_expired");
    }

    #[tokio::test]
    async fn confirm_enqueues_a_commerce_job() {
        let store = MemoryCommerceStore::new();
        let jobs = MemoryJobStore::new();
        let campaign = quoted_campaign(&store, std::time::Duration::from_secs(3600)).await;

        let job = confirm(&store, &jobs, campaign.id).await.unwrap();
        assert_eq!(job.studio_type, StudioType::Commerce);

        let updated = store.get_campaign(campaign.id).await.unwrap();
        assert_eq!(updated.status, CampaignStatus::Confirmed);
        assert!(updated.studio_job_id.is_none());
    }

    #[tokio::test]
    async fn process_reserves_the_downstream_job_on_first_tick_then_syncs_to_success() {
        let store = MemoryCommerceStore::new();
        let jobs = MemoryJobStore::new();
        let campaign = quoted_campaign(&store, std::time::Duration::from_secs(3600)).await;
        let commerce_job = confirm(&store, &jobs, campaign.id).await.unwrap();

        let outcome = process(&commerce_job, &store, &jobs).await.unwrap();
        assert_eq!(outcome, ProcessorOutcome::InProgress);

        let after_reserve = store.get_campaign(campaign.id).await.unwrap();
        assert_eq!(after_reserve.status, CampaignStatus::Running);
        let target_job_id = after_reserve.studio_job_id.expect("downstream job reserved");
        let target_job = jobs.get(target_job_id).await.unwrap();
        assert_eq!(target_job.studio_type, StudioType::Audio);

        // second tick: downstream job still running
        let outcome = process(&commerce_job, &store, &jobs).await.unwrap();
        assert_eq!(outcome, ProcessorOutcome::InProgress);

        jobs.mark_succeeded(target_job_id).await.unwrap();
        let outcome = process(&commerce_job, &store, &jobs).await.unwrap();
        assert_eq!(outcome, ProcessorOutcome::Succeeded);
        assert_eq!(store.get_campaign(campaign.id).await.unwrap().status, CampaignStatus::Succeeded);
    }

    #[tokio::test]
    async fn process_fails_the_campaign_when_the_downstream_job_fails() {
        let store = MemoryCommerceStore::new();
        let jobs = MemoryJobStore::new();
        let campaign = quoted_campaign(&store, std::time::Duration::from_secs(3600)).await;
        let commerce_job = confirm(&store, &jobs, campaign.id).await.unwrap();
        process(&commerce_job, &store, &jobs).await.unwrap();

        let after_reserve = store.get_campaign(campaign.id).await.unwrap();
        let target_job_id = after_reserve.studio_job_id.unwrap();
        jobs.mark_failed(target_job_id, "provider_4xx", "rejected").await.unwrap();

        let err = process(&commerce_job, &store, &jobs).await.unwrap_err();
        assert_eq!(err.error_code(), "commerce_worker_error");
        assert_eq!(store.get_campaign(campaign.id).await.unwrap().status, CampaignStatus::Failed);
    }
}
