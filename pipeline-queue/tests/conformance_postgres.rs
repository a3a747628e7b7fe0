//! Runs the same black-box assertions as `conformance_memory.rs` against a
//! real Postgres database. Skipped unless `TEST_DATABASE_URL` is set, since
//! CI and local `cargo test` runs shouldn't require a live database by
//! default.

#![cfg(feature = "postgres")]

use chrono::Utc;
use tokio_stream::StreamExt;

use pipeline_queue::{
    backend::{postgres::PostgresBackend, QueueBackend},
    JobMessage, JobPriority, JobStatus, QueueCtx,
};

async fn test_backend() -> Option<PostgresBackend> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let backend = PostgresBackend::connect(&url)
        .await
        .expect("connect to TEST_DATABASE_URL");
    backend.migrate().await.expect("run migrations");
    Some(backend)
}

fn create_test_context() -> QueueCtx {
    QueueCtx::new(format!("test_tenant_{}", uuid::Uuid::new_v4()))
}

fn create_test_job_message() -> JobMessage {
    JobMessage {
        job_type: "test_job".to_string(),
        payload_bytes: b"test_payload".to_vec(),
        codec: "json".to_string(),
        queue: "default".to_string(),
        priority: JobPriority::Normal,
        max_retries: 3,
        run_at: Utc::now(),
        idempotency_key: None,
    }
}

#[tokio::test]
async fn test_dequeue_leases_atomically() {
    let Some(backend) = test_backend().await else { return };
    let ctx = create_test_context();
    let message = create_test_job_message();

    let job_id = backend.enqueue(ctx.clone(), message).await.unwrap();
    let leased = backend.dequeue(ctx.clone(), &["default"]).await.unwrap().unwrap();

    assert_eq!(leased.record.job_id, job_id);
    assert!(leased.lease_until > Utc::now());

    let status = backend.get_status(ctx, job_id).await.unwrap();
    assert!(matches!(status, JobStatus::Processing { .. }));
}

#[tokio::test]
async fn test_only_lease_holder_can_ack() {
    let Some(backend) = test_backend().await else { return };
    let ctx = create_test_context();
    let message = create_test_job_message();

    backend.enqueue(ctx.clone(), message).await.unwrap();
    let leased = backend.dequeue(ctx.clone(), &["default"]).await.unwrap().unwrap();
    let fake_token = pipeline_queue::LeaseToken::from("invalid_token");

    let result = backend
        .ack_complete(ctx, leased.record.job_id, fake_token, None)
        .await;
    assert!(matches!(result, Err(pipeline_queue::QueueError::InvalidLeaseToken)));
}

#[tokio::test]
async fn test_cancel_wins_over_ack_complete() {
    let Some(backend) = test_backend().await else { return };
    let ctx = create_test_context();
    let message = create_test_job_message();

    backend.enqueue(ctx.clone(), message).await.unwrap();
    let leased = backend.dequeue(ctx.clone(), &["default"]).await.unwrap().unwrap();

    let canceled = backend.cancel(ctx.clone(), leased.record.job_id.clone()).await.unwrap();
    let ack_result = backend
        .ack_complete(ctx, leased.record.job_id, leased.lease_token, None)
        .await;

    assert!(canceled);
    assert!(matches!(ack_result, Err(pipeline_queue::QueueError::JobCanceled)));
}

#[tokio::test]
async fn test_idempotency_returns_same_job_id_until_terminal() {
    let Some(backend) = test_backend().await else { return };
    let ctx = create_test_context();
    let mut message = create_test_job_message();
    message.idempotency_key = Some("same-key".to_string());

    let job_id1 = backend.enqueue(ctx.clone(), message.clone()).await.unwrap();
    let job_id2 = backend.enqueue(ctx.clone(), message.clone()).await.unwrap();
    assert_eq!(job_id1, job_id2);

    let leased = backend.dequeue(ctx.clone(), &["default"]).await.unwrap().unwrap();
    backend
        .ack_complete(ctx.clone(), leased.record.job_id.clone(), leased.lease_token, None)
        .await
        .unwrap();

    // Terminal job no longer blocks resubmission under the same key.
    let job_id3 = backend.enqueue(ctx, message).await.unwrap();
    assert_ne!(job_id1, job_id3);
}

#[tokio::test]
async fn test_priority_then_fifo_ordering() {
    let Some(backend) = test_backend().await else { return };
    let ctx = create_test_context();

    let mut low = create_test_job_message();
    low.priority = JobPriority::Low;
    let low_id = backend.enqueue(ctx.clone(), low).await.unwrap();

    let mut high = create_test_job_message();
    high.priority = JobPriority::High;
    let high_id = backend.enqueue(ctx.clone(), high).await.unwrap();

    let first = backend.dequeue(ctx.clone(), &["default"]).await.unwrap().unwrap();
    let second = backend.dequeue(ctx, &["default"]).await.unwrap().unwrap();

    assert_eq!(first.record.job_id, high_id);
    assert_eq!(second.record.job_id, low_id);
}

#[tokio::test]
async fn test_retryable_error_schedules_retry() {
    let Some(backend) = test_backend().await else { return };
    let ctx = create_test_context();
    let message = create_test_job_message();

    backend.enqueue(ctx.clone(), message).await.unwrap();
    let leased = backend.dequeue(ctx.clone(), &["default"]).await.unwrap().unwrap();
    let retry_at = Utc::now() + chrono::Duration::seconds(60);

    backend
        .ack_fail(
            ctx.clone(),
            leased.record.job_id.clone(),
            leased.lease_token,
            "retryable error".to_string(),
            Some(retry_at),
        )
        .await
        .unwrap();

    let status = backend.get_status(ctx.clone(), leased.record.job_id.clone()).await.unwrap();
    assert!(matches!(status, JobStatus::Retrying { retry_at: scheduled } if scheduled == retry_at));

    // Not yet eligible - retry_at is in the future.
    let early = backend.dequeue(ctx, &["default"]).await.unwrap();
    assert!(early.is_none());
}

#[tokio::test]
async fn test_emits_enqueued_event() {
    let Some(backend) = test_backend().await else { return };
    let ctx = create_test_context();
    let message = create_test_job_message();

    let mut stream = backend.event_stream(ctx.clone());
    let job_id = backend.enqueue(ctx, message).await.unwrap();

    let event = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
        .await
        .expect("timeout waiting for event")
        .expect("stream ended");

    match event {
        pipeline_queue::JobEvent::Enqueued { job_id: event_job_id, .. } => {
            assert_eq!(event_job_id, job_id);
        }
        other => panic!("expected Enqueued event, got {other:?}"),
    }
}
