// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable job queue over Postgres.
//!
//! Two named queues drive the pipeline: `block` (one job per block
//! discovered upstream) and `events` (one job per unprocessed block). The
//! dequeue statement excludes any block hash that already has a running job
//! in the same queue, so at most one `events` job per block is in flight.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Text};
use diesel_async::RunQueryDsl;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chainwatcher_pg_db::Db;
use chainwatcher_schema::models::NewStoredJob;
use chainwatcher_schema::schema::jobs;

use crate::error::{WatcherError, WatcherResult};
use crate::metrics::WatcherMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Block,
    Events,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Block => "block",
            QueueName::Events => "events",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: i64,
    pub queue: QueueName,
    pub block_hash: String,
    pub block_number: u64,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub block_hash: String,
    pub block_number: u64,
    pub priority: i32,
}

impl NewJob {
    pub fn new(block_hash: impl Into<String>, block_number: u64) -> Self {
        Self {
            block_hash: block_hash.into(),
            block_number,
            priority: 0,
        }
    }
}

/// What happened to a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Re-queued with a backoff delay.
    Retry { delay: Duration },
    /// Retry budget exhausted; operator intervention required.
    Poisoned,
}

/// Exponential backoff delay before retry `attempts + 1`.
pub fn retry_delay(attempts: i32) -> Duration {
    let exponent = attempts.clamp(0, 16) as u32;
    Duration::from_secs(2u64.saturating_pow(exponent))
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a job unless the block already has one queued or running.
    async fn enqueue(&self, queue: QueueName, job: NewJob) -> WatcherResult<()>;

    /// Claim the next runnable job, honoring per-block-hash exclusion.
    async fn dequeue(&self, queue: QueueName) -> WatcherResult<Option<Job>>;

    async fn complete(&self, job: &Job) -> WatcherResult<()>;

    async fn fail(&self, job: &Job, error: &str) -> WatcherResult<JobOutcome>;

    /// Number of queued jobs, for backpressure.
    async fn depth(&self, queue: QueueName) -> WatcherResult<u64>;
}

#[derive(QueryableByName)]
struct DequeuedRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    block_hash: String,
    #[diesel(sql_type = BigInt)]
    block_number: i64,
    #[diesel(sql_type = Integer)]
    priority: i32,
    #[diesel(sql_type = Integer)]
    attempts: i32,
    #[diesel(sql_type = Integer)]
    max_attempts: i32,
}

const DEQUEUE_SQL: &str = "\
UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = now() \
WHERE id = ( \
    SELECT j.id FROM jobs j \
    WHERE j.queue = $1 AND j.status = 'queued' AND j.run_after <= now() \
      AND NOT EXISTS ( \
        SELECT 1 FROM jobs r \
        WHERE r.queue = j.queue AND r.block_hash = j.block_hash AND r.status = 'running') \
    ORDER BY j.priority DESC, j.block_number ASC, j.id ASC \
    FOR UPDATE SKIP LOCKED \
    LIMIT 1) \
RETURNING id, block_hash, block_number, priority, attempts, max_attempts";

#[derive(Clone)]
pub struct PgJobQueue {
    db: Db,
    max_attempts: i32,
    metrics: Arc<WatcherMetrics>,
}

impl PgJobQueue {
    pub fn new(db: Db, max_attempts: i32, metrics: Arc<WatcherMetrics>) -> Self {
        Self {
            db,
            max_attempts,
            metrics,
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, queue: QueueName, job: NewJob) -> WatcherResult<()> {
        let mut conn = self.db.connect().await?;
        let row = NewStoredJob {
            queue: queue.as_str().to_string(),
            block_hash: job.block_hash,
            block_number: job.block_number as i64,
            priority: job.priority,
            status: "queued".to_string(),
            attempts: 0,
            max_attempts: self.max_attempts,
        };
        // The partial unique index on (queue, block_hash) over queued jobs
        // turns duplicate submissions into a clean no-op.
        match diesel::insert_into(jobs::table)
            .values(&row)
            .execute(&mut conn)
            .await
        {
            Ok(_) => {
                self.metrics
                    .jobs_enqueued
                    .with_label_values(&[queue.as_str()])
                    .inc();
                Ok(())
            }
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn dequeue(&self, queue: QueueName) -> WatcherResult<Option<Job>> {
        let mut conn = self.db.connect().await?;
        let row: Option<DequeuedRow> = diesel::sql_query(DEQUEUE_SQL)
            .bind::<Text, _>(queue.as_str())
            .get_result(&mut conn)
            .await
            .optional()?;
        Ok(row.map(|row| Job {
            id: row.id,
            queue,
            block_hash: row.block_hash,
            block_number: row.block_number as u64,
            priority: row.priority,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
        }))
    }

    async fn complete(&self, job: &Job) -> WatcherResult<()> {
        let mut conn = self.db.connect().await?;
        diesel::update(jobs::table.find(job.id))
            .set((jobs::status.eq("done"), jobs::updated_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> WatcherResult<JobOutcome> {
        let mut conn = self.db.connect().await?;
        if job.attempts >= job.max_attempts {
            diesel::update(jobs::table.find(job.id))
                .set((
                    jobs::status.eq("poisoned"),
                    jobs::last_error.eq(error),
                    jobs::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)
                .await?;
            self.metrics
                .jobs_poisoned
                .with_label_values(&[job.queue.as_str()])
                .inc();
            return Ok(JobOutcome::Poisoned);
        }

        let delay = retry_delay(job.attempts);
        diesel::update(jobs::table.find(job.id))
            .set((
                jobs::status.eq("queued"),
                jobs::last_error.eq(error),
                jobs::run_after.eq(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default()),
                jobs::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        self.metrics
            .jobs_retried
            .with_label_values(&[job.queue.as_str()])
            .inc();
        Ok(JobOutcome::Retry { delay })
    }

    async fn depth(&self, queue: QueueName) -> WatcherResult<u64> {
        let mut conn = self.db.connect().await?;
        let count: i64 = jobs::table
            .filter(jobs::queue.eq(queue.as_str()))
            .filter(jobs::status.eq("queued"))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count as u64)
    }
}

/// Handler invoked for each dequeued job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> WatcherResult<()>;
}

/// Spawn `workers` tasks draining `queue_name`. Workers finish the job in
/// flight on cancellation and refuse new dequeues; an invariant violation
/// cancels the whole node.
pub fn spawn_workers(
    queue_name: QueueName,
    workers: usize,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    cancel: CancellationToken,
    metrics: Arc<WatcherMetrics>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let queue = queue.clone();
        let handler = handler.clone();
        let cancel = cancel.clone();
        let metrics = metrics.clone();
        handles.push(tokio::spawn(async move {
            info!("[{queue_name}] Worker {worker_id} started");
            let mut interval = time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("[{queue_name}] Worker {worker_id} cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        drain_queue(queue_name, &*queue, &*handler, &cancel, &metrics).await;
                    }
                }
            }
        }));
    }
    handles
}

async fn drain_queue(
    queue_name: QueueName,
    queue: &dyn JobQueue,
    handler: &dyn JobHandler,
    cancel: &CancellationToken,
    metrics: &WatcherMetrics,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let job = match queue.dequeue(queue_name).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                if let Ok(depth) = queue.depth(queue_name).await {
                    metrics
                        .queue_depth
                        .with_label_values(&[queue_name.as_str()])
                        .set(depth as i64);
                }
                return;
            }
            Err(e) => {
                warn!("[{queue_name}] Dequeue failed: {e}");
                return;
            }
        };

        debug!(
            "[{queue_name}] Handling job {} for block {} ({})",
            job.id, job.block_number, job.block_hash
        );
        match handler.handle(&job).await {
            Ok(()) => {
                if let Err(e) = queue.complete(&job).await {
                    warn!("[{queue_name}] Failed to ack job {}: {e}", job.id);
                }
            }
            Err(WatcherError::InvariantViolation(reason)) => {
                error!(
                    "[{queue_name}] Invariant violation on block {} ({}): {reason}",
                    job.block_number, job.block_hash
                );
                let _ = queue.fail(&job, &reason).await;
                cancel.cancel();
                return;
            }
            Err(e) => {
                warn!(
                    "[{queue_name}] Job {} failed (attempt {}/{}): {e}",
                    job.id, job.attempts, job.max_attempts
                );
                match queue.fail(&job, &e.to_string()).await {
                    Ok(JobOutcome::Poisoned) => {
                        error!(
                            "[{queue_name}] Job {} poisoned after {} attempts: {e}",
                            job.id, job.attempts
                        );
                    }
                    Ok(JobOutcome::Retry { delay }) => {
                        debug!(
                            "[{queue_name}] Job {} will retry in {:?}",
                            job.id, delay
                        );
                    }
                    Err(e) => warn!("[{queue_name}] Failed to nack job {}: {e}", job.id),
                }
            }
        }
    }
}
