mod config;
mod evaluator;
mod executor;
mod orchestrator;
mod orchestrator_tests;
mod retry;

use anyhow::Context;
use chrono::Utc;
use config::WorkerConfig;
use executor::{Executor, HttpExecutor};
use grader_common::config::RetrySettings;
use grader_common::redis::{self, RedisStore};
use grader_common::types::EvaluationJob;
use orchestrator::{EvaluationError, Orchestrator};
use retry::JobStep;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, instrument, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Grader Worker booting...");

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    info!(
        executor_url = %config.executor.base_url,
        concurrency = config.concurrency,
        max_attempts = config.retry.max_attempts,
        "Worker configured"
    );

    let store = RedisStore::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis: {}", config.redis_url);

    let executor = HttpExecutor::new(config.executor.clone())
        .context("Failed to build executor client")?;
    let orchestrator = Arc::new(Orchestrator::new(executor, store));

    // Setup graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received shutdown signal, no new jobs will be taken...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for shutdown signal");
                // Keep the sender alive so the loop never sees a shutdown.
                std::future::pending::<()>().await;
            }
        }
    });

    worker_loop(orchestrator, &config, shutdown_rx).await;

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[instrument(skip_all)]
async fn worker_loop<E: Executor + 'static>(
    orchestrator: Arc<Orchestrator<E, RedisStore>>,
    config: &WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut conn = orchestrator.store().connection();
    let permits = Arc::new(Semaphore::new(config.concurrency));

    while !*shutdown.borrow() {
        // Wait for a free slot before taking work off the queue
        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        match redis::promote_due_jobs(&mut conn, Utc::now().timestamp_millis()).await {
            Ok(0) => {}
            Ok(promoted) => info!(promoted, "Scheduled retries moved to the queue"),
            Err(e) => warn!(error = %e, "Failed to promote scheduled retries"),
        }

        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_job(&mut conn, 5.0).await {
            Ok(Some(job)) => {
                info!(
                    submission_id = %job.submission_id,
                    reevaluate = job.reevaluate,
                    attempt = job.attempt,
                    "Received job"
                );
                let orchestrator = orchestrator.clone();
                let policy = config.retry.clone();
                let conn = orchestrator.store().connection();
                tokio::spawn(async move {
                    handle_job(&orchestrator, conn, &policy, job).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }

    // Every spawned job holds a permit until its outcome is stored.
    let in_flight = config.concurrency - permits.available_permits();
    if in_flight > 0 {
        info!(in_flight, "Waiting for in-flight evaluations to finish");
    }
    let _ = permits.acquire_many(config.concurrency as u32).await;
}

#[instrument(skip_all, fields(submission_id = %job.submission_id, attempt = job.attempt))]
async fn handle_job<E: Executor>(
    orchestrator: &Orchestrator<E, RedisStore>,
    mut conn: ::redis::aio::ConnectionManager,
    policy: &RetrySettings,
    job: EvaluationJob,
) {
    let outcome = if job.reevaluate {
        orchestrator.reevaluate_submission(job.submission_id).await
    } else {
        orchestrator.evaluate_submission(job.submission_id).await
    };

    let err = match outcome {
        Ok(submission) => {
            info!(
                status = %submission.status,
                score = submission.score,
                "Job completed"
            );
            return;
        }
        Err(err) => err,
    };

    match retry::next_step(&err, &job, policy) {
        JobStep::Drop => match err {
            EvaluationError::AlreadyEvaluated(_) => {
                info!("Submission already evaluated, dropping duplicate job")
            }
            other => error!(error = %other, "Evaluation rejected, dropping job"),
        },
        JobStep::DeadLetter => {
            error!(error = %err, "Retries exhausted, moving job to dead-letter queue");
            if let Err(e) = redis::push_dead_letter(&mut conn, &job, &err.to_string()).await {
                error!(error = %e, "Failed to dead-letter job");
            }
        }
        JobStep::Requeue { job: next, delay } => {
            warn!(
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                next_attempt = next.attempt,
                "Evaluation failed, scheduling retry"
            );
            let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            if let Err(e) = redis::schedule_job(&mut conn, &next, ready_at).await {
                error!(error = %e, "Failed to schedule retry; submission stays pending");
            }
        }
    }
}
