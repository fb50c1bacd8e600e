// Evaluation job sink used by the intake handlers
use async_trait::async_trait;
use grader_common::redis;
use grader_common::types::EvaluationJob;
use ::redis::aio::ConnectionManager;
use ::redis::RedisResult;

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &EvaluationJob) -> RedisResult<()>;
}

/// Pushes jobs onto the shared Redis evaluation queue
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: &EvaluationJob) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        redis::push_job(&mut conn, job).await
    }
}
