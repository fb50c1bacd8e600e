use crate::store::{EvaluationCommit, EvaluationLease, StoreError, StoreResult, SubmissionStore};
use crate::types::{
    CodingAssessment, CodingAssessmentAssignment, CodingSubmission, CodingSubmissionReview,
    CodingSubmissionTestResult, EvaluationJob,
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

/// Redis key semantics - shared by the API, the worker and the CLI so the
/// layout never drifts between them.

pub const QUEUE_KEY: &str = "grader:queue:evaluations";
pub const DEAD_LETTER_KEY: &str = "grader:queue:dead";
/// Sorted set of retries waiting out their backoff, scored by ready-at epoch ms
pub const DELAYED_KEY: &str = "grader:queue:delayed";

/// Upper bound on jobs moved per promotion call
const PROMOTE_BATCH: usize = 100;

const ASSESSMENT_PREFIX: &str = "grader:assessment";
const ASSIGNMENT_PREFIX: &str = "grader:assignment";
const ACTIVE_ASSIGNMENT_PREFIX: &str = "grader:assignment:active";
const SUBMISSION_PREFIX: &str = "grader:submission";
const RESULTS_PREFIX: &str = "grader:results";
const REVIEWS_PREFIX: &str = "grader:reviews";
const LEASE_PREFIX: &str = "grader:lease";

pub fn assessment_key(id: &Uuid) -> String {
    format!("{}:{}", ASSESSMENT_PREFIX, id)
}

pub fn assignment_key(id: &Uuid) -> String {
    format!("{}:{}", ASSIGNMENT_PREFIX, id)
}

/// Index of the single active assignment of a candidate for an assessment
pub fn active_assignment_key(assessment_id: &Uuid, candidate_id: &Uuid) -> String {
    format!("{}:{}:{}", ACTIVE_ASSIGNMENT_PREFIX, assessment_id, candidate_id)
}

pub fn submission_key(id: &Uuid) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, id)
}

pub fn results_key(submission_id: &Uuid) -> String {
    format!("{}:{}", RESULTS_PREFIX, submission_id)
}

pub fn reviews_key(submission_id: &Uuid) -> String {
    format!("{}:{}", REVIEWS_PREFIX, submission_id)
}

pub fn lease_key(submission_id: &Uuid) -> String {
    format!("{}:{}", LEASE_PREFIX, submission_id)
}

fn serialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "serialization error",
        e.to_string(),
    ))
}

/// Push an evaluation job to the queue
/// Uses RPUSH for FIFO semantics
pub async fn push_job(conn: &mut ConnectionManager, job: &EvaluationJob) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(serialization_error)?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop an evaluation job
/// Uses BLPOP with timeout for graceful shutdown
pub async fn pop_job(
    conn: &mut ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<EvaluationJob>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: EvaluationJob = serde_json::from_str(&payload).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "deserialization error",
                    e.to_string(),
                ))
            })?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Park a job whose retries are exhausted
pub async fn push_dead_letter(
    conn: &mut ConnectionManager,
    job: &EvaluationJob,
    reason: &str,
) -> RedisResult<()> {
    let payload = serde_json::json!({ "job": job, "reason": reason }).to_string();
    conn.rpush(DEAD_LETTER_KEY, payload).await
}

/// Schedule a job to re-enter the queue once `ready_at_ms` has passed
pub async fn schedule_job(
    conn: &mut ConnectionManager,
    job: &EvaluationJob,
    ready_at_ms: i64,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(serialization_error)?;
    conn.zadd(DELAYED_KEY, payload, ready_at_ms).await
}

// Moves delayed jobs whose score is due onto the tail of the main queue.
const PROMOTE_DUE_SCRIPT: &str = r#"
local due = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, ARGV[2])
for _, job in ipairs(due) do
    redis.call("RPUSH", KEYS[2], job)
    redis.call("ZREM", KEYS[1], job)
end
return #due
"#;

/// Move every scheduled job that is due at `now_ms` onto the queue.
/// Atomic, so concurrent workers never promote the same entry twice.
pub async fn promote_due_jobs(conn: &mut ConnectionManager, now_ms: i64) -> RedisResult<usize> {
    redis::Script::new(PROMOTE_DUE_SCRIPT)
        .key(DELAYED_KEY)
        .key(QUEUE_KEY)
        .arg(now_ms)
        .arg(PROMOTE_BATCH)
        .invoke_async(conn)
        .await
}

// Deletes the lease only when it still carries our token.
const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

// Writes the assignment row and, for an active assignment, claims the
// candidate's index key. Nothing is written unless both succeed.
// Returns 1 on success, -1 if the row exists, -2 if the index is taken.
const INSERT_ASSIGNMENT_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    return -1
end
if ARGV[3] == "1" and redis.call("EXISTS", KEYS[2]) == 1 then
    return -2
end
if ARGV[3] == "1" then
    redis.call("SET", KEYS[2], ARGV[2])
end
redis.call("SET", KEYS[1], ARGV[1])
return 1
"#;

// Replaces the results and verdict of an existing submission, plus the
// optional assignment cascade. Returns 0 when the submission is missing,
// -1 when the cascaded assignment is missing.
const COMMIT_EVALUATION_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 0 then
    return 0
end
if ARGV[3] ~= "" and redis.call("EXISTS", KEYS[3]) == 0 then
    return -1
end
redis.call("SET", KEYS[2], ARGV[2])
redis.call("SET", KEYS[1], ARGV[1])
if ARGV[3] ~= "" then
    redis.call("SET", KEYS[3], ARGV[3])
    if ARGV[4] == "0" then
        redis.call("DEL", KEYS[4])
    end
end
return 1
"#;

/// Redis-backed lifecycle store. Records are JSON documents.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    /// Connection handle for queue operations
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(key).await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn get_assessment(&self, id: Uuid) -> StoreResult<Option<CodingAssessment>> {
        let assessment: Option<CodingAssessment> = self.get_json(&assessment_key(&id)).await?;
        Ok(assessment.filter(|a| !a.is_deleted()))
    }

    async fn put_assessment(&self, assessment: &CodingAssessment) -> StoreResult<()> {
        let payload = serde_json::to_string(assessment)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(assessment_key(&assessment.id), payload).await?;
        Ok(())
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<CodingAssessmentAssignment>> {
        self.get_json(&assignment_key(&id)).await
    }

    async fn insert_assignment(&self, assignment: &CodingAssessmentAssignment) -> StoreResult<()> {
        let payload = serde_json::to_string(assignment)?;
        let active = if assignment.status.is_active() { "1" } else { "0" };
        let mut conn = self.conn.clone();

        let outcome: i64 = redis::Script::new(INSERT_ASSIGNMENT_SCRIPT)
            .key(assignment_key(&assignment.id))
            .key(active_assignment_key(
                &assignment.assessment_id,
                &assignment.candidate_id,
            ))
            .arg(payload)
            .arg(assignment.id.to_string())
            .arg(active)
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            -1 => Err(StoreError::Conflict(format!(
                "assignment {} already exists",
                assignment.id
            ))),
            -2 => Err(StoreError::Conflict(format!(
                "candidate {} already has an active assignment for assessment {}",
                assignment.candidate_id, assignment.assessment_id
            ))),
            _ => Ok(()),
        }
    }

    async fn update_assignment(&self, assignment: &CodingAssessmentAssignment) -> StoreResult<()> {
        let key = assignment_key(&assignment.id);
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Err(StoreError::NotFound(format!("assignment {}", assignment.id)));
        }

        let payload = serde_json::to_string(assignment)?;
        let mut pipe = redis::pipe();
        pipe.atomic().set(&key, payload).ignore();
        if !assignment.status.is_active() {
            pipe.del(active_assignment_key(
                &assignment.assessment_id,
                &assignment.candidate_id,
            ))
            .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<CodingSubmission>> {
        self.get_json(&submission_key(&id)).await
    }

    async fn insert_submission(&self, submission: &CodingSubmission) -> StoreResult<()> {
        let payload = serde_json::to_string(submission)?;
        let mut conn = self.conn.clone();
        let inserted: bool = conn.set_nx(submission_key(&submission.id), payload).await?;
        if !inserted {
            return Err(StoreError::Conflict(format!(
                "submission {} already exists",
                submission.id
            )));
        }
        Ok(())
    }

    async fn list_results(
        &self,
        submission_id: Uuid,
    ) -> StoreResult<Vec<CodingSubmissionTestResult>> {
        let results: Option<Vec<CodingSubmissionTestResult>> =
            self.get_json(&results_key(&submission_id)).await?;
        Ok(results.unwrap_or_default())
    }

    async fn acquire_lease(
        &self,
        submission_id: Uuid,
        ttl: Duration,
    ) -> StoreResult<Option<EvaluationLease>> {
        let token = Uuid::new_v4();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(lease_key(&submission_id))
            .arg(token.to_string())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| EvaluationLease {
            submission_id,
            token,
        }))
    }

    async fn release_lease(&self, lease: &EvaluationLease) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(RELEASE_LEASE_SCRIPT)
            .key(lease_key(&lease.submission_id))
            .arg(lease.token.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn commit_evaluation(&self, commit: EvaluationCommit) -> StoreResult<()> {
        // Serialize everything up front so a failure cannot leave half a pass.
        let submission_id = commit.submission.id;
        let submission_payload = serde_json::to_string(&commit.submission)?;
        let results_payload = serde_json::to_string(&commit.results)?;

        let script = redis::Script::new(COMMIT_EVALUATION_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(submission_key(&submission_id))
            .key(results_key(&submission_id))
            .arg(submission_payload)
            .arg(results_payload);
        match &commit.assignment {
            Some(assignment) => {
                invocation
                    .key(assignment_key(&assignment.id))
                    .key(active_assignment_key(
                        &assignment.assessment_id,
                        &assignment.candidate_id,
                    ))
                    .arg(serde_json::to_string(assignment)?)
                    .arg(if assignment.status.is_active() { "1" } else { "0" });
            }
            None => {
                invocation.arg("").arg("1");
            }
        }

        let mut conn = self.conn.clone();
        let committed: i64 = invocation.invoke_async(&mut conn).await?;
        match (committed, &commit.assignment) {
            (0, _) => Err(StoreError::NotFound(format!("submission {}", submission_id))),
            (-1, Some(assignment)) => {
                Err(StoreError::NotFound(format!("assignment {}", assignment.id)))
            }
            _ => Ok(()),
        }
    }

    async fn append_review(&self, review: &CodingSubmissionReview) -> StoreResult<()> {
        let payload = serde_json::to_string(review)?;
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(reviews_key(&review.submission_id), payload).await?;
        Ok(())
    }

    async fn list_reviews(&self, submission_id: Uuid) -> StoreResult<Vec<CodingSubmissionReview>> {
        let mut conn = self.conn.clone();
        let payloads: Vec<String> = conn.lrange(reviews_key(&submission_id), 0, -1).await?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(StoreError::from))
            .collect()
    }
}
