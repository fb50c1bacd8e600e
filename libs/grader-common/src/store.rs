//! Lifecycle store: the repository boundary for assessments, assignments,
//! submissions, per-case results and reviews.
//!
//! Every read of assessments and test cases filters soft-deleted rows. The
//! evaluation commit is a single atomic write so a submission never sits
//! between "some results written" and "aggregate fields written".

use crate::types::{
    CodingAssessment, CodingAssessmentAssignment, CodingSubmission, CodingSubmissionReview,
    CodingSubmissionTestResult, CodingTestCase,
};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Proof that the holder is the only evaluation in flight for a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationLease {
    pub submission_id: Uuid,
    pub token: Uuid,
}

/// Everything one evaluation pass writes, applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct EvaluationCommit {
    pub submission: CodingSubmission,
    /// Replaces the full previous result set of the submission.
    pub results: Vec<CodingSubmissionTestResult>,
    /// Present only when the assignment status actually changed.
    pub assignment: Option<CodingAssessmentAssignment>,
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Returns `None` for unknown or soft-deleted assessments.
    async fn get_assessment(&self, id: Uuid) -> StoreResult<Option<CodingAssessment>>;

    async fn put_assessment(&self, assessment: &CodingAssessment) -> StoreResult<()>;

    /// Non-deleted test cases of a non-deleted assessment, ordered by position.
    async fn active_test_cases(&self, assessment_id: Uuid) -> StoreResult<Vec<CodingTestCase>> {
        Ok(self
            .get_assessment(assessment_id)
            .await?
            .map(|a| a.active_test_cases())
            .unwrap_or_default())
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<CodingAssessmentAssignment>>;

    /// Inserts a new assignment. Fails with `Conflict` when the candidate
    /// already holds an active assignment for the same assessment.
    async fn insert_assignment(&self, assignment: &CodingAssessmentAssignment) -> StoreResult<()>;

    /// Overwrites an existing assignment outside of an evaluation pass.
    async fn update_assignment(&self, assignment: &CodingAssessmentAssignment) -> StoreResult<()>;

    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<CodingSubmission>>;

    async fn insert_submission(&self, submission: &CodingSubmission) -> StoreResult<()>;

    async fn list_results(&self, submission_id: Uuid)
        -> StoreResult<Vec<CodingSubmissionTestResult>>;

    /// Takes the single-flight lease for a submission. Returns `None` while
    /// another holder's lease is live.
    async fn acquire_lease(
        &self,
        submission_id: Uuid,
        ttl: Duration,
    ) -> StoreResult<Option<EvaluationLease>>;

    /// Releases the lease if it is still held by this token.
    async fn release_lease(&self, lease: &EvaluationLease) -> StoreResult<()>;

    async fn commit_evaluation(&self, commit: EvaluationCommit) -> StoreResult<()>;

    async fn append_review(&self, review: &CodingSubmissionReview) -> StoreResult<()>;

    /// Reviews in insertion order.
    async fn list_reviews(&self, submission_id: Uuid) -> StoreResult<Vec<CodingSubmissionReview>>;
}
