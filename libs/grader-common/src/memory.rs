// In-process store used by tests and local runs

use crate::store::{EvaluationCommit, EvaluationLease, StoreError, StoreResult, SubmissionStore};
use crate::types::{
    CodingAssessment, CodingAssessmentAssignment, CodingSubmission, CodingSubmissionReview,
    CodingSubmissionTestResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    assessments: HashMap<Uuid, CodingAssessment>,
    assignments: HashMap<Uuid, CodingAssessmentAssignment>,
    submissions: HashMap<Uuid, CodingSubmission>,
    results: HashMap<Uuid, Vec<CodingSubmissionTestResult>>,
    reviews: HashMap<Uuid, Vec<CodingSubmissionReview>>,
    leases: HashMap<Uuid, (Uuid, Instant)>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn get_assessment(&self, id: Uuid) -> StoreResult<Option<CodingAssessment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .assessments
            .get(&id)
            .filter(|a| !a.is_deleted())
            .cloned())
    }

    async fn put_assessment(&self, assessment: &CodingAssessment) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.assessments.insert(assessment.id, assessment.clone());
        Ok(())
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<CodingAssessmentAssignment>> {
        let tables = self.tables.lock().await;
        Ok(tables.assignments.get(&id).cloned())
    }

    async fn insert_assignment(&self, assignment: &CodingAssessmentAssignment) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.assignments.contains_key(&assignment.id) {
            return Err(StoreError::Conflict(format!(
                "assignment {} already exists",
                assignment.id
            )));
        }
        let has_active = tables.assignments.values().any(|a| {
            a.assessment_id == assignment.assessment_id
                && a.candidate_id == assignment.candidate_id
                && a.status.is_active()
        });
        if has_active && assignment.status.is_active() {
            return Err(StoreError::Conflict(format!(
                "candidate {} already has an active assignment for assessment {}",
                assignment.candidate_id, assignment.assessment_id
            )));
        }
        tables.assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn update_assignment(&self, assignment: &CodingAssessmentAssignment) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.assignments.get_mut(&assignment.id) {
            Some(existing) => {
                *existing = assignment.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("assignment {}", assignment.id))),
        }
    }

    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<CodingSubmission>> {
        let tables = self.tables.lock().await;
        Ok(tables.submissions.get(&id).cloned())
    }

    async fn insert_submission(&self, submission: &CodingSubmission) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.submissions.contains_key(&submission.id) {
            return Err(StoreError::Conflict(format!(
                "submission {} already exists",
                submission.id
            )));
        }
        tables.submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn list_results(
        &self,
        submission_id: Uuid,
    ) -> StoreResult<Vec<CodingSubmissionTestResult>> {
        let tables = self.tables.lock().await;
        Ok(tables.results.get(&submission_id).cloned().unwrap_or_default())
    }

    async fn acquire_lease(
        &self,
        submission_id: Uuid,
        ttl: Duration,
    ) -> StoreResult<Option<EvaluationLease>> {
        let mut tables = self.tables.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = tables.leases.get(&submission_id) {
            if *expires_at > now {
                return Ok(None);
            }
        }
        let token = Uuid::new_v4();
        tables.leases.insert(submission_id, (token, now + ttl));
        Ok(Some(EvaluationLease {
            submission_id,
            token,
        }))
    }

    async fn release_lease(&self, lease: &EvaluationLease) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let held = tables
            .leases
            .get(&lease.submission_id)
            .is_some_and(|(token, _)| *token == lease.token);
        if held {
            tables.leases.remove(&lease.submission_id);
        }
        Ok(())
    }

    async fn commit_evaluation(&self, commit: EvaluationCommit) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let submission_id = commit.submission.id;
        if !tables.submissions.contains_key(&submission_id) {
            return Err(StoreError::NotFound(format!("submission {}", submission_id)));
        }
        if let Some(assignment) = &commit.assignment {
            if !tables.assignments.contains_key(&assignment.id) {
                return Err(StoreError::NotFound(format!("assignment {}", assignment.id)));
            }
        }

        // All checks done; the writes below cannot fail.
        tables.results.insert(submission_id, commit.results);
        tables.submissions.insert(submission_id, commit.submission);
        if let Some(assignment) = commit.assignment {
            tables.assignments.insert(assignment.id, assignment);
        }
        Ok(())
    }

    async fn append_review(&self, review: &CodingSubmissionReview) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .reviews
            .entry(review.submission_id)
            .or_default()
            .push(review.clone());
        Ok(())
    }

    async fn list_reviews(&self, submission_id: Uuid) -> StoreResult<Vec<CodingSubmissionReview>> {
        let tables = self.tables.lock().await;
        Ok(tables.reviews.get(&submission_id).cloned().unwrap_or_default())
    }
}
