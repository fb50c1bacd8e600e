// HTTP route handlers for the Grader API
//
// The API is a thin intake/readback surface. It never evaluates anything
// itself: it validates a submission, stores it as pending and enqueues an
// evaluation job for the worker.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use grader_common::review::{self, NewReview};
use grader_common::store::SubmissionStore;
use grader_common::types::{
    AssignmentStatus, CodingSubmission, CodingSubmissionReview, ErrorType, EvaluationJob,
    Language, SubmissionStatus, TestStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub assignment_id: Uuid,
    pub language: Language,
    pub source_code: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
}

#[derive(Debug, Serialize)]
pub struct SubmissionView {
    #[serde(flatten)]
    pub submission: CodingSubmission,
    pub max_score: u32,
    /// Automated score plus review adjustments; absent while pending
    pub final_grade: Option<f64>,
    pub reviews: Vec<CodingSubmissionReview>,
}

#[derive(Debug, Serialize)]
pub struct TestResultView {
    pub test_case_id: Uuid,
    pub position: Option<u32>,
    pub hidden: bool,
    pub status: TestStatus,
    pub error_type: Option<ErrorType>,
    pub score_earned: f64,
    pub execution_time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub reviewer_id: Uuid,
    #[serde(default)]
    pub score_adjustment: f64,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub rubric_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub submission_id: Uuid,
    pub queued: bool,
}

/// POST /submissions - Accept a candidate submission for evaluation
pub async fn create_submission(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    if payload.source_code.trim().is_empty() {
        return Err(ApiError::Validation("source_code must not be empty".into()));
    }

    let now = Utc::now();
    let mut assignment = state
        .store
        .get_assignment(payload.assignment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("assignment {} not found", payload.assignment_id)))?;

    if !assignment.status.is_active() {
        return Err(ApiError::Conflict(format!(
            "assignment {} no longer accepts submissions",
            assignment.id
        )));
    }

    if assignment.is_expired_at(now) {
        assignment.status = AssignmentStatus::Expired;
        state.store.update_assignment(&assignment).await?;
        info!(assignment_id = %assignment.id, "Assignment expired, submission rejected");
        return Err(ApiError::Conflict(format!(
            "assignment {} expired",
            assignment.id
        )));
    }

    let assessment = state
        .store
        .get_assessment(assignment.assessment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("assessment {} not found", assignment.assessment_id)))?;

    if !assessment.allows(payload.language) {
        return Err(ApiError::Validation(format!(
            "language {} is not allowed for this assessment",
            payload.language
        )));
    }
    if !state.languages.is_enabled(payload.language) {
        return Err(ApiError::Validation(format!(
            "language {} is not supported by the executor",
            payload.language
        )));
    }

    let submission = CodingSubmission::pending(&assignment, payload.language, payload.source_code);
    state.store.insert_submission(&submission).await?;

    if assignment.status == AssignmentStatus::Assigned {
        assignment.status = AssignmentStatus::InProgress;
        state.store.update_assignment(&assignment).await?;
    }

    // The submission is already stored as pending; the queue push can be retried
    // from the CLI if it fails here.
    state
        .queue
        .enqueue(&EvaluationJob::new(submission.id))
        .await
        .inspect_err(|e| warn!(submission_id = %submission.id, error = %e, "Failed to queue evaluation"))?;

    info!(
        submission_id = %submission.id,
        assignment_id = %assignment.id,
        language = %submission.language,
        source_size = submission.source_code.len(),
        "Submission queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            submission_id: submission.id,
            status: submission.status,
        }),
    ))
}

/// GET /submissions/{id} - Verdict, reviews and final grade
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
) -> Result<Json<SubmissionView>, ApiError> {
    let submission = load_submission(&state, submission_id).await?;
    let max_score = state
        .store
        .get_assessment(submission.assessment_id)
        .await?
        .map(|a| a.max_score)
        .unwrap_or(100);
    let reviews = state.store.list_reviews(submission_id).await?;
    let final_grade = review::final_grade(&submission, max_score, &reviews);

    Ok(Json(SubmissionView {
        submission,
        max_score,
        final_grade,
        reviews,
    }))
}

/// GET /submissions/{id}/results - Per test case outcomes
///
/// Output captured for hidden test cases is never returned.
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
) -> Result<Json<Vec<TestResultView>>, ApiError> {
    let submission = load_submission(&state, submission_id).await?;
    let test_cases = state.store.active_test_cases(submission.assessment_id).await?;
    let rows = state.store.list_results(submission_id).await?;

    let views = rows
        .into_iter()
        .map(|row| {
            let case = test_cases.iter().find(|tc| tc.id == row.test_case_id);
            // Cases that are gone from the assessment are treated as hidden
            let hidden = case.map_or(true, |tc| tc.hidden);
            TestResultView {
                test_case_id: row.test_case_id,
                position: case.map(|tc| tc.position),
                hidden,
                status: row.status,
                error_type: row.error_type,
                score_earned: row.score_earned,
                execution_time_ms: row.execution_time_ms,
                memory_kb: row.memory_kb,
                stdout: if hidden { None } else { row.stdout },
                stderr: if hidden { None } else { row.stderr },
            }
        })
        .collect();

    Ok(Json(views))
}

/// POST /submissions/{id}/reviews - Append a human review
pub async fn create_review(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
    Json(payload): Json<ReviewRequest>,
) -> Result<(StatusCode, Json<CodingSubmissionReview>), ApiError> {
    let review = review::add_review(
        state.store.as_ref(),
        submission_id,
        NewReview {
            reviewer_id: payload.reviewer_id,
            score_adjustment: payload.score_adjustment,
            comment: payload.comment,
            rubric_scores: payload.rubric_scores,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(review)))
}

/// POST /submissions/{id}/reevaluate - Queue an explicit re-evaluation
pub async fn reevaluate_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
) -> Result<(StatusCode, Json<QueuedResponse>), ApiError> {
    load_submission(&state, submission_id).await?;
    state
        .queue
        .enqueue(&EvaluationJob::reevaluation(submission_id))
        .await?;

    info!(submission_id = %submission_id, "Re-evaluation queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            submission_id,
            queued: true,
        }),
    ))
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn load_submission(state: &AppState, id: Uuid) -> Result<CodingSubmission, ApiError> {
    state
        .store
        .get_submission(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("submission {} not found", id)))
}
