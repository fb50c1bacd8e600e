/// Human Review Overlay
///
/// Reviews are an append-only audit trail layered on top of a graded
/// submission. They never touch the automated `score`; the final grade is
/// composed at read time by `final_grade`.

use crate::store::{StoreError, SubmissionStore};
use crate::types::{CodingSubmission, CodingSubmissionReview};
use chrono::Utc;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("submission {0} not found")]
    SubmissionNotFound(Uuid),

    #[error("submission {0} has not been graded yet")]
    NotGraded(Uuid),

    #[error("assessment {0} not found")]
    AssessmentNotFound(Uuid),

    #[error("rubric criterion '{0}' does not exist")]
    UnknownCriterion(String),

    #[error("rubric score {score} for '{criterion}' is outside 0..={max}")]
    CriterionOutOfRange {
        criterion: String,
        score: f64,
        max: f64,
    },

    #[error("score adjustment must be a finite number")]
    InvalidAdjustment,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Input of one human review
#[derive(Debug, Clone, Default)]
pub struct NewReview {
    pub reviewer_id: Uuid,
    pub score_adjustment: f64,
    pub comment: Option<String>,
    pub rubric_scores: BTreeMap<String, f64>,
}

/// Append a review to a terminal submission.
pub async fn add_review<S>(
    store: &S,
    submission_id: Uuid,
    review: NewReview,
) -> Result<CodingSubmissionReview, ReviewError>
where
    S: SubmissionStore + ?Sized,
{
    if !review.score_adjustment.is_finite() {
        return Err(ReviewError::InvalidAdjustment);
    }

    let submission = store
        .get_submission(submission_id)
        .await?
        .ok_or(ReviewError::SubmissionNotFound(submission_id))?;
    if !submission.status.is_terminal() {
        return Err(ReviewError::NotGraded(submission_id));
    }

    if !review.rubric_scores.is_empty() {
        let assessment = store
            .get_assessment(submission.assessment_id)
            .await?
            .ok_or(ReviewError::AssessmentNotFound(submission.assessment_id))?;
        for (name, score) in &review.rubric_scores {
            let criterion = assessment
                .rubric_criterion(name)
                .ok_or_else(|| ReviewError::UnknownCriterion(name.clone()))?;
            if !(0.0..=criterion.max_points).contains(score) {
                return Err(ReviewError::CriterionOutOfRange {
                    criterion: name.clone(),
                    score: *score,
                    max: criterion.max_points,
                });
            }
        }
    }

    let record = CodingSubmissionReview {
        id: Uuid::new_v4(),
        submission_id,
        reviewer_id: review.reviewer_id,
        score_adjustment: review.score_adjustment,
        comment: review.comment,
        rubric_scores: review.rubric_scores,
        created_at: Utc::now(),
    };
    store.append_review(&record).await?;

    info!(
        submission_id = %submission_id,
        reviewer_id = %record.reviewer_id,
        adjustment = record.score_adjustment,
        "Review recorded"
    );

    Ok(record)
}

/// Automated score plus every review adjustment, clamped to `[0, max_score]`.
///
/// Returns `None` while the submission is still pending.
pub fn final_grade(
    submission: &CodingSubmission,
    max_score: u32,
    reviews: &[CodingSubmissionReview],
) -> Option<f64> {
    if !submission.status.is_terminal() {
        return None;
    }
    let adjustment: f64 = reviews.iter().map(|r| r.score_adjustment).sum();
    let grade = (submission.score + adjustment).clamp(0.0, max_score as f64);
    Some((grade * 100.0).round() / 100.0)
}
