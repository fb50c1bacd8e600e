// Operator commands for the grading pipeline
use anyhow::{bail, Context, Result};
use grader_common::redis::{self, RedisStore};
use grader_common::review;
use grader_common::store::SubmissionStore;
use grader_common::types::{
    CodingAssessment, CodingAssessmentAssignment, CodingSubmission, CodingSubmissionReview,
    CodingSubmissionTestResult, EvaluationJob,
};
use serde::Deserialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Seed file: one assessment plus the assignments issued for it
#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub assessment: CodingAssessment,
    #[serde(default)]
    pub assignments: Vec<CodingAssessmentAssignment>,
}

pub fn load_fixture(path: &Path) -> Result<Fixture> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;
    let fixture: Fixture = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse fixture {}", path.display()))?;

    if let Some(stray) = fixture
        .assignments
        .iter()
        .find(|a| a.assessment_id != fixture.assessment.id)
    {
        bail!(
            "assignment {} references assessment {}, expected {}",
            stray.id,
            stray.assessment_id,
            fixture.assessment.id
        );
    }
    Ok(fixture)
}

/// Stores the fixture's assessment and assignments; returns the number of
/// assignments written.
pub async fn seed_fixture<S: SubmissionStore + ?Sized>(store: &S, fixture: &Fixture) -> Result<usize> {
    store
        .put_assessment(&fixture.assessment)
        .await
        .context("Failed to store assessment")?;

    for assignment in &fixture.assignments {
        store
            .insert_assignment(assignment)
            .await
            .with_context(|| format!("Failed to store assignment {}", assignment.id))?;
    }
    Ok(fixture.assignments.len())
}

pub async fn seed(store: &RedisStore, path: &Path) -> Result<()> {
    let fixture = load_fixture(path)?;
    println!("🌱 Seeding assessment: {}", fixture.assessment.title);

    let count = seed_fixture(store, &fixture).await?;

    println!("✅ Assessment {} stored", fixture.assessment.id);
    println!(
        "   {} active test case(s), {} assignment(s)",
        fixture.assessment.active_test_cases().len(),
        count
    );
    Ok(())
}

pub async fn reevaluate(store: &RedisStore, submission_id: Uuid) -> Result<()> {
    if store.get_submission(submission_id).await?.is_none() {
        bail!("submission {} not found", submission_id);
    }

    let mut conn = store.connection();
    redis::push_job(&mut conn, &EvaluationJob::reevaluation(submission_id))
        .await
        .context("Failed to queue re-evaluation")?;

    println!("🔁 Re-evaluation of {} queued", submission_id);
    Ok(())
}

pub async fn show(store: &RedisStore, submission_id: Uuid) -> Result<()> {
    let submission = store
        .get_submission(submission_id)
        .await?
        .with_context(|| format!("submission {} not found", submission_id))?;
    let max_score = store
        .get_assessment(submission.assessment_id)
        .await?
        .map(|a| a.max_score)
        .unwrap_or(100);
    let results = store.list_results(submission_id).await?;
    let reviews = store.list_reviews(submission_id).await?;

    print!("{}", render_submission(&submission, max_score, &results, &reviews));
    Ok(())
}

/// Human-readable summary of a submission, its test results and reviews
pub fn render_submission(
    submission: &CodingSubmission,
    max_score: u32,
    results: &[CodingSubmissionTestResult],
    reviews: &[CodingSubmissionReview],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📄 Submission {}", submission.id);
    let _ = writeln!(out, "   language:   {}", submission.language);
    let _ = writeln!(out, "   status:     {}", submission.status);
    if let Some(error_type) = submission.error_type {
        let _ = writeln!(out, "   error type: {:?}", error_type);
    }
    if let Some(message) = &submission.error_message {
        let _ = writeln!(out, "   message:    {}", message);
    }
    let _ = writeln!(
        out,
        "   tests:      {} passed / {} failed / {} errored / {} timed out (of {})",
        submission.passed_count,
        submission.failed_count,
        submission.errored_count,
        submission.timeout_count,
        submission.total_count
    );
    let _ = writeln!(out, "   score:      {:.2} / {}", submission.score, max_score);

    match review::final_grade(submission, max_score, reviews) {
        Some(grade) => {
            let _ = writeln!(out, "   final:      {:.2} ({} review(s))", grade, reviews.len());
        }
        None => {
            let _ = writeln!(out, "   final:      pending evaluation");
        }
    }

    if !results.is_empty() {
        let _ = writeln!(out, "\n📊 Test results");
        for (idx, result) in results.iter().enumerate() {
            let _ = writeln!(
                out,
                "   #{:<3} {:<8} {:>7.2} pts  {:>6} ms  {}",
                idx + 1,
                format!("{:?}", result.status).to_lowercase(),
                result.score_earned,
                result
                    .execution_time_ms
                    .map_or_else(|| "-".to_string(), |ms| ms.to_string()),
                result.test_case_id
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use grader_common::memory::MemoryStore;
    use grader_common::types::{Language, SubmissionStatus, TestStatus};
    use chrono::Utc;

    const SAMPLE: &str = "../../fixtures/sum-two-numbers.json";

    #[test]
    fn test_sample_fixture_parses() {
        let fixture = load_fixture(Path::new(SAMPLE)).unwrap();
        assert_eq!(fixture.assessment.active_test_cases().len(), 3);
        assert_eq!(fixture.assignments.len(), 1);
        assert!(fixture.assessment.allows(Language::Python));
    }

    #[tokio::test]
    async fn test_seed_fixture_into_store() {
        let store = MemoryStore::new();
        let fixture = load_fixture(Path::new(SAMPLE)).unwrap();

        let count = seed_fixture(&store, &fixture).await.unwrap();

        assert_eq!(count, 1);
        assert!(store.get_assessment(fixture.assessment.id).await.unwrap().is_some());
        assert!(store
            .get_assignment(fixture.assignments[0].id)
            .await
            .unwrap()
            .is_some());

        // Assignments are insert-only
        assert!(seed_fixture(&store, &fixture).await.is_err());
    }

    #[test]
    fn test_render_pending_submission() {
        let fixture: Fixture = serde_json::from_str(&fs::read_to_string(SAMPLE).unwrap()).unwrap();
        let submission = CodingSubmission::pending(
            &fixture.assignments[0],
            Language::Python,
            "print(sum(map(int, input().split())))".into(),
        );

        let text = render_submission(&submission, 100, &[], &[]);
        assert!(text.contains("status:     pending"));
        assert!(text.contains("pending evaluation"));
        assert!(!text.contains("Test results"));
    }

    #[test]
    fn test_render_evaluated_submission() {
        let fixture: Fixture = serde_json::from_str(&fs::read_to_string(SAMPLE).unwrap()).unwrap();
        let mut submission =
            CodingSubmission::pending(&fixture.assignments[0], Language::Python, "x".into());
        submission.status = SubmissionStatus::Completed;
        submission.passed_count = 3;
        submission.total_count = 3;
        submission.score = 100.0;

        let result = CodingSubmissionTestResult {
            id: Uuid::new_v4(),
            submission_id: submission.id,
            test_case_id: fixture.assessment.test_cases[0].id,
            status: TestStatus::Passed,
            error_type: None,
            score_earned: 25.0,
            execution_time_ms: Some(12),
            memory_kb: None,
            stdout: None,
            stderr: None,
            created_at: Utc::now(),
        };
        let review = CodingSubmissionReview {
            id: Uuid::new_v4(),
            submission_id: submission.id,
            reviewer_id: Uuid::new_v4(),
            score_adjustment: 5.0,
            comment: None,
            rubric_scores: Default::default(),
            created_at: Utc::now(),
        };

        let text = render_submission(&submission, 100, &[result], &[review]);
        assert!(text.contains("score:      100.00 / 100"));
        assert!(text.contains("final:      100.00 (1 review(s))"));
        assert!(text.contains("passed"));
        assert!(text.contains("12 ms"));
    }
}
