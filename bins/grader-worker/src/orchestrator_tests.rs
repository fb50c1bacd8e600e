/// Scenario tests for the evaluation pipeline
///
/// These tests drive the orchestrator end to end against:
/// 1. A scripted executor that replays canned per-case outcomes
/// 2. The in-memory lifecycle store
///
/// No network or Redis is needed.

#[cfg(test)]
mod pipeline_tests {
    use crate::executor::{Executor, ExecutorError, TestExecutionResult};
    use crate::orchestrator::{EvaluationError, Orchestrator};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use grader_common::memory::MemoryStore;
    use grader_common::store::{
        EvaluationCommit, EvaluationLease, StoreError, StoreResult, SubmissionStore,
    };
    use grader_common::types::{
        AssignmentStatus, CodingAssessment, CodingAssessmentAssignment, CodingSubmission,
        CodingSubmissionReview, CodingSubmissionTestResult, CodingTestCase, Difficulty, ErrorType,
        Language, SubmissionStatus, TestStatus,
    };
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    /// One canned executor answer: per-case (status, error type), or a failure
    type Script = Result<Vec<(TestStatus, Option<ErrorType>)>, ExecutorError>;

    /// Executor double that replays scripts in order and records what it saw
    #[derive(Default)]
    struct ScriptedExecutor {
        scripts: Mutex<VecDeque<Script>>,
        seen: Mutex<Vec<Vec<Uuid>>>,
        delay: Option<Duration>,
    }

    impl ScriptedExecutor {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                ..Default::default()
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(
            &self,
            _language: Language,
            _source_code: &str,
            test_cases: &[CodingTestCase],
        ) -> Result<Vec<TestExecutionResult>, ExecutorError> {
            self.seen
                .lock()
                .unwrap()
                .push(test_cases.iter().map(|tc| tc.id).collect());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("executor called more often than scripted")?;
            Ok(test_cases
                .iter()
                .zip(script)
                .map(|(tc, (status, error_type))| TestExecutionResult {
                    test_case_id: tc.id,
                    status,
                    error_type,
                    execution_time_ms: Some(25),
                    memory_kb: Some(4_096),
                    stdout: Some("out".to_string()),
                    stderr: error_type.map(|e| format!("{:?}: boom", e)),
                    error: error_type.map(|e| format!("{:?} on line 1", e)),
                })
                .collect())
        }
    }

    /// Store wrapper whose evaluation commit always fails
    struct FailingCommitStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SubmissionStore for FailingCommitStore {
        async fn get_assessment(&self, id: Uuid) -> StoreResult<Option<CodingAssessment>> {
            self.inner.get_assessment(id).await
        }
        async fn put_assessment(&self, a: &CodingAssessment) -> StoreResult<()> {
            self.inner.put_assessment(a).await
        }
        async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<CodingAssessmentAssignment>> {
            self.inner.get_assignment(id).await
        }
        async fn insert_assignment(&self, a: &CodingAssessmentAssignment) -> StoreResult<()> {
            self.inner.insert_assignment(a).await
        }
        async fn update_assignment(&self, a: &CodingAssessmentAssignment) -> StoreResult<()> {
            self.inner.update_assignment(a).await
        }
        async fn get_submission(&self, id: Uuid) -> StoreResult<Option<CodingSubmission>> {
            self.inner.get_submission(id).await
        }
        async fn insert_submission(&self, s: &CodingSubmission) -> StoreResult<()> {
            self.inner.insert_submission(s).await
        }
        async fn list_results(&self, id: Uuid) -> StoreResult<Vec<CodingSubmissionTestResult>> {
            self.inner.list_results(id).await
        }
        async fn acquire_lease(&self, id: Uuid, ttl: Duration) -> StoreResult<Option<EvaluationLease>> {
            self.inner.acquire_lease(id, ttl).await
        }
        async fn release_lease(&self, lease: &EvaluationLease) -> StoreResult<()> {
            self.inner.release_lease(lease).await
        }
        async fn commit_evaluation(&self, _commit: EvaluationCommit) -> StoreResult<()> {
            Err(StoreError::Conflict("injected commit failure".to_string()))
        }
        async fn append_review(&self, r: &CodingSubmissionReview) -> StoreResult<()> {
            self.inner.append_review(r).await
        }
        async fn list_reviews(&self, id: Uuid) -> StoreResult<Vec<CodingSubmissionReview>> {
            self.inner.list_reviews(id).await
        }
    }

    struct Fixture {
        assessment: CodingAssessment,
        assignment: CodingAssessmentAssignment,
        submission: CodingSubmission,
    }

    fn make_test_case(position: u32) -> CodingTestCase {
        CodingTestCase {
            id: Uuid::new_v4(),
            position,
            input: format!("{}", position),
            expected_output: format!("{}", position * position),
            weight: 10,
            hidden: position % 2 == 0,
            timeout_ms: 2_000,
            deleted_at: None,
        }
    }

    /// Assessment with `cases` equally-weighted test cases, an in-progress
    /// assignment and one pending submission, all stored in `store`.
    async fn seed<S: SubmissionStore>(store: &S, cases: u32) -> Fixture {
        let assessment = CodingAssessment {
            id: Uuid::new_v4(),
            title: "Square the input".to_string(),
            description: Some("Print n*n".to_string()),
            allowed_languages: vec![Language::Python, Language::Java],
            difficulty: Difficulty::Easy,
            time_limit_minutes: 30,
            max_score: 100,
            rubric: vec![],
            test_cases: (1..=cases).map(make_test_case).collect(),
            created_at: Utc::now(),
            deleted_at: None,
        };
        store.put_assessment(&assessment).await.unwrap();

        let assignment = CodingAssessmentAssignment {
            id: Uuid::new_v4(),
            assessment_id: assessment.id,
            candidate_id: Uuid::new_v4(),
            status: AssignmentStatus::InProgress,
            assigned_at: Utc::now(),
            expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
            completed_at: None,
            context: None,
        };
        store.insert_assignment(&assignment).await.unwrap();

        let submission = CodingSubmission::pending(
            &assignment,
            Language::Python,
            "n = int(input())\nprint(n * n)\n".to_string(),
        );
        store.insert_submission(&submission).await.unwrap();

        Fixture {
            assessment,
            assignment,
            submission,
        }
    }

    fn passed() -> (TestStatus, Option<ErrorType>) {
        (TestStatus::Passed, None)
    }

    fn failed() -> (TestStatus, Option<ErrorType>) {
        (TestStatus::Failed, None)
    }

    #[tokio::test]
    async fn test_two_of_three_cases_pass() {
        let store = MemoryStore::new();
        let f = seed(&store, 3).await;
        let executor = ScriptedExecutor::new(vec![Ok(vec![passed(), passed(), failed()])]);
        let orchestrator = Orchestrator::new(executor, store);

        let submission = orchestrator.evaluate_submission(f.submission.id).await.unwrap();

        assert_eq!(submission.status, SubmissionStatus::Completed);
        assert_eq!(submission.error_type, Some(ErrorType::TestFailure));
        assert_eq!(submission.passed_count, 2);
        assert_eq!(submission.failed_count, 1);
        assert_eq!(submission.total_count, 3);
        assert_eq!(submission.score, 66.67);
        assert!(submission.evaluated_at.is_some());

        let store = orchestrator.store();
        let stored = store.get_submission(f.submission.id).await.unwrap().unwrap();
        assert_eq!(stored.score, 66.67);
        assert_eq!(stored.status, SubmissionStatus::Completed);

        let rows = store.list_results(f.submission.id).await.unwrap();
        assert_eq!(rows.len(), 3);
        let earned: f64 = rows.iter().map(|r| r.score_earned).sum();
        assert!((earned - 66.66).abs() < 1e-9);
        assert_eq!(rows[2].status, TestStatus::Failed);

        let assignment = store.get_assignment(f.assignment.id).await.unwrap().unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Submitted);
        assert!(assignment.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_single_case_syntax_error() {
        let store = MemoryStore::new();
        let f = seed(&store, 1).await;
        let executor = ScriptedExecutor::new(vec![Ok(vec![(
            TestStatus::Error,
            Some(ErrorType::SyntaxError),
        )])]);
        let orchestrator = Orchestrator::new(executor, store);

        let submission = orchestrator.evaluate_submission(f.submission.id).await.unwrap();

        assert_eq!(submission.status, SubmissionStatus::Failed);
        assert_eq!(submission.error_type, Some(ErrorType::SyntaxError));
        assert_eq!(submission.score, 0.0);
        assert_eq!(submission.errored_count, 1);
        assert_eq!(submission.error_message.as_deref(), Some("SyntaxError on line 1"));
    }

    #[tokio::test]
    async fn test_single_case_timeout() {
        let store = MemoryStore::new();
        let f = seed(&store, 1).await;
        let executor = ScriptedExecutor::new(vec![Ok(vec![(TestStatus::Timeout, None)])]);
        let orchestrator = Orchestrator::new(executor, store);

        let submission = orchestrator.evaluate_submission(f.submission.id).await.unwrap();

        assert_eq!(submission.status, SubmissionStatus::Timeout);
        assert_eq!(submission.error_type, Some(ErrorType::Timeout));
        assert_eq!(submission.passed_count, 0);
        assert_eq!(submission.total_count, 1);

        let assignment = orchestrator
            .store()
            .get_assignment(f.assignment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Submitted);
    }

    #[tokio::test]
    async fn test_all_cases_pass() {
        let store = MemoryStore::new();
        let f = seed(&store, 2).await;
        let executor = ScriptedExecutor::new(vec![Ok(vec![passed(), passed()])]);
        let orchestrator = Orchestrator::new(executor, store);

        let submission = orchestrator.evaluate_submission(f.submission.id).await.unwrap();

        assert_eq!(submission.status, SubmissionStatus::Completed);
        assert_eq!(submission.error_type, None);
        assert_eq!(submission.error_message, None);
        assert_eq!(submission.score, 100.0);
        assert_eq!(submission.execution_time_ms, Some(25));
        assert_eq!(submission.memory_kb, Some(4_096));
    }

    #[tokio::test]
    async fn test_infrastructure_error_leaves_submission_pending() {
        let store = MemoryStore::new();
        let f = seed(&store, 2).await;
        let executor = ScriptedExecutor::new(vec![
            Err(ExecutorError::DeadlineExceeded(Duration::from_secs(9))),
            Ok(vec![passed(), failed()]),
        ]);
        let orchestrator = Orchestrator::new(executor, store);

        let err = orchestrator
            .evaluate_submission(f.submission.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Infrastructure(_)));
        assert!(err.is_infrastructure());
        assert!(err.is_retryable());

        let store = orchestrator.store();
        let stored = store.get_submission(f.submission.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Pending);
        assert_eq!(stored.score, 0.0);
        assert!(stored.evaluated_at.is_none());
        assert!(store.list_results(f.submission.id).await.unwrap().is_empty());
        let assignment = store.get_assignment(f.assignment.id).await.unwrap().unwrap();
        assert_eq!(assignment.status, AssignmentStatus::InProgress);

        // The lease was released, so a retry goes through
        let retried = orchestrator.evaluate_submission(f.submission.id).await.unwrap();
        assert_eq!(retried.score, 50.0);
    }

    #[tokio::test]
    async fn test_case_level_infrastructure_error_is_not_scored() {
        let store = MemoryStore::new();
        let f = seed(&store, 2).await;
        let executor = ScriptedExecutor::new(vec![Ok(vec![
            passed(),
            (TestStatus::Error, Some(ErrorType::InfrastructureError)),
        ])]);
        let orchestrator = Orchestrator::new(executor, store);

        let err = orchestrator
            .evaluate_submission(f.submission.id)
            .await
            .unwrap_err();

        assert!(matches!(err, EvaluationError::InvalidResults(_)));
        assert!(err.is_infrastructure());
        let stored = orchestrator
            .store()
            .get_submission(f.submission.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn test_reevaluation_replaces_results() {
        let store = MemoryStore::new();
        let f = seed(&store, 3).await;
        let executor = ScriptedExecutor::new(vec![
            Ok(vec![passed(), failed(), failed()]),
            Ok(vec![passed(), passed(), passed()]),
        ]);
        let orchestrator = Orchestrator::new(executor, store);

        orchestrator.evaluate_submission(f.submission.id).await.unwrap();
        let store = orchestrator.store();
        let first_rows = store.list_results(f.submission.id).await.unwrap();
        let first_assignment = store.get_assignment(f.assignment.id).await.unwrap().unwrap();

        let submission = orchestrator
            .reevaluate_submission(f.submission.id)
            .await
            .unwrap();
        assert_eq!(submission.status, SubmissionStatus::Completed);
        assert_eq!(submission.error_type, None);
        assert_eq!(submission.score, 100.0);

        let rows = store.list_results(f.submission.id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.status == TestStatus::Passed));
        assert!(rows.iter().all(|r| first_rows.iter().all(|old| old.id != r.id)));

        // Assignment stays submitted and keeps its original completion time
        let assignment = store.get_assignment(f.assignment.id).await.unwrap().unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Submitted);
        assert_eq!(assignment.completed_at, first_assignment.completed_at);
    }

    #[tokio::test]
    async fn test_terminal_submission_needs_explicit_reevaluation() {
        let store = MemoryStore::new();
        let f = seed(&store, 1).await;
        let executor = ScriptedExecutor::new(vec![Ok(vec![passed()])]);
        let orchestrator = Orchestrator::new(executor, store);

        orchestrator.evaluate_submission(f.submission.id).await.unwrap();
        let err = orchestrator
            .evaluate_submission(f.submission.id)
            .await
            .unwrap_err();

        assert!(matches!(err, EvaluationError::AlreadyEvaluated(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_concurrent_evaluation_is_single_flight() {
        let store = MemoryStore::new();
        let f = seed(&store, 1).await;
        let executor = ScriptedExecutor::new(vec![Ok(vec![passed()])])
            .with_delay(Duration::from_millis(100));
        let orchestrator = Orchestrator::new(executor, store);

        let (first, second) = tokio::join!(
            orchestrator.evaluate_submission(f.submission.id),
            orchestrator.evaluate_submission(f.submission.id)
        );

        let outcomes = [first, second];
        let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
        let in_flight = outcomes
            .iter()
            .filter(|r| matches!(r, Err(EvaluationError::InFlight(_))))
            .count();
        assert_eq!(succeeded, 1);
        assert_eq!(in_flight, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let store = FailingCommitStore {
            inner: MemoryStore::new(),
        };
        let f = seed(&store, 2).await;
        let executor = ScriptedExecutor::new(vec![Ok(vec![passed(), failed()])]);
        let orchestrator = Orchestrator::new(executor, store);

        let err = orchestrator
            .evaluate_submission(f.submission.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Store(_)));

        let store = orchestrator.store();
        let stored = store.get_submission(f.submission.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Pending);
        assert!(store.list_results(f.submission.id).await.unwrap().is_empty());
        let assignment = store.get_assignment(f.assignment.id).await.unwrap().unwrap();
        assert_eq!(assignment.status, AssignmentStatus::InProgress);

        // Lease released despite the failure
        assert!(store
            .acquire_lease(f.submission.id, Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_deleted_test_cases_are_not_sent() {
        let store = MemoryStore::new();
        let mut f = seed(&store, 3).await;
        f.assessment.test_cases[1].deleted_at = Some(Utc::now());
        store.put_assessment(&f.assessment).await.unwrap();

        let executor = ScriptedExecutor::new(vec![Ok(vec![passed(), passed()])]);
        let orchestrator = Orchestrator::new(executor, store);

        let submission = orchestrator.evaluate_submission(f.submission.id).await.unwrap();

        assert_eq!(submission.total_count, 2);
        assert_eq!(submission.score, 100.0);
        let rows = orchestrator.store().list_results(f.submission.id).await.unwrap();
        assert!(rows
            .iter()
            .all(|r| r.test_case_id != f.assessment.test_cases[1].id));
    }

    #[tokio::test]
    async fn test_executor_receives_cases_in_position_order() {
        let store = MemoryStore::new();
        let mut f = seed(&store, 3).await;
        f.assessment.test_cases.reverse();
        store.put_assessment(&f.assessment).await.unwrap();

        let executor = ScriptedExecutor::new(vec![Ok(vec![passed(), passed(), passed()])]);
        let orchestrator = Orchestrator::new(executor, store);
        orchestrator.evaluate_submission(f.submission.id).await.unwrap();

        let mut expected = f.assessment.test_cases.clone();
        expected.sort_by_key(|tc| tc.position);
        let expected_ids: Vec<Uuid> = expected.iter().map(|tc| tc.id).collect();
        assert_eq!(orchestrator_seen(&orchestrator), vec![expected_ids]);
    }

    fn orchestrator_seen(orchestrator: &Orchestrator<ScriptedExecutor, MemoryStore>) -> Vec<Vec<Uuid>> {
        orchestrator.executor().seen.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_soft_deleted_assessment_is_not_evaluated() {
        let store = MemoryStore::new();
        let mut f = seed(&store, 1).await;
        f.assessment.deleted_at = Some(Utc::now());
        store.put_assessment(&f.assessment).await.unwrap();

        let orchestrator = Orchestrator::new(ScriptedExecutor::new(vec![]), store);
        let err = orchestrator
            .evaluate_submission(f.submission.id)
            .await
            .unwrap_err();

        assert!(matches!(err, EvaluationError::AssessmentNotFound(_)));
        assert_eq!(orchestrator.executor().calls(), 0);
    }

    #[tokio::test]
    async fn test_assessment_without_active_cases() {
        let store = MemoryStore::new();
        let mut f = seed(&store, 1).await;
        f.assessment.test_cases[0].deleted_at = Some(Utc::now());
        store.put_assessment(&f.assessment).await.unwrap();

        let orchestrator = Orchestrator::new(ScriptedExecutor::new(vec![]), store);
        let err = orchestrator
            .evaluate_submission(f.submission.id)
            .await
            .unwrap_err();

        assert!(matches!(err, EvaluationError::NoTestCases(_)));
    }

    #[tokio::test]
    async fn test_unknown_submission() {
        let orchestrator = Orchestrator::new(ScriptedExecutor::new(vec![]), MemoryStore::new());
        let err = orchestrator
            .evaluate_submission(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::SubmissionNotFound(_)));
    }

    #[tokio::test]
    async fn test_expired_assignment_is_still_graded() {
        let store = MemoryStore::new();
        let mut f = seed(&store, 1).await;
        f.assignment.expires_at = Some(Utc::now() - ChronoDuration::minutes(5));
        f.assignment.status = AssignmentStatus::Expired;
        store.update_assignment(&f.assignment).await.unwrap();

        let executor = ScriptedExecutor::new(vec![Ok(vec![passed()])]);
        let orchestrator = Orchestrator::new(executor, store);
        let submission = orchestrator.evaluate_submission(f.submission.id).await.unwrap();

        assert_eq!(submission.score, 100.0);
        let assignment = orchestrator
            .store()
            .get_assignment(f.assignment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Submitted);
    }

    #[tokio::test]
    async fn test_graded_assignment_does_not_regress() {
        let store = MemoryStore::new();
        let mut f = seed(&store, 1).await;
        f.assignment.status = AssignmentStatus::Graded;
        store.update_assignment(&f.assignment).await.unwrap();

        let executor = ScriptedExecutor::new(vec![Ok(vec![failed()])]);
        let orchestrator = Orchestrator::new(executor, store);
        orchestrator.evaluate_submission(f.submission.id).await.unwrap();

        let assignment = orchestrator
            .store()
            .get_assignment(f.assignment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Graded);
    }
}
