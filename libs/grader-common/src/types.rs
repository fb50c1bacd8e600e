use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Languages the execution service advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Cpp,
    Go,
    Rust,
}

impl Language {
    pub const ALL: &'static [Language] = &[
        Language::Python,
        Language::JavaScript,
        Language::Java,
        Language::Cpp,
        Language::Go,
        Language::Rust,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported language: {invalid}")]
pub struct ParseLanguageError {
    pub invalid: String,
}

impl FromStr for Language {
    type Err = ParseLanguageError;

    /// Case-insensitive match on the wire name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|lang| lang.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseLanguageError {
                invalid: s.to_string(),
            })
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// One rubric criterion a reviewer can score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricCriterion {
    pub name: String,
    pub max_points: f64,
}

/// A reusable coding problem with its test suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingAssessment {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub allowed_languages: Vec<Language>,
    pub difficulty: Difficulty,
    pub time_limit_minutes: u32,
    #[serde(default = "default_max_score")]
    pub max_score: u32,
    #[serde(default)]
    pub rubric: Vec<RubricCriterion>,
    #[serde(default)]
    pub test_cases: Vec<CodingTestCase>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn default_max_score() -> u32 {
    100
}

impl CodingAssessment {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn allows(&self, language: Language) -> bool {
        self.allowed_languages.contains(&language)
    }

    /// Non-deleted test cases ordered by position.
    pub fn active_test_cases(&self) -> Vec<CodingTestCase> {
        let mut cases: Vec<CodingTestCase> = self
            .test_cases
            .iter()
            .filter(|tc| tc.deleted_at.is_none())
            .cloned()
            .collect();
        cases.sort_by_key(|tc| tc.position);
        cases
    }

    pub fn rubric_criterion(&self, name: &str) -> Option<&RubricCriterion> {
        self.rubric.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingTestCase {
    pub id: Uuid,
    pub position: u32,
    pub input: String,
    pub expected_output: String,
    pub weight: u32,
    #[serde(default)]
    pub hidden: bool,
    pub timeout_ms: u64,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Hiring context an assignment was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TalentContext {
    JobApplication(Uuid),
    Applicant(Uuid),
    Employee(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    InProgress,
    Submitted,
    Graded,
    Expired,
}

impl AssignmentStatus {
    /// Assignments that still accept submissions.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }

    /// True once a terminal submission has been recorded for the assignment.
    pub fn is_past_submission(&self) -> bool {
        matches!(self, Self::Submitted | Self::Graded)
    }
}

/// One candidate's invitation to attempt an assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingAssessmentAssignment {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub candidate_id: Uuid,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: Option<TalentContext>,
}

impl CodingAssessmentAssignment {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Move to `submitted` after a terminal evaluation.
    ///
    /// Returns false when the assignment was already submitted or graded; the
    /// status never regresses.
    pub fn mark_submitted(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_past_submission() {
            return false;
        }
        self.status = AssignmentStatus::Submitted;
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Completed,
    Failed,
    Timeout,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Failure classification, both per test case and per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    SyntaxError,
    CompilationError,
    RuntimeError,
    MemoryLimitExceeded,
    Timeout,
    TestFailure,
    InfrastructureError,
}

impl ErrorType {
    /// Errors that stop the whole program from building.
    pub fn is_compile_time(&self) -> bool {
        matches!(self, Self::SyntaxError | Self::CompilationError)
    }
}

/// Per-case outcome vocabulary shared with the execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Timeout,
}

/// One graded attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingSubmission {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub assessment_id: Uuid,
    pub language: Language,
    pub source_code: String,
    pub status: SubmissionStatus,
    pub error_type: Option<ErrorType>,
    pub error_message: Option<String>,
    pub passed_count: u32,
    pub failed_count: u32,
    pub errored_count: u32,
    pub timeout_count: u32,
    pub total_count: u32,
    pub score: f64,
    pub execution_time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub submitted_at: DateTime<Utc>,
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl CodingSubmission {
    /// Fresh submission waiting for its first evaluation.
    pub fn pending(
        assignment: &CodingAssessmentAssignment,
        language: Language,
        source_code: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id: assignment.id,
            assessment_id: assignment.assessment_id,
            language,
            source_code,
            status: SubmissionStatus::Pending,
            error_type: None,
            error_message: None,
            passed_count: 0,
            failed_count: 0,
            errored_count: 0,
            timeout_count: 0,
            total_count: 0,
            score: 0.0,
            execution_time_ms: None,
            memory_kb: None,
            submitted_at: Utc::now(),
            evaluated_at: None,
        }
    }
}

/// Persisted outcome of one test case within one evaluation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingSubmissionTestResult {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub test_case_id: Uuid,
    pub status: TestStatus,
    pub error_type: Option<ErrorType>,
    pub score_earned: f64,
    pub execution_time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Human overlay on a graded submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingSubmissionReview {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub reviewer_id: Uuid,
    pub score_adjustment: f64,
    pub comment: Option<String>,
    #[serde(default)]
    pub rubric_scores: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

/// Queue payload for one evaluation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub submission_id: Uuid,
    #[serde(default)]
    pub reevaluate: bool,
    #[serde(default)]
    pub attempt: u32,
}

impl EvaluationJob {
    pub fn new(submission_id: Uuid) -> Self {
        Self {
            submission_id,
            reevaluate: false,
            attempt: 0,
        }
    }

    pub fn reevaluation(submission_id: Uuid) -> Self {
        Self {
            submission_id,
            reevaluate: true,
            attempt: 0,
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}
