/// Execution Client - Boundary to the External Sandbox
///
/// **Responsibility:**
/// Send `(language, source_code, test_cases)` to the execution service and
/// return one raw result per test case, aligned to the input order.
///
/// **Critical Architectural Boundary:**
/// - Knows HOW to reach the executor (HTTP, deadline, transient retries)
/// - Does NOT score or classify submissions (evaluator's job)
/// - Does NOT persist anything
///
/// Every failure of the executor itself (unreachable, bad status, deadline,
/// garbage response, case-level infrastructure fault) comes back as an
/// `ExecutorError`. Candidate-code failures are ordinary results.

use crate::retry::calculate_backoff;
use async_trait::async_trait;
use grader_common::config::ExecutorSettings;
use grader_common::types::{CodingTestCase, ErrorType, Language, TestStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Headroom above the summed per-case timeouts the deadline never drops below
const MIN_HEADROOM: Duration = Duration::from_millis(250);

/// Cap on how much of an error body ends up in logs and errors
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Raw outcome for a single test case, as reported by the executor
#[derive(Debug, Clone, PartialEq)]
pub struct TestExecutionResult {
    pub test_case_id: Uuid,
    pub status: TestStatus,
    pub error_type: Option<ErrorType>,
    pub execution_time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor unreachable: {0}")]
    Unreachable(String),

    #[error("executor returned HTTP {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("executor did not answer within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("invalid executor response: {0}")]
    InvalidResponse(String),

    #[error("executor failed internally on test case {test_case_id}")]
    CaseInfrastructure {
        test_case_id: Uuid,
        message: Option<String>,
    },
}

/// Capability to run candidate code against test cases.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        language: Language,
        source_code: &str,
        test_cases: &[CodingTestCase],
    ) -> Result<Vec<TestExecutionResult>, ExecutorError>;

    /// Upper bound on how long one `execute` call may take.
    fn deadline(&self, test_cases: &[CodingTestCase]) -> Duration {
        let defaults = ExecutorSettings::default();
        compute_deadline(test_cases, defaults.grace, defaults.max_deadline)
    }
}

/// Deadline for one executor call.
///
/// `sum(per-case timeouts) + grace`, capped by `ceiling`, but always strictly
/// above the summed timeouts so a slow-but-legal run is never cut off.
pub fn compute_deadline(
    test_cases: &[CodingTestCase],
    grace: Duration,
    ceiling: Duration,
) -> Duration {
    let total: Duration = test_cases
        .iter()
        .map(|tc| Duration::from_millis(tc.timeout_ms))
        .sum();
    (total + grace).min(ceiling).max(total + MIN_HEADROOM)
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    language: Language,
    source_code: &'a str,
    test_cases: Vec<WireTestCase<'a>>,
}

#[derive(Debug, Serialize)]
struct WireTestCase<'a> {
    id: Uuid,
    input: &'a str,
    expected_output: &'a str,
    timeout_seconds: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExecuteResponse {
    Wrapped { results: Vec<WireResult> },
    Bare(Vec<WireResult>),
}

impl ExecuteResponse {
    fn into_results(self) -> Vec<WireResult> {
        match self {
            ExecuteResponse::Wrapped { results } => results,
            ExecuteResponse::Bare(results) => results,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResult {
    #[serde(default)]
    id: Option<Uuid>,
    status: TestStatus,
    #[serde(default)]
    error_type: Option<ErrorType>,
    #[serde(default)]
    execution_time_ms: Option<u64>,
    #[serde(default)]
    memory_kb: Option<u64>,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl WireResult {
    fn into_result(self, test_case_id: Uuid) -> TestExecutionResult {
        TestExecutionResult {
            test_case_id,
            status: self.status,
            error_type: self.error_type,
            execution_time_ms: self.execution_time_ms,
            memory_kb: self.memory_kb,
            stdout: self.stdout,
            stderr: self.stderr,
            error: self.error,
        }
    }
}

/// Match executor results to test cases, by id when the executor sends ids
/// and by position otherwise.
fn align_results(
    test_cases: &[CodingTestCase],
    wire: Vec<WireResult>,
) -> Result<Vec<TestExecutionResult>, ExecutorError> {
    if wire.len() != test_cases.len() {
        return Err(ExecutorError::InvalidResponse(format!(
            "expected {} results, got {}",
            test_cases.len(),
            wire.len()
        )));
    }

    let with_ids = wire.iter().filter(|r| r.id.is_some()).count();
    let results: Vec<TestExecutionResult> = if with_ids == 0 {
        test_cases
            .iter()
            .zip(wire)
            .map(|(tc, r)| r.into_result(tc.id))
            .collect()
    } else if with_ids == wire.len() {
        let mut by_id: HashMap<Uuid, WireResult> = HashMap::with_capacity(wire.len());
        for r in wire {
            if let Some(id) = r.id {
                if by_id.insert(id, r).is_some() {
                    return Err(ExecutorError::InvalidResponse(format!(
                        "duplicate result for test case {}",
                        id
                    )));
                }
            }
        }
        test_cases
            .iter()
            .map(|tc| {
                by_id
                    .remove(&tc.id)
                    .map(|r| r.into_result(tc.id))
                    .ok_or_else(|| {
                        ExecutorError::InvalidResponse(format!(
                            "missing result for test case {}",
                            tc.id
                        ))
                    })
            })
            .collect::<Result<_, _>>()?
    } else {
        return Err(ExecutorError::InvalidResponse(
            "results mix keyed and positional entries".to_string(),
        ));
    };

    if let Some(faulty) = results
        .iter()
        .find(|r| r.error_type == Some(ErrorType::InfrastructureError))
    {
        return Err(ExecutorError::CaseInfrastructure {
            test_case_id: faulty.test_case_id,
            message: faulty.error.clone(),
        });
    }

    Ok(results)
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Outcome of a single HTTP attempt
enum AttemptError {
    Transient(ExecutorError),
    Fatal(ExecutorError),
}

/// Production executor reached over HTTP
pub struct HttpExecutor {
    client: reqwest::Client,
    settings: ExecutorSettings,
    endpoint: String,
}

impl HttpExecutor {
    pub fn new(settings: ExecutorSettings) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ExecutorError::Unreachable(e.to_string()))?;
        let endpoint = format!("{}/execute", settings.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            settings,
            endpoint,
        })
    }

    async fn post_once(&self, request: &ExecuteRequest<'_>) -> Result<Vec<WireResult>, AttemptError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.settings.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            let err = ExecutorError::Unreachable(e.to_string());
            if e.is_connect() || e.is_timeout() || e.is_request() {
                AttemptError::Transient(err)
            } else {
                AttemptError::Fatal(err)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = ExecutorError::BadStatus {
                status: status.as_u16(),
                body: truncate(&body),
            };
            return Err(match status.as_u16() {
                502..=504 => AttemptError::Transient(err),
                _ => AttemptError::Fatal(err),
            });
        }

        response
            .json::<ExecuteResponse>()
            .await
            .map(ExecuteResponse::into_results)
            .map_err(|e| AttemptError::Fatal(ExecutorError::InvalidResponse(e.to_string())))
    }

    async fn post_with_retries(
        &self,
        request: &ExecuteRequest<'_>,
    ) -> Result<Vec<WireResult>, ExecutorError> {
        let mut attempt = 0u32;
        loop {
            match self.post_once(request).await {
                Ok(results) => return Ok(results),
                Err(AttemptError::Transient(err)) if attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay =
                        calculate_backoff(attempt, self.settings.retry_base, self.settings.max_deadline);
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient executor failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Transient(err)) | Err(AttemptError::Fatal(err)) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(
        &self,
        language: Language,
        source_code: &str,
        test_cases: &[CodingTestCase],
    ) -> Result<Vec<TestExecutionResult>, ExecutorError> {
        let deadline = self.deadline(test_cases);
        let request = ExecuteRequest {
            language,
            source_code,
            test_cases: test_cases
                .iter()
                .map(|tc| WireTestCase {
                    id: tc.id,
                    input: &tc.input,
                    expected_output: &tc.expected_output,
                    timeout_seconds: tc.timeout_ms as f64 / 1000.0,
                })
                .collect(),
        };

        debug!(
            language = %language,
            test_cases = test_cases.len(),
            source_size = source_code.len(),
            deadline_ms = deadline.as_millis() as u64,
            "Dispatching to executor"
        );

        let start = std::time::Instant::now();
        let wire = tokio::time::timeout(deadline, self.post_with_retries(&request))
            .await
            .map_err(|_| ExecutorError::DeadlineExceeded(deadline))??;
        let results = align_results(test_cases, wire)?;

        info!(
            language = %language,
            test_cases = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Executor call completed"
        );
        Ok(results)
    }

    fn deadline(&self, test_cases: &[CodingTestCase]) -> Duration {
        compute_deadline(test_cases, self.settings.grace, self.settings.max_deadline)
    }
}
