use std::process::Stdio;
use tokio::process::Command;

/// Final state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed,
    Cancelled,
    /// Never started because the worker stopped fetching new jobs.
    Skipped,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of job execution
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn cancelled(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Cancelled,
            exit_code: None,
            output: None,
            error: Some("cancelled".to_string()),
        }
    }

    /// Still running when the worker's shutdown drain time ran out.
    pub fn interrupted(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Failed,
            exit_code: None,
            output: None,
            error: Some("interrupted by shutdown".to_string()),
        }
    }

    pub fn skipped(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Skipped,
            exit_code: None,
            output: None,
            error: Some("worker stopped fetching new jobs".to_string()),
        }
    }
}

/// Runs job commands with `sh -c`.
///
/// The child is killed when the execution future is dropped, which is how a
/// cancelled job stops its process.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub async fn execute(&self, job_id: &str, command: &str) -> ExecutionResult {
        tracing::info!(jid = job_id, command, "Executing job");

        let result = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        Self::process_output(job_id, result)
    }

    fn process_output(
        job_id: &str,
        result: Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                let (status, error) = if output.status.success() {
                    (JobStatus::Completed, None)
                } else {
                    (
                        JobStatus::Failed,
                        Some(if stderr.is_empty() {
                            format!("Exit code: {:?}", exit_code)
                        } else {
                            stderr.clone()
                        }),
                    )
                };

                tracing::info!(
                    jid = job_id,
                    status = %status,
                    exit_code = ?exit_code,
                    "Job completed"
                );

                ExecutionResult {
                    job_id: job_id.to_string(),
                    status,
                    exit_code,
                    output: if stdout.is_empty() {
                        None
                    } else {
                        Some(stdout)
                    },
                    error,
                }
            }
            Err(e) => {
                tracing::error!(jid = job_id, error = %e, "Job execution failed");
                ExecutionResult {
                    job_id: job_id.to_string(),
                    status: JobStatus::Failed,
                    exit_code: None,
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
