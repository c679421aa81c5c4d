//! ABOUTME: Executor runner — one worker loop per process, subprocess per job
//! ABOUTME: Runs arbitrary shell; deploy only where that is acceptable

use crate::intake::{CancelSet, RunnerQueue};
use ds_broker::{BrokerProducer, Envelope, EnvelopeType, JobResultPayload, JobSubmitPayload, TOPIC_JOB_RESULT};
use ds_core::time::now_iso8601;
use ds_db::Db;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing::{info, instrument, warn};

/// How often the output-reading loop re-checks the timeout and
/// cancellation predicates when the subprocess is otherwise silent.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const READ_CHUNK_BYTES: usize = 128;

pub struct Runner {
    queue: Arc<RunnerQueue>,
    cancel_set: Arc<CancelSet>,
    producer: Arc<BrokerProducer>,
    db: Db,
    scratch_dir: PathBuf,
}

enum Outcome {
    Success,
    Failed(String),
    Timeout(String),
}

impl Runner {
    pub fn new(
        queue: Arc<RunnerQueue>,
        cancel_set: Arc<CancelSet>,
        producer: Arc<BrokerProducer>,
        db: Db,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            queue,
            cancel_set,
            producer,
            db,
            scratch_dir,
        }
    }

    /// Runs forever: pop a job (waiting on the queue's notifier when
    /// empty), run it, publish its result.
    pub async fn run(self) {
        loop {
            let job = match self.queue.pop() {
                Some(job) => job,
                None => {
                    self.queue.notified().await;
                    continue;
                }
            };
            self.run_one(job).await;
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    async fn run_one(&self, job: JobSubmitPayload) {
        if self.cancel_set.contains(&job.job_id) {
            info!(job_id = %job.job_id, "job already cancelled, skipping execution");
            self.publish_result(&job.job_id, Outcome::Failed("task cancelled".to_string()), None, now_iso8601())
                .await;
            return;
        }

        if let Err(e) = self.db.executions().mark_running(job.execution_id).await {
            warn!(execution_id = job.execution_id, error = %e, "failed to mark execution running");
        }

        let start_time = now_iso8601();
        let script_path = self
            .scratch_dir
            .join(format!("job_{}_{}.sh", job.job_id, ulid::Ulid::new()));

        if let Err(e) = self.write_script(&script_path, &job.command).await {
            warn!(job_id = %job.job_id, error = %e, "failed to write job script");
            self.publish_result(&job.job_id, Outcome::Failed(e), None, now_iso8601())
                .await;
            return;
        }

        let (outcome, output) = self.execute_script(&job, &script_path).await;
        let _ = tokio::fs::remove_file(&script_path).await;

        self.publish_result(&job.job_id, outcome, Some(output), start_time).await;
    }

    async fn write_script(&self, path: &PathBuf, command: &str) -> Result<(), String> {
        let contents = format!("#!/bin/bash\n{command}\n");
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| format!("failed to write script: {e}"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| format!("failed to chmod script: {e}"))?;
        }
        Ok(())
    }

    /// Spawns the script, capturing combined stdout+stderr. Polls the
    /// timeout and cancellation predicates at [`POLL_INTERVAL`] while
    /// reading, matching the original's per-read liveness checks without
    /// busy-looping when the subprocess is quiet.
    async fn execute_script(&self, job: &JobSubmitPayload, script_path: &PathBuf) -> (Outcome, String) {
        let timeout = Duration::from_secs(if job.timeout_seconds > 0 {
            job.timeout_seconds as u64
        } else {
            60
        });

        let mut child = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(format!("{} 2>&1", script_path.display()))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return (Outcome::Failed(format!("failed to spawn job: {e}")), String::new()),
        };

        let Some(mut stdout) = child.stdout.take() else {
            return (Outcome::Failed("failed to capture job output".to_string()), String::new());
        };

        let mut output = String::new();
        let start = Instant::now();
        let mut buf = [0u8; READ_CHUNK_BYTES];
        let outcome = loop {
            tokio::select! {
                read = stdout.read(&mut buf) => {
                    match read {
                        Ok(0) => break None,
                        Ok(n) => output.push_str(&String::from_utf8_lossy(&buf[..n])),
                        Err(_) => break None,
                    }
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            if start.elapsed() >= timeout {
                let _ = child.kill().await;
                break Some(Outcome::Timeout("execution timeout".to_string()));
            }
            if self.cancel_set.contains(&job.job_id) {
                let _ = child.kill().await;
                break Some(Outcome::Failed("job cancelled during execution".to_string()));
            }
        };

        if let Some(outcome) = outcome {
            return (outcome, output);
        }

        match child.wait().await {
            Ok(status) if status.success() => (Outcome::Success, output),
            Ok(status) => (
                Outcome::Failed(format!(
                    "Command exited with status {}",
                    status.code().unwrap_or(-1)
                )),
                output,
            ),
            Err(e) => (Outcome::Failed(format!("failed to wait for job: {e}")), output),
        }
    }

    async fn publish_result(&self, job_id: &str, outcome: Outcome, output: Option<String>, start_time: String) {
        let end_time = now_iso8601();
        let (status, error) = match outcome {
            Outcome::Success => ("SUCCESS".to_string(), None),
            Outcome::Failed(err) => ("FAILED".to_string(), Some(err)),
            Outcome::Timeout(err) => ("TIMEOUT".to_string(), Some(err)),
        };
        let payload = JobResultPayload {
            job_id: job_id.to_string(),
            status,
            output,
            error,
            start_time,
            end_time,
        };
        let Ok(payload_json) = serde_json::to_string(&payload) else {
            warn!(job_id, "failed to encode job result");
            return;
        };
        let envelope = Envelope::new(EnvelopeType::JobResult, payload_json);
        self.producer.produce(TOPIC_JOB_RESULT, job_id, &envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::{CancelSet, RunnerQueue};

    /// `execute_script` never touches the producer, so these exercise the
    /// subprocess/timeout/cancellation logic against a real shell without
    /// a broker or store.
    async fn test_runner() -> Runner {
        let db_path = std::env::temp_dir().join(format!("ds_executor-runner-test-{}.db", ulid::Ulid::new()));
        let db = Db::new(db_path.to_str().unwrap()).await.unwrap();
        let producer = Arc::new(BrokerProducer::new("127.0.0.1:0").unwrap());
        Runner::new(
            Arc::new(RunnerQueue::new()),
            Arc::new(CancelSet::new()),
            producer,
            db,
            std::env::temp_dir(),
        )
    }

    fn job(command: &str, timeout_seconds: i64) -> JobSubmitPayload {
        JobSubmitPayload {
            execution_id: 1,
            job_id: "job-1".to_string(),
            command: command.to_string(),
            timeout_seconds,
        }
    }

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let runner = test_runner().await;
        let job = job("echo hello", 5);
        let script_path = runner.scratch_dir.join("script-success.sh");
        runner.write_script(&script_path, &job.command).await.unwrap();

        let (outcome, output) = runner.execute_script(&job, &script_path).await;
        let _ = tokio::fs::remove_file(&script_path).await;

        assert!(matches!(outcome, Outcome::Success));
        assert!(output.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let runner = test_runner().await;
        let job = job("exit 7", 5);
        let script_path = runner.scratch_dir.join("script-fail.sh");
        runner.write_script(&script_path, &job.command).await.unwrap();

        let (outcome, _) = runner.execute_script(&job, &script_path).await;
        let _ = tokio::fs::remove_file(&script_path).await;

        match outcome {
            Outcome::Failed(err) => assert!(err.contains('7')),
            _ => panic!("expected Failed outcome"),
        }
    }

    #[tokio::test]
    async fn long_running_command_times_out() {
        let runner = test_runner().await;
        let job = job("sleep 5", 1);
        let script_path = runner.scratch_dir.join("script-timeout.sh");
        runner.write_script(&script_path, &job.command).await.unwrap();

        let (outcome, _) = runner.execute_script(&job, &script_path).await;
        let _ = tokio::fs::remove_file(&script_path).await;

        match outcome {
            Outcome::Timeout(err) => assert!(err.contains("timeout")),
            _ => panic!("expected Timeout outcome"),
        }
    }

    #[tokio::test]
    async fn cancellation_during_execution_kills_the_subprocess() {
        let runner = test_runner().await;
        let job = job("sleep 5", 30);
        let script_path = runner.scratch_dir.join("script-cancel.sh");
        runner.write_script(&script_path, &job.command).await.unwrap();

        runner.cancel_set.insert(&job.job_id);
        let (outcome, _) = runner.execute_script(&job, &script_path).await;
        let _ = tokio::fs::remove_file(&script_path).await;

        match outcome {
            Outcome::Failed(err) => assert!(err.contains("cancelled")),
            _ => panic!("expected Failed(cancelled) outcome"),
        }
    }
}
