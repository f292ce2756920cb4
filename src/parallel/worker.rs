//! Isolated execution units

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{IsolationMode, ProcessingConfig, ResolvedSettings};
use crate::error::{CompressError, Result};
use crate::parallel::scheduler::CompressionTask;
use crate::processing::{CompressionResult, ProcessingEngine};

/// Request sent to a worker process on stdin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub settings: ResolvedSettings,
}

/// Reply written by a worker process on stdout
pub type WorkerReply = CompressionResult;

impl From<CompressionTask> for WorkerJob {
    fn from(task: CompressionTask) -> Self {
        Self {
            input_path: task.input_path,
            output_path: task.output_path,
            settings: task.settings,
        }
    }
}

/// Spawns one child process per task
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessWorker {
    /// Worker running `program` with no arguments
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// The `worker` subcommand of this executable, or of `program` when given
    pub fn for_binary(program: Option<PathBuf>) -> Result<Self> {
        let program = match program {
            Some(program) => program,
            None => std::env::current_exe()
                .map_err(|e| CompressError::system(format!("Cannot locate worker executable: {}", e)))?,
        };
        Ok(Self::new(program).arg("worker"))
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    async fn run(&self, job: WorkerJob) -> Result<CompressionResult> {
        let payload = serde_json::to_vec(&job)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CompressError::worker(format!("failed to spawn {:?}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A worker that dies before reading shows up in its exit status below
            if let Err(e) = stdin.write_all(&payload).await {
                debug!("Worker closed stdin early: {}", e);
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("").trim();
            return Err(CompressError::worker(if detail.is_empty() {
                format!("worker exited with {}", output.status)
            } else {
                format!("worker exited with {}: {}", output.status, detail)
            }));
        }

        serde_json::from_slice::<WorkerReply>(&output.stdout)
            .map_err(|e| CompressError::worker(format!("unreadable worker reply: {}", e)))
    }
}

/// How a task is executed off the orchestrator
#[derive(Clone)]
pub enum Executor {
    /// Blocking thread; a panic becomes a failed result
    Thread(ProcessingEngine),
    /// Child process; a crash or non-zero exit becomes a failed result
    Process(ProcessWorker),
}

impl Executor {
    /// Build the executor selected by configuration
    pub fn from_config(config: &ProcessingConfig, engine: ProcessingEngine) -> Result<Self> {
        Ok(match config.isolation {
            IsolationMode::Thread => Self::Thread(engine),
            IsolationMode::Process => Self::Process(ProcessWorker::for_binary(config.worker_program.clone())?),
        })
    }

    /// Run one task to completion. Never fails: every error becomes a failed result.
    pub async fn run(&self, task: CompressionTask) -> CompressionResult {
        let input_path = task.input_path.clone();

        let outcome = match self {
            Self::Thread(engine) => {
                let engine = engine.clone();
                tokio::task::spawn_blocking(move || {
                    engine.process_file(&task.input_path, &task.output_path, &task.settings)
                })
                .await
                .map_err(|e| {
                    if e.is_panic() {
                        CompressError::worker(format!("worker panicked: {}", panic_message(e.into_panic())))
                    } else {
                        CompressError::worker(format!("worker cancelled: {}", e))
                    }
                })
            }
            Self::Process(worker) => worker.run(task.into()).await,
        };

        outcome.unwrap_or_else(|e| {
            warn!("Execution unit for {:?} failed: {}", input_path, e);
            CompressionResult::failed(input_path, e.user_message())
        })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Serve a single job over stdin/stdout. Entry point of `batchpress worker`.
pub fn serve_stdio(engine: &ProcessingEngine) -> Result<()> {
    let mut input = Vec::new();
    std::io::stdin().read_to_end(&mut input)?;
    let job: WorkerJob = serde_json::from_slice(&input)?;

    let reply = engine.process_file(&job.input_path, &job.output_path, &job.settings);

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &reply)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, SettingsOverrides};
    use crate::error::Result as CrateResult;
    use crate::processing::{Codec, EncodedImage};
    use std::path::Path;
    use std::sync::Arc;

    struct PanickingCodec;

    impl Codec for PanickingCodec {
        fn encode(&self, _input: &Path, _settings: &ResolvedSettings) -> CrateResult<EncodedImage> {
            panic!("decoder blew up");
        }
    }

    fn task_for(input: &str) -> CompressionTask {
        let settings = resolve(Path::new(input), &SettingsOverrides::new(), &SettingsOverrides::new()).unwrap();
        CompressionTask::new(PathBuf::from(input), PathBuf::from("/tmp/never-written.jpg"), settings)
    }

    #[tokio::test]
    async fn test_thread_panic_becomes_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("a.jpg");
        std::fs::write(&input, b"bytes").unwrap();

        let executor = Executor::Thread(ProcessingEngine::with_codec(Arc::new(PanickingCodec)));
        let result = executor.run(task_for(input.to_str().unwrap())).await;

        assert!(!result.success);
        assert_eq!(result.original_path, input);
        assert_eq!(result.compressed_size, 0);
        assert_eq!(result.compression_rate, "0%");
        assert!(result.error.unwrap().contains("decoder blew up"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crashing_process_becomes_failure() {
        let executor = Executor::Process(ProcessWorker::new("/bin/false"));
        let result = executor.run(task_for("/tmp/a.jpg")).await;

        assert!(!result.success);
        assert_eq!(result.output_path, PathBuf::new());
        assert!(result.error.unwrap().contains("exited"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_reply_is_parsed() {
        let reply = serde_json::to_string(&CompressionResult {
            success: true,
            original_path: PathBuf::from("/tmp/a.jpg"),
            output_path: PathBuf::from("/tmp/a_compressed.jpg"),
            original_size: 1000,
            compressed_size: 250,
            compression_rate: "75.0%".to_string(),
            original_format: "jpg".to_string(),
            output_format: "jpg".to_string(),
            width: 4,
            height: 3,
            error: None,
        })
        .unwrap();

        let worker = ProcessWorker::new("sh")
            .arg("-c")
            .arg(format!("cat > /dev/null; printf '%s' '{}'", reply));
        let result = Executor::Process(worker).run(task_for("/tmp/a.jpg")).await;

        assert!(result.success);
        assert_eq!(result.compression_rate, "75.0%");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_garbage_reply_becomes_failure() {
        let worker = ProcessWorker::new("sh").arg("-c").arg("cat > /dev/null; echo not-json");
        let result = Executor::Process(worker).run(task_for("/tmp/a.jpg")).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("unreadable worker reply"));
    }

    #[test]
    fn test_worker_job_round_trip() {
        let job = WorkerJob::from(task_for("/tmp/a.png"));
        let json = serde_json::to_string(&job).unwrap();
        let back: WorkerJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.settings, job.settings);
        assert_eq!(back.input_path, PathBuf::from("/tmp/a.png"));
    }
}
