//! Runs generated programs through the external engine.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::markers;

/// Upper bound on captured output per stream.
pub const OUTPUT_CAP_BYTES: usize = 10 * 1024 * 1024;

/// Name of the program file written into the working directory.
pub const PROGRAM_FILE: &str = "export_program.py";

/// How long output readers may run on after the engine exits.
const READER_GRACE: Duration = Duration::from_secs(2);

/// What one engine invocation left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRun {
    /// stdout followed by stderr, lossily decoded.
    pub output: String,
    /// Nonzero exit, kill on timeout, or failure to start.
    pub failed: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
}

/// Future type for engine runs. Runs never fail; failures are in [`EngineRun`].
pub type EngineFuture<'a> = Pin<Box<dyn Future<Output = EngineRun> + Send + 'a>>;

/// An engine that can execute an export program.
pub trait Engine: Send + Sync + 'static {
    fn run<'a>(&'a self, program: &'a str, work_dir: &'a Path, timeout: Duration)
    -> EngineFuture<'a>;
}

/// Headless engine invoked as a subprocess.
///
/// `args` are passed verbatim except `{program}`, which is replaced by the
/// path of the written program file.
#[derive(Debug, Clone)]
pub struct SubprocessEngine {
    binary: PathBuf,
    args: Vec<String>,
}

impl SubprocessEngine {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
        }
    }

    /// Blender in background mode with factory settings.
    pub fn blender(binary: impl Into<PathBuf>) -> Self {
        Self::new(
            binary,
            ["--background", "--factory-startup", "--python-exit-code", "1", "--python", "{program}"]
                .map(String::from)
                .to_vec(),
        )
    }

    async fn execute(&self, program: &str, work_dir: &Path, timeout: Duration) -> EngineRun {
        let program_path = work_dir.join(PROGRAM_FILE);
        if let Err(e) = tokio::fs::write(&program_path, program).await {
            tracing::error!(error = %e, path = %program_path.display(), "Failed to write program");
            return EngineRun::not_started(format!("failed to write program file: {e}"));
        }

        let program_arg = program_path.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{program}", &program_arg))
            .collect();

        tracing::debug!(binary = %self.binary.display(), ?args, "Starting engine");

        let mut child = match Command::new(&self.binary)
            .args(&args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, binary = %self.binary.display(), "Engine failed to start");
                return EngineRun::not_started(format!(
                    "failed to start engine {}: {e}",
                    self.binary.display()
                ));
            }
        };

        let stdout = Captured::default();
        let stderr = Captured::default();
        let readers = [
            child
                .stdout
                .take()
                .map(|s| tokio::spawn(read_capped(s, stdout.clone()))),
            child
                .stderr
                .take()
                .map(|s| tokio::spawn(read_capped(s, stderr.clone()))),
        ];

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Waiting on engine failed");
                (None, false)
            }
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Engine timed out, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill engine");
                }
                (None, true)
            }
        };

        // Descendants of a killed engine can hold the pipes open.
        for mut reader in readers.into_iter().flatten() {
            if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
                tracing::warn!("Output pipe still open after engine exit, abandoning reader");
                reader.abort();
            }
        }

        let mut output = stdout.text();
        output.push_str(&stderr.text());

        if timed_out {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&format!(
                "{}: killed after {}s\n",
                markers::ENGINE_TIMEOUT,
                timeout.as_secs_f64()
            ));
        }

        EngineRun {
            output,
            failed: timed_out || exit_code != Some(0),
            timed_out,
            exit_code,
        }
    }
}

impl Engine for SubprocessEngine {
    fn run<'a>(
        &'a self,
        program: &'a str,
        work_dir: &'a Path,
        timeout: Duration,
    ) -> EngineFuture<'a> {
        Box::pin(self.execute(program, work_dir, timeout))
    }
}

impl EngineRun {
    fn not_started(message: String) -> Self {
        Self {
            output: message,
            failed: true,
            timed_out: false,
            exit_code: None,
        }
    }
}

/// Bytes read from one pipe so far, shared with its reader task.
#[derive(Debug, Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn append(&self, bytes: &[u8]) {
        let mut kept = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let room = OUTPUT_CAP_BYTES.saturating_sub(kept.len());
        kept.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn text(&self) -> String {
        let kept = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&kept).into_owned()
    }
}

/// Drain a pipe to EOF, keeping at most [`OUTPUT_CAP_BYTES`].
///
/// Reading continues past the cap so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, into: Captured) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => into.append(&chunk[..n]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh() -> SubprocessEngine {
        SubprocessEngine::new("sh", vec!["{program}".to_string()])
    }

    #[tokio::test]
    async fn captures_both_streams_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let run = sh()
            .run("echo out; echo err >&2", dir.path(), Duration::from_secs(10))
            .await;

        assert!(!run.failed);
        assert_eq!(run.exit_code, Some(0));
        assert_eq!(run.output, "out\nerr\n");
        assert!(dir.path().join(PROGRAM_FILE).exists());
    }

    #[tokio::test]
    async fn nonzero_exit_is_captured_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let run = sh()
            .run("echo CRITICAL_EXPORT_ERROR; exit 4", dir.path(), Duration::from_secs(10))
            .await;

        assert!(run.failed);
        assert!(!run.timed_out);
        assert_eq!(run.exit_code, Some(4));
        assert!(run.output.contains("CRITICAL_EXPORT_ERROR"));
    }

    #[tokio::test]
    async fn runs_inside_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let run = sh()
            .run("printf 'x' > produced.bin", dir.path(), Duration::from_secs(10))
            .await;

        assert!(!run.failed);
        assert!(dir.path().join("produced.bin").exists());
    }

    #[tokio::test]
    async fn timeout_kills_and_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let run = sh()
            .run("echo started; sleep 30", dir.path(), Duration::from_millis(300))
            .await;

        assert!(run.failed);
        assert!(run.timed_out);
        assert!(run.output.starts_with("started\n"));
        assert!(run.output.contains("ENGINE_TIMEOUT"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SubprocessEngine::new("/nonexistent/engine-binary", vec![]);
        let run = engine.run("", dir.path(), Duration::from_secs(1)).await;

        assert!(run.failed);
        assert!(run.output.contains("failed to start engine"));
    }

    #[test]
    fn blender_args_reference_program() {
        let engine = SubprocessEngine::blender("blender");
        assert!(engine.args.contains(&"--background".to_string()));
        assert_eq!(engine.args.last().map(String::as_str), Some("{program}"));
    }
}
