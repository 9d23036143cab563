//! Audit engine capability and its process-backed implementation.

use std::future::Future;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::result::AuditResult;

/// Anything that can audit a URL.
///
/// Implementations may take seconds per call and may launch a browser; they
/// must release whatever they spawn when the returned future is dropped.
#[async_trait]
pub trait AuditEngine: Send + Sync {
    async fn audit(&self, url: &str, config: &EngineConfig) -> Result<AuditResult, EngineError>;
}

/// Adapts an async closure into an [`AuditEngine`].
///
/// The closure receives owned copies of the URL and engine configuration.
pub struct FnEngine<F>(F);

/// Wrap `f` as an engine.
pub fn engine_fn<F, Fut>(f: F) -> FnEngine<F>
where
    F: Fn(String, EngineConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AuditResult, EngineError>> + Send + 'static,
{
    FnEngine(f)
}

#[async_trait]
impl<F, Fut> AuditEngine for FnEngine<F>
where
    F: Fn(String, EngineConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AuditResult, EngineError>> + Send + 'static,
{
    async fn audit(&self, url: &str, config: &EngineConfig) -> Result<AuditResult, EngineError> {
        (self.0)(url.to_string(), config.clone()).await
    }
}

// ---------------------------------------------------------------------------
// Process handle
// ---------------------------------------------------------------------------

/// Exclusively owned child process running in its own process group.
///
/// The engine usually starts a browser of its own, so teardown signals the
/// whole group rather than just the direct child. Dropping the guard before
/// [`BrowserProcess::finish`] returns kills every process in the group.
pub struct BrowserProcess {
    label: String,
    child: Option<Child>,
    pgid: Option<u32>,
}

impl BrowserProcess {
    /// Spawn `program args` with piped output as a new process group leader.
    pub fn spawn(
        label: &str,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
    ) -> Result<Self, EngineError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| EngineError::Launch(format!("{program}: {e}")))?;

        let pgid = child.id();
        debug!(process = %label, pid = ?pgid, "spawned audit process");
        Ok(Self {
            label: label.to_string(),
            child: Some(child),
            pgid,
        })
    }

    /// Process id of the group leader, captured at spawn.
    pub fn id(&self) -> Option<u32> {
        self.pgid
    }

    /// Wait for the leader to exit and collect its output.
    ///
    /// Processes the engine left behind in its group are killed once the
    /// leader has exited.
    pub async fn finish(mut self) -> Result<Output, EngineError> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| EngineError::Launch(format!("{} already finished", self.label)))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (status, stdout, stderr) =
            tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))?;

        self.child = None;
        kill_process_group(&self.label, self.pgid);
        Ok(Output {
            status,
            stdout,
            stderr,
        })
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            kill_process_group(&self.label, self.pgid);
            let _ = child.start_kill();
            debug!(process = %self.label, "killed unfinished audit process");
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(unix)]
fn kill_process_group(label: &str, pgid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(process = %label, pgid, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_label: &str, _pgid: Option<u32>) {}

// ---------------------------------------------------------------------------
// Command engine
// ---------------------------------------------------------------------------

/// Runs an external audit CLI that prints a JSON report to stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    base_args: Vec<String>,
    script_runner: String,
}

impl CommandEngine {
    /// Run `program`, resolved through `PATH` unless it is a path.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            script_runner: "node".to_string(),
        }
    }

    /// The `lighthouse` CLI found on `PATH`.
    pub fn lighthouse() -> Self {
        Self::new("lighthouse")
    }

    /// Arguments placed before the generated ones.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Interpreter used for the pre-navigation script.
    pub fn with_script_runner(mut self, runner: impl Into<String>) -> Self {
        self.script_runner = runner.into();
        self
    }

    /// Command-line arguments for one audit of `url`.
    pub fn build_args(&self, url: &str, config: &EngineConfig) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push(url.to_string());
        args.push("--output=json".to_string());
        args.push("--output-path=stdout".to_string());
        args.push("--quiet".to_string());
        args.push(format!(
            "--throttling-method={}",
            config.throttling_method.as_str()
        ));
        if !config.only_categories.is_empty() {
            args.push(format!(
                "--only-categories={}",
                config.only_categories.join(",")
            ));
        }
        if !config.chrome_flags.is_empty() {
            args.push(format!("--chrome-flags={}", config.chrome_flags.join(" ")));
        }
        if !config.extra_headers.is_empty() {
            let headers = serde_json::to_string(&config.extra_headers).unwrap_or_default();
            args.push(format!("--extra-headers={headers}"));
        }
        args
    }

    fn build_envs(config: &EngineConfig) -> Vec<(String, String)> {
        config
            .sample_size
            .map(|n| vec![("AUDIT_SAMPLE_SIZE".to_string(), n.to_string())])
            .unwrap_or_default()
    }

    async fn run_pre_navigation(&self, url: &str, config: &EngineConfig) -> Result<(), EngineError> {
        let Some(script) = &config.pre_navigation_script else {
            return Ok(());
        };
        let args = vec![script.to_string_lossy().to_string(), url.to_string()];
        let output = BrowserProcess::spawn("pre-navigation", &self.script_runner, &args, &[])
            .map_err(|e| EngineError::PreNavigation(e.to_string()))?
            .finish()
            .await?;
        if !output.status.success() {
            return Err(EngineError::PreNavigation(format!(
                "{} exited with code {}: {}",
                script.display(),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditEngine for CommandEngine {
    async fn audit(&self, url: &str, config: &EngineConfig) -> Result<AuditResult, EngineError> {
        self.run_pre_navigation(url, config).await?;

        let args = self.build_args(url, config);
        let envs = Self::build_envs(config);
        let output = BrowserProcess::spawn(url, &self.program, &args, &envs)?
            .finish()
            .await?;

        if !output.status.success() {
            return Err(EngineError::Exited {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let report: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::InvalidOutput(e.to_string()))?;
        AuditResult::from_report_json(&report)
    }
}
