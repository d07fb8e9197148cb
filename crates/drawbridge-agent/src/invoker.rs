//! Single-flight agent process runner.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drawbridge_config::Config;
use drawbridge_protocols::{Annotation, FailureReason, Outcome, ProgressEvent};

use crate::error::AgentError;
use crate::prompt::PromptBuilder;
use crate::provider::{AgentProvider, CommandSpec};
use crate::stream::StreamParser;

const EVENT_BUFFER: usize = 256;

/// Invocation limits and placement.
#[derive(Debug, Clone)]
pub struct InvokerOptions {
    pub work_dir: PathBuf,
    pub timeout: Duration,
    /// Time between the graceful and the forceful kill.
    pub grace_period: Duration,
    pub max_prompt_chars: usize,
}

impl InvokerOptions {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            timeout: Duration::from_secs(600),
            grace_period: Duration::from_secs(5),
            max_prompt_chars: 8000,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            work_dir: config.work_dir(),
            timeout: config.agent.timeout(),
            grace_period: config.agent.grace_period(),
            max_prompt_chars: config.agent.max_prompt_chars,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// What a finished run reports back to the dispatcher.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: Outcome,
    /// Paths the agent claimed to edit, as it spelled them.
    pub reported_paths: Vec<String>,
    pub duration: Duration,
    pub exit_code: Option<i32>,
}

/// Handle to one in-flight run.
///
/// Events arrive in the order the agent produced them and always end with
/// a single `done` event.
pub struct AgentRun {
    annotation_id: String,
    events: mpsc::Receiver<ProgressEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<RunReport>,
}

impl AgentRun {
    pub fn annotation_id(&self) -> &str {
        &self.annotation_id
    }

    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the run to stop. The process is terminated before the run
    /// reports.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain remaining events and wait for the process to be gone.
    pub async fn finish(mut self) -> RunReport {
        while self.events.recv().await.is_some() {}
        match self.handle.await {
            Ok(report) => report,
            Err(e) => RunReport {
                outcome: Outcome::Failure(FailureReason::Other(format!("agent task failed: {e}"))),
                reported_paths: Vec::new(),
                duration: Duration::ZERO,
                exit_code: None,
            },
        }
    }
}

/// Launches one agent process per annotation, never two at once.
pub struct AgentInvoker {
    provider: Arc<dyn AgentProvider>,
    options: InvokerOptions,
    prompts: PromptBuilder,
    busy: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl AgentInvoker {
    pub fn new(provider: Arc<dyn AgentProvider>, options: InvokerOptions) -> Self {
        let prompts = PromptBuilder::new(options.max_prompt_chars);
        Self {
            provider,
            options,
            prompts,
            busy: Arc::new(Semaphore::new(1)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Runs started after this is cancelled, and any in flight, are
    /// cancelled with it.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn options(&self) -> &InvokerOptions {
        &self.options
    }

    pub fn is_busy(&self) -> bool {
        self.busy.available_permits() == 0
    }

    /// Start processing `annotation`.
    ///
    /// Only fails with [`AgentError::Busy`]; a process that cannot be
    /// started is reported through the run's outcome.
    pub fn process(&self, annotation: &Annotation) -> Result<AgentRun, AgentError> {
        let permit = self
            .busy
            .clone()
            .try_acquire_owned()
            .map_err(|_| AgentError::Busy)?;

        let prompt = self.prompts.build(annotation);
        let spec = self.provider.command(&prompt, &annotation.id);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = self.shutdown.child_token();

        info!(
            annotation_id = %annotation.id,
            provider = self.provider.name(),
            prompt_chars = prompt.chars().count(),
            "starting agent run"
        );

        let task = RunTask {
            annotation_id: annotation.id.clone(),
            provider: self.provider.name(),
            emits_init: self.provider.emits_init(),
            spec,
            parser: self.provider.parser(),
            options: self.options.clone(),
            events: tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(async move {
            let _permit = permit;
            task.run().await
        });

        Ok(AgentRun {
            annotation_id: annotation.id.clone(),
            events: rx,
            cancel,
            handle,
        })
    }
}

struct RunTask {
    annotation_id: String,
    provider: &'static str,
    emits_init: bool,
    spec: CommandSpec,
    parser: Box<dyn StreamParser>,
    options: InvokerOptions,
    events: mpsc::Sender<ProgressEvent>,
    cancel: CancellationToken,
}

impl RunTask {
    async fn run(mut self) -> RunReport {
        let started = Instant::now();
        let (outcome, exit_code) = self.execute().await;
        let duration = started.elapsed();

        match &outcome {
            Outcome::Success { .. } => info!(
                annotation_id = %self.annotation_id,
                elapsed_ms = duration.as_millis() as u64,
                "agent run succeeded"
            ),
            Outcome::Failure(reason) => warn!(
                annotation_id = %self.annotation_id,
                elapsed_ms = duration.as_millis() as u64,
                reason = %reason,
                "agent run failed"
            ),
        }

        self.emit(ProgressEvent::done(&outcome)).await;
        RunReport {
            outcome,
            reported_paths: self.parser.touched_paths(),
            duration,
            exit_code,
        }
    }

    async fn emit(&self, event: ProgressEvent) {
        // A closed receiver only means nobody is listening any more.
        let _ = self
            .events
            .send(event.with_annotation(self.annotation_id.clone()))
            .await;
    }

    async fn execute(&mut self) -> (Outcome, Option<i32>) {
        if !self.emits_init {
            self.emit(ProgressEvent::init(self.provider)).await;
        }

        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                let msg = format!("{}: {e}", self.spec.program);
                self.emit(ProgressEvent::error(format!("failed to start agent: {msg}")))
                    .await;
                return (Outcome::Failure(FailureReason::Spawn(msg)), None);
            }
        };
        debug!(annotation_id = %self.annotation_id, pid = ?child.id(), "agent spawned");

        if let (Some(input), Some(mut stdin)) = (self.spec.stdin.take(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "agent closed stdin early");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child, self.options.grace_period).await;
            return (
                Outcome::Failure(FailureReason::Other("agent output was not captured".into())),
                None,
            );
        };
        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stdout_open = true;
        let mut stderr_open = true;

        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!(annotation_id = %self.annotation_id, "cancelling agent run");
                    terminate(&mut child, self.options.grace_period).await;
                    return (Outcome::Failure(FailureReason::Cancelled), None);
                }
                _ = &mut deadline => {
                    let secs = self.options.timeout.as_secs();
                    self.emit(ProgressEvent::error(format!("agent timed out after {secs}s"))).await;
                    terminate(&mut child, self.options.grace_period).await;
                    return (Outcome::Failure(FailureReason::Timeout { secs }), None);
                }
                line = next_line_lossy(&mut stdout, &mut stdout_buf), if stdout_open => match line {
                    Ok(Some(line)) => {
                        for event in self.parser.parse_line(&line) {
                            self.emit(event).await;
                        }
                    }
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!(error = %e, "failed to read agent stdout");
                        stdout_open = false;
                    }
                },
                line = next_line_lossy(&mut stderr, &mut stderr_buf), if stderr_open => match line {
                    Ok(Some(line)) => {
                        if !line.trim().is_empty() {
                            self.emit(ProgressEvent::debug(line).with_label("stderr")).await;
                        }
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        warn!(error = %e, "failed to read agent stderr");
                        stderr_open = false;
                    }
                },
                status = child.wait(), if !stdout_open && !stderr_open => {
                    return self.conclude(status).await;
                }
            }
        }
    }

    fn spawn(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .current_dir(&self.options.work_dir)
            .stdin(if self.spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            // Nested Claude Code sessions refuse to start.
            .env_remove("CLAUDECODE");
        for (key, value) in &self.spec.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.spawn()
    }

    async fn conclude(
        &mut self,
        status: std::io::Result<std::process::ExitStatus>,
    ) -> (Outcome, Option<i32>) {
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                return (
                    Outcome::Failure(FailureReason::Other(format!("failed to wait for agent: {e}"))),
                    None,
                );
            }
        };
        let code = status.code();

        if !status.success() {
            let code = code.unwrap_or(-1);
            self.emit(ProgressEvent::error(format!("agent exited with code {code}")))
                .await;
            return (Outcome::Failure(FailureReason::ExitCode(code)), Some(code));
        }
        if let Some(reason) = self.parser.failure() {
            return (Outcome::Failure(FailureReason::Other(reason)), code);
        }
        let summary = self
            .parser
            .summary()
            .unwrap_or_else(|| "agent finished without a summary".to_string());
        (Outcome::success(summary), code)
    }
}

/// Read one line, replacing invalid UTF-8 rather than failing, so the pipe
/// keeps draining. Partial reads stay in `buf` if the future is dropped.
async fn next_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let read = reader.read_until(b'\n', buf).await?;
    if read == 0 && buf.is_empty() {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(['\n', '\r'])
        .to_string();
    buf.clear();
    Ok(Some(line))
}

/// Stop the agent and everything it started, politely first.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let group = Pid::from_raw(pid as i32);
            match killpg(group, Signal::SIGTERM) {
                Ok(()) => {
                    if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                        debug!(?status, "agent exited after SIGTERM");
                        // Stragglers in the group do not get a grace period.
                        let _ = killpg(group, Signal::SIGKILL);
                        return;
                    }
                    warn!(pid, "agent ignored SIGTERM, killing");
                    let _ = killpg(group, Signal::SIGKILL);
                }
                Err(e) => warn!(pid, error = %e, "failed to signal agent process group"),
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill agent process");
    }
}

#[cfg(test)]
#[path = "invoker_tests.rs"]
mod tests;
