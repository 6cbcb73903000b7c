//! Process supervisor
//!
//! Runs one external tool at a time, capturing stdout and stderr as a single
//! stream. A per-invocation deadline runs concurrently with the child; when it
//! fires the whole process group is terminated so solver grandchildren do not
//! outlive the tool. A user interrupt aborts the child the same way and takes
//! priority over every other outcome. Interrupts are latched: once one has been
//! seen, no further tool is launched.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::stages::Invocation;

/// How long a terminated tool gets to exit before it is killed outright.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);
/// How long output capture may lag behind process exit, e.g. while a detached
/// descendant still holds the pipes.
pub const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

type CapturedOutput = Arc<Mutex<Vec<u8>>>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("deadline of {budget:?} exceeded")]
    Timeout {
        budget: Duration,
        output: Vec<u8>,
        elapsed: Duration,
    },

    #[error("interrupted")]
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub output: Vec<u8>,
    pub exit_status: i32,
    pub elapsed: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).to_string()
    }
}

/// Seam between the pipeline controller and process execution.
pub trait ToolRunner {
    fn execute(
        &mut self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, SupervisorError>;

    /// Whether the user has asked the run to stop.
    fn interrupted(&self) -> bool {
        false
    }
}

pub struct ProcessSupervisor {
    runtime: Runtime,
    interrupts: Option<InterruptListener>,
    kill_grace: Duration,
}

impl ProcessSupervisor {
    /// With `handle_interrupts`, SIGINT/Ctrl-C is captured and reported as
    /// [`SupervisorError::Interrupted`] instead of killing the driver.
    pub fn new(handle_interrupts: bool) -> io::Result<Self> {
        // One worker keeps the signal listener running while no tool is.
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let interrupts = if handle_interrupts {
            Some(InterruptListener::install(&runtime)?)
        } else {
            None
        };
        Ok(Self {
            runtime,
            interrupts,
            kill_grace: DEFAULT_KILL_GRACE,
        })
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

impl ToolRunner for ProcessSupervisor {
    fn execute(
        &mut self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, SupervisorError> {
        let interrupts = self.interrupts.as_ref().map(InterruptListener::subscribe);
        self.runtime
            .block_on(supervise(invocation, timeout, interrupts, self.kill_grace))
    }

    fn interrupted(&self) -> bool {
        self.interrupts.as_ref().is_some_and(InterruptListener::pending)
    }
}

enum Waited {
    Exited(io::Result<ExitStatus>),
    DeadlineExpired,
    Interrupted,
}

async fn supervise(
    invocation: &Invocation,
    timeout: Option<Duration>,
    interrupts: Option<watch::Receiver<bool>>,
    kill_grace: Duration,
) -> Result<ExecOutput, SupervisorError> {
    let program = invocation.program().unwrap_or_default().to_string();
    if interrupts.as_ref().is_some_and(|state| *state.borrow()) {
        debug!(program = %program, "Interrupt pending; tool not launched");
        return Err(SupervisorError::Interrupted);
    }
    if program.is_empty() {
        return Err(SupervisorError::Launch {
            program,
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command line"),
        });
    }

    let mut command = Command::new(&program);
    command
        .args(invocation.args())
        .current_dir(&invocation.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so the tool and everything it starts can be signalled together.
    #[cfg(unix)]
    command.process_group(0);

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| SupervisorError::Launch {
        program: program.clone(),
        source,
    })?;
    drop(child.stdin.take());
    debug!(
        program = %program,
        pid = child.id(),
        ?timeout,
        "Tool started"
    );

    let captured = CapturedOutput::default();
    let mut capture = tokio::spawn(capture_merged(
        child.stdout.take(),
        child.stderr.take(),
        Arc::clone(&captured),
    ));

    // Dropping these futures when the select completes cancels the deadline
    // timer on every path.
    let deadline = async move {
        match timeout {
            Some(budget) => tokio::time::sleep(budget).await,
            None => std::future::pending().await,
        }
    };
    let interrupted = async move {
        match interrupts {
            Some(mut state) => {
                if state.wait_for(|hit| *hit).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending().await,
        }
    };

    let waited = tokio::select! {
        biased;
        _ = interrupted => Waited::Interrupted,
        status = child.wait() => Waited::Exited(status),
        _ = deadline => Waited::DeadlineExpired,
    };

    match waited {
        Waited::Exited(status) => {
            let status = status.map_err(|source| SupervisorError::Launch {
                program: program.clone(),
                source,
            })?;
            let output = collect_output(&mut capture, &captured).await;
            Ok(ExecOutput {
                output,
                exit_status: exit_code(status),
                elapsed: started.elapsed(),
            })
        }
        Waited::DeadlineExpired => {
            // The child may have exited just as the deadline fired.
            if let Ok(Some(status)) = child.try_wait() {
                let output = collect_output(&mut capture, &captured).await;
                return Ok(ExecOutput {
                    output,
                    exit_status: exit_code(status),
                    elapsed: started.elapsed(),
                });
            }
            warn!(program = %program, ?timeout, "Tool exceeded its deadline; terminating");
            terminate_tree(&mut child, kill_grace).await;
            let output = collect_output(&mut capture, &captured).await;
            Err(SupervisorError::Timeout {
                budget: timeout.unwrap_or_default(),
                output,
                elapsed: started.elapsed(),
            })
        }
        Waited::Interrupted => {
            warn!(program = %program, "Interrupted; terminating tool");
            terminate_tree(&mut child, kill_grace).await;
            capture.abort();
            Err(SupervisorError::Interrupted)
        }
    }
}

/// Sends SIGTERM to the child's process group and waits up to `grace` for the
/// child to exit, escalating to SIGKILL. Failures to signal are logged only.
async fn terminate_tree(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        return;
    };

    #[cfg(unix)]
    if let Err(err) = signal_group(pid, libc::SIGTERM) {
        debug!(pid, "Process group signal failed ({err}); signalling child only");
        let _ = child.start_kill();
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => debug!(pid, "Tool terminated"),
        Err(_) => {
            warn!(pid, "Tool ignored termination request; killing");
            #[cfg(unix)]
            let _ = signal_group(pid, libc::SIGKILL);
            let _ = child.kill().await;
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the group.
    let ret = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Waits briefly for the capture task, then returns whatever it has read.
async fn collect_output(capture: &mut JoinHandle<()>, captured: &CapturedOutput) -> Vec<u8> {
    match tokio::time::timeout(OUTPUT_DRAIN, &mut *capture).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("Output capture failed: {err}"),
        Err(_) => {
            // A descendant still holds the pipes open.
            warn!("Output capture did not finish after tool exit; keeping partial output");
            capture.abort();
        }
    }
    let mut output = captured.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::take(&mut *output)
}

/// Reads stdout and stderr concurrently into `captured`, in arrival order.
async fn capture_merged(
    mut stdout: Option<ChildStdout>,
    mut stderr: Option<ChildStderr>,
    captured: CapturedOutput,
) {
    let mut out_buf = vec![0u8; 8192];
    let mut err_buf = vec![0u8; 8192];

    while stdout.is_some() || stderr.is_some() {
        let (read, from_stdout) = tokio::select! {
            read = read_some(&mut stdout, &mut out_buf) => (read, true),
            read = read_some(&mut stderr, &mut err_buf) => (read, false),
        };
        match read {
            Ok(0) | Err(_) => {
                if from_stdout {
                    stdout = None;
                } else {
                    stderr = None;
                }
            }
            Ok(n) => {
                let chunk = if from_stdout { &out_buf[..n] } else { &err_buf[..n] };
                captured
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(chunk);
            }
        }
    }
}

async fn read_some<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Latched SIGINT/Ctrl-C state, fed by a task on the supervisor's runtime.
struct InterruptListener {
    state: watch::Receiver<bool>,
}

impl InterruptListener {
    fn install(runtime: &Runtime) -> io::Result<Self> {
        let (notify, state) = watch::channel(false);

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut interrupts = {
                let _guard = runtime.enter();
                signal(SignalKind::interrupt())?
            };
            runtime.spawn(async move {
                while interrupts.recv().await.is_some() {
                    debug!("Interrupt received");
                    notify.send_replace(true);
                }
            });
        }
        #[cfg(not(unix))]
        runtime.spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received");
                notify.send_replace(true);
            }
        });

        Ok(Self { state })
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }

    fn pending(&self) -> bool {
        *self.state.borrow()
    }
}
