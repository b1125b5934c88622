use shell_escape::unix::escape;
use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::logger::{sanitize_log_value, Logger};

const WAIT_POLL_STEP: Duration = Duration::from_millis(10);
// How long to wait for output pipes to close after a kill.
const KILLED_PIPE_GRACE: Duration = Duration::from_millis(250);

pub(crate) fn render_args(args: &[String]) -> String {
    let mut rendered = String::new();
    for arg in args {
        rendered.push_str(escape(arg.into()).as_ref());
        rendered.push(' ');
    }
    rendered
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ProcessSpec {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) env: Vec<(String, String)>,
    /// Start from an empty environment; only `PATH` and `env` are passed through.
    pub(crate) clear_env: bool,
    pub(crate) timeout: Option<Duration>,
}

impl ProcessSpec {
    pub(crate) fn bash(script: &str) -> Self {
        Self {
            program: "bash".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Self::default()
        }
    }

    pub(crate) fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    fn apply(&self, cmd: &mut Command) {
        if self.clear_env {
            cmd.env_clear();
            if let Some(path) = env::var_os("PATH") {
                cmd.env("PATH", path);
            }
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
    }
}

#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) exit_code: i32,
    pub(crate) timed_out: bool,
}

impl ProcessOutput {
    pub(crate) fn last_stderr_line(&self) -> Option<&str> {
        self.stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .next_back()
    }
}

pub(crate) fn run_process(
    spec: &ProcessSpec,
    log_label: &str,
    id_token: &str,
    logger: &Logger,
) -> Result<ProcessOutput, String> {
    logger.log_transition(&format!(
        "cmd start label={} id={} program={} args={}",
        log_label,
        id_token,
        sanitize_log_value(&spec.program),
        sanitize_log_value(&render_args(&spec.args))
    ));

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    spec.apply(&mut cmd);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so a timeout can take down everything the child started.
        cmd.process_group(0);
    }

    let deadline = spec.timeout.map(|timeout| Instant::now() + timeout);
    let mut child = cmd
        .spawn()
        .map_err(|err| format!("Failed to run command '{}': {}", spec.program, err))?;
    let stdout_rx = spawn_reader(child.stdout.take());
    let stderr_rx = spawn_reader(child.stderr.take());

    let (status, mut timed_out) = wait_with_deadline(&mut child, deadline)
        .map_err(|err| format!("Failed to wait for command '{}': {}", spec.program, err))?;

    let pipe_deadline = if timed_out {
        Some(Instant::now() + KILLED_PIPE_GRACE)
    } else {
        deadline
    };
    let mut stdout = collect_pipe(&stdout_rx, pipe_deadline);
    let mut stderr = collect_pipe(&stderr_rx, pipe_deadline);
    if stdout.is_none() || stderr.is_none() {
        // The child exited but something it spawned still holds the pipes open.
        timed_out = true;
        kill_process_group(&mut child);
        let grace = Some(Instant::now() + KILLED_PIPE_GRACE);
        if stdout.is_none() {
            stdout = collect_pipe(&stdout_rx, grace);
        }
        if stderr.is_none() {
            stderr = collect_pipe(&stderr_rx, grace);
        }
    }
    let stdout = String::from_utf8_lossy(&stdout.unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr.unwrap_or_default()).into_owned();

    let exit_code = status.code().unwrap_or(1);
    logger.log_transition(&format!(
        "cmd exit label={} id={} exit={} timed_out={}",
        log_label, id_token, exit_code, timed_out
    ));

    Ok(ProcessOutput {
        stdout,
        stderr,
        exit_code,
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

/// Waits for a reader thread to hit EOF. `None` means the pipe was still open at `deadline`.
fn collect_pipe(rx: &mpsc::Receiver<Vec<u8>>, deadline: Option<Instant>) -> Option<Vec<u8>> {
    let Some(deadline) = deadline else {
        return Some(rx.recv().unwrap_or_default());
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(bytes) => Some(bytes),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(Vec::new()),
    }
}

fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Instant>,
) -> std::io::Result<(ExitStatus, bool)> {
    let Some(deadline) = deadline else {
        return child.wait().map(|status| (status, false));
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        let now = Instant::now();
        if now >= deadline {
            kill_process_group(child);
            let status = child.wait()?;
            return Ok((status, true));
        }
        thread::sleep(WAIT_POLL_STEP.min(deadline - now));
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: plain syscall on the group created at spawn; ESRCH is harmless.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    // The child may exit on its own between try_wait and kill.
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

pub(crate) fn command_exists(name: &str) -> bool {
    let Some(paths) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&paths).any(|path| {
        let full = path.join(name);
        full.is_file() || full.is_symlink()
    })
}

/// Decodes child stdout into a JSON value: empty is `null`, valid JSON is kept,
/// anything else becomes a JSON string of the trimmed text.
pub(crate) fn decode_stdout(stdout: &str) -> serde_json::Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(trimmed)
        .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string()))
}
