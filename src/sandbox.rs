use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use crate::logger::Logger;
use crate::shell::{decode_stdout, run_process, ProcessSpec};

const SCRIPT_FILE: &str = "script";
const RUNNER_FILE: &str = "runner.js";
const RESULT_FILE: &str = "result.json";

/// Wraps the script body in an async function bound to `args` and `console`,
/// awaits it, and reports `{ok, result}` or `{ok: false, error}` to the result file.
/// Console output goes to stderr so it ends up in the transition log.
const NODE_RUNNER: &str = r#"'use strict';
const fs = require('fs');
const resultPath = process.env.TASKBRIDGE_RESULT_PATH;
const body = fs.readFileSync(process.argv[2], 'utf8');
const args = JSON.parse(process.env.TASKBRIDGE_SCRIPT_ARGS || '[]');
const render = (items) =>
  items.map((item) => (typeof item === 'string' ? item : JSON.stringify(item))).join(' ');
const write = (...items) => process.stderr.write(render(items) + '\n');
const scriptConsole = { log: write, info: write, warn: write, error: write, debug: write };
const report = (outcome) => {
  try {
    fs.writeFileSync(resultPath, JSON.stringify(outcome));
  } catch (err) {
    fs.writeFileSync(resultPath, JSON.stringify({ ok: false, error: String(err && err.message) }));
  }
};
const AsyncFunction = Object.getPrototypeOf(async function () {}).constructor;
(async () => new AsyncFunction('args', 'console', body)(args, scriptConsole))().then(
  (result) => report({ ok: true, result: result === undefined ? null : result }),
  (err) => {
    const message = err && err.message !== undefined ? err.message : err;
    report({ ok: false, error: String(message) });
    process.exitCode = 1;
  }
);
"#;

/// Outcome of one script run. The sandbox never returns an `Err`; every
/// failure mode ends up in `Failure`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SandboxOutcome {
    Success(Value),
    Failure(String),
}

impl SandboxOutcome {
    pub(crate) fn into_result(self) -> Result<Value, String> {
        match self {
            Self::Success(result) => Ok(result),
            Self::Failure(error) => Err(error),
        }
    }
}

/// How the script file is handed to the interpreter and how its result comes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScriptRuntime {
    /// `node runner.js script`: the body is an async function body; its return
    /// value or thrown message is reported through the result file.
    Node,
    /// `<interpreter> script`: stdout is the result.
    Raw,
}

impl ScriptRuntime {
    fn for_interpreter(interpreter: &str) -> Self {
        let program = interpreter.split_whitespace().next().unwrap_or("");
        let name = Path::new(program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name == "node" || name == "nodejs" {
            Self::Node
        } else {
            Self::Raw
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunnerReport {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Runs caller-supplied scripts in a child process.
///
/// The child gets a private scratch directory as working directory and `HOME`,
/// an environment reduced to `PATH`, `HOME`, `TASKBRIDGE_SCRIPT_ARGS` (the
/// JSON-encoded argument list) and `TASKBRIDGE_RESULT_PATH`. A hard wall-clock
/// limit covers everything it spawns. Stderr lines are forwarded to the transition log.
#[derive(Debug, Clone)]
pub(crate) struct ScriptSandbox {
    interpreter: String,
    runtime: ScriptRuntime,
    timeout: Duration,
}

impl ScriptSandbox {
    pub(crate) fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        let interpreter = interpreter.into();
        Self {
            runtime: ScriptRuntime::for_interpreter(&interpreter),
            interpreter,
            timeout,
        }
    }

    pub(crate) fn execute(
        &self,
        script: &str,
        args: &[Value],
        id_token: &str,
        logger: &Logger,
    ) -> SandboxOutcome {
        match self.run(script, args, id_token, logger) {
            Ok(outcome) => outcome,
            Err(message) => SandboxOutcome::Failure(message),
        }
    }

    fn run(
        &self,
        script: &str,
        args: &[Value],
        id_token: &str,
        logger: &Logger,
    ) -> Result<SandboxOutcome, String> {
        let scratch =
            TempDir::new().map_err(|err| format!("failed to create script directory: {err}"))?;
        let script_path = scratch.path().join(SCRIPT_FILE);
        fs::write(&script_path, script)
            .map_err(|err| format!("failed to write script file: {err}"))?;
        let encoded_args = serde_json::to_string(args)
            .map_err(|err| format!("failed to encode script args: {err}"))?;
        let result_path = scratch.path().join(RESULT_FILE);

        let mut files = Vec::new();
        if self.runtime == ScriptRuntime::Node {
            let runner_path = scratch.path().join(RUNNER_FILE);
            fs::write(&runner_path, NODE_RUNNER)
                .map_err(|err| format!("failed to write script runner: {err}"))?;
            files.push(runner_path.display().to_string());
        }
        files.push(script_path.display().to_string());

        // "$@" expands to the file arguments that follow the placeholder $0.
        let mut bash_args = vec![
            "-c".to_string(),
            format!("exec {} \"$@\"", self.interpreter),
            "taskbridge-script".to_string(),
        ];
        bash_args.extend(files);
        let spec = ProcessSpec {
            program: "bash".to_string(),
            args: bash_args,
            cwd: Some(scratch.path().to_path_buf()),
            env: Vec::new(),
            clear_env: true,
            timeout: Some(self.timeout),
        }
        .with_env("HOME", scratch.path().display().to_string())
        .with_env("TASKBRIDGE_SCRIPT_ARGS", encoded_args)
        .with_env("TASKBRIDGE_RESULT_PATH", result_path.display().to_string());

        let output = run_process(&spec, "script", id_token, logger)?;
        for line in output.stderr.lines().filter(|line| !line.trim().is_empty()) {
            logger.log_event("script_log", &[("id", id_token), ("line", line)]);
        }

        if output.timed_out {
            return Ok(SandboxOutcome::Failure(format!(
                "script timed out after {}ms",
                self.timeout.as_millis()
            )));
        }
        if self.runtime == ScriptRuntime::Node {
            if let Some(report) = read_report(&result_path)? {
                return Ok(if report.ok {
                    SandboxOutcome::Success(report.result)
                } else {
                    SandboxOutcome::Failure(
                        report
                            .error
                            .unwrap_or_else(|| "script failed".to_string()),
                    )
                });
            }
        }
        if output.exit_code != 0 {
            return Ok(SandboxOutcome::Failure(match output.last_stderr_line() {
                Some(line) => line.to_string(),
                None => format!("script exited with code {}", output.exit_code),
            }));
        }
        Ok(SandboxOutcome::Success(decode_stdout(&output.stdout)))
    }
}

fn read_report(path: &Path) -> Result<Option<RunnerReport>, String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("failed to read script result: {err}")),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|err| format!("failed to parse script result: {err}"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::shell::command_exists;
    use serde_json::json;
    use std::time::Instant;

    fn sh_sandbox(timeout_ms: u64) -> ScriptSandbox {
        ScriptSandbox::new("sh", Duration::from_millis(timeout_ms))
    }

    fn node_sandbox() -> Option<ScriptSandbox> {
        if !command_exists("node") {
            eprintln!("skipping: node is not on PATH");
            return None;
        }
        Some(ScriptSandbox::new("node", Duration::from_secs(10)))
    }

    #[test]
    fn returned_value_is_the_result() {
        let outcome = sh_sandbox(5_000).execute(
            "printf '{\"answer\": 42}'",
            &[],
            "t1",
            &Logger::disabled(),
        );
        assert_eq!(outcome, SandboxOutcome::Success(json!({"answer": 42})));
    }

    #[test]
    fn args_are_the_only_input_binding() {
        let outcome = sh_sandbox(5_000).execute(
            "printf '%s' \"$TASKBRIDGE_SCRIPT_ARGS\"",
            &[json!(1), json!("two")],
            "t2",
            &Logger::disabled(),
        );
        assert_eq!(outcome.into_result(), Ok(json!([1, "two"])));
    }

    #[test]
    fn script_runs_in_its_own_scratch_directory() {
        let outcome = sh_sandbox(5_000).execute(
            "[ \"$PWD\" = \"$HOME\" ] && ls",
            &[],
            "t3",
            &Logger::disabled(),
        );
        assert_eq!(outcome.into_result(), Ok(json!("script")));
    }

    #[test]
    fn thrown_error_becomes_failure_with_message() {
        let outcome = sh_sandbox(5_000).execute(
            "echo 'warming up' >&2; echo 'boom' >&2; exit 3",
            &[],
            "t4",
            &Logger::disabled(),
        );
        assert_eq!(outcome, SandboxOutcome::Failure("boom".to_string()));
    }

    #[test]
    fn silent_failure_reports_exit_code() {
        let outcome = sh_sandbox(5_000).execute("exit 7", &[], "t5", &Logger::disabled());
        assert_eq!(outcome.into_result(), Err("script exited with code 7".to_string()));
    }

    #[test]
    fn syntax_error_is_contained() {
        let outcome = sh_sandbox(5_000).execute("if then fi (", &[], "t6", &Logger::disabled());
        assert!(matches!(outcome, SandboxOutcome::Failure(_)));
    }

    #[test]
    fn long_running_script_is_killed_at_the_deadline() {
        let started = Instant::now();
        let outcome = sh_sandbox(200).execute("sleep 5", &[], "t7", &Logger::disabled());
        assert_eq!(
            outcome.into_result(),
            Err("script timed out after 200ms".to_string())
        );
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn background_work_does_not_escape_the_deadline() {
        let started = Instant::now();
        let outcome =
            sh_sandbox(200).execute("sleep 4 & echo done", &[], "t9", &Logger::disabled());
        assert_eq!(
            outcome.into_result(),
            Err("script timed out after 200ms".to_string())
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn subprocesses_die_with_a_timed_out_script() {
        let marker_dir = TempDir::new().expect("temp dir");
        let marker = marker_dir.path().join("marker");
        let script = format!("(sleep 1; touch {}) & sleep 10", marker.display());
        let outcome = sh_sandbox(200).execute(&script, &[], "t10", &Logger::disabled());
        assert!(matches!(outcome, SandboxOutcome::Failure(_)));
        std::thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists(), "subprocess outlived the sandbox timeout");
    }

    #[test]
    fn missing_interpreter_is_a_failure_not_a_panic() {
        let sandbox = ScriptSandbox::new("taskbridge-no-such-interpreter", Duration::from_secs(5));
        let outcome = sandbox.execute("1", &[], "t8", &Logger::disabled());
        assert!(matches!(outcome, SandboxOutcome::Failure(_)));
    }

    #[test]
    fn node_interpreters_get_the_runner() {
        assert_eq!(ScriptRuntime::for_interpreter("node"), ScriptRuntime::Node);
        assert_eq!(
            ScriptRuntime::for_interpreter("/usr/bin/node --no-warnings"),
            ScriptRuntime::Node
        );
        assert_eq!(ScriptRuntime::for_interpreter("sh"), ScriptRuntime::Raw);
    }

    #[test]
    fn node_script_return_value_is_the_result() {
        let Some(sandbox) = node_sandbox() else {
            return;
        };
        let outcome = sandbox.execute("return 42;", &[], "n1", &Logger::disabled());
        assert_eq!(outcome, SandboxOutcome::Success(json!(42)));

        let outcome =
            sandbox.execute("console.log('no return');", &[], "n2", &Logger::disabled());
        assert_eq!(outcome, SandboxOutcome::Success(Value::Null));
    }

    #[test]
    fn node_script_can_await_and_read_args() {
        let Some(sandbox) = node_sandbox() else {
            return;
        };
        let outcome = sandbox.execute(
            "const v = await Promise.resolve(args[0]); return { v, rest: args.slice(1) };",
            &[json!("first"), json!(2)],
            "n3",
            &Logger::disabled(),
        );
        assert_eq!(outcome, SandboxOutcome::Success(json!({"v": "first", "rest": [2]})));
    }

    #[test]
    fn node_thrown_error_message_is_reported() {
        let Some(sandbox) = node_sandbox() else {
            return;
        };
        let outcome = sandbox.execute(
            "console.log('about to fail'); throw new Error('kaboom');",
            &[],
            "n4",
            &Logger::disabled(),
        );
        assert_eq!(outcome, SandboxOutcome::Failure("kaboom".to_string()));

        let outcome = sandbox.execute(
            "await Promise.reject(new Error('late'));",
            &[],
            "n5",
            &Logger::disabled(),
        );
        assert_eq!(outcome, SandboxOutcome::Failure("late".to_string()));

        let outcome = sandbox.execute("return (;", &[], "n6", &Logger::disabled());
        assert!(matches!(outcome, SandboxOutcome::Failure(_)));
    }
}
