//! Synchronous process invocation seam.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::CommandError;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Successful exit with the given standard output.
    pub fn with_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Non-zero exit with the given standard error.
    pub fn failure(exit_code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Standard error decoded lossily with surrounding whitespace removed.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Runs an external program to completion.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, feeding `stdin` (if any) and closing the pipe
    /// before waiting for exit.
    fn run(
        &self,
        program: &Path,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, CommandError>;
}

/// [`CommandRunner`] backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(
        &self,
        program: &Path,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, CommandError> {
        debug!(program = %program.display(), ?args, "launching command");
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| CommandError::Spawn {
                program: program.display().to_string(),
                detail: err.to_string(),
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            // The exit status below is authoritative; a child that exits before
            // draining its input surfaces as a broken pipe here.
            if let Err(err) = pipe.write_all(input) {
                warn!(program = %program.display(), error = %err, "failed to write command input");
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|err| CommandError::Io(err.to_string()))?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Invocation captured by [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl RecordedCommand {
    /// First argument, which selects the `fdesetup` verb.
    pub fn verb(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

/// In-memory runner for tests. Responses are queued per verb (first argument);
/// an unscripted verb exits 0 with no output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<RecordedCommand>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<CommandOutput, CommandError>>>>,
}

impl ScriptedRunner {
    /// Queue the response for the next invocation of `verb`.
    pub fn script(&self, verb: impl Into<String>, response: Result<CommandOutput, CommandError>) {
        self.scripted
            .lock()
            .expect("script mutex poisoned")
            .entry(verb.into())
            .or_default()
            .push_back(response);
    }

    /// Invocations recorded so far.
    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    /// Invocations of a single verb.
    pub fn calls_for(&self, verb: &str) -> Vec<RecordedCommand> {
        self.calls()
            .into_iter()
            .filter(|call| call.verb() == Some(verb))
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &Path,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, CommandError> {
        let recorded = RecordedCommand {
            program: program.to_path_buf(),
            args: args.iter().map(|arg| (*arg).to_string()).collect(),
            stdin: stdin.map(<[u8]>::to_vec),
        };
        let verb = recorded.verb().unwrap_or_default().to_string();
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(recorded);

        self.scripted
            .lock()
            .expect("script mutex poisoned")
            .get_mut(&verb)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(CommandOutput::with_stdout(Vec::new())))
    }
}
