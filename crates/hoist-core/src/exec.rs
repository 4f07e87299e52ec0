//! Process execution for source-control and build tools.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Environment variables that would redirect git away from the working directory.
const GIT_ENV_OVERRIDES: [&str; 4] = [
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_COMMON_DIR",
];

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A command exited unsuccessfully (or could not be started).
///
/// Displays as the combined command output so that retry classification and
/// callers see the tool's own message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{output}")]
pub struct CommandError {
    /// Program that was run
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Exit code, if the process ran to completion
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr text
    pub output: String,
}

impl CommandError {
    /// Create an error carrying only an output message.
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            exit_code: None,
            output: output.into(),
        }
    }

    /// Attach an exit code.
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    /// Attach the command line that produced the failure.
    pub fn with_command(mut self, program: impl Into<String>, args: &[&str]) -> Self {
        self.program = program.into();
        self.args = args.iter().map(|arg| arg.to_string()).collect();
        self
    }

    /// The combined output text.
    pub fn message(&self) -> &str {
        &self.output
    }
}

/// Something that can run a tool with arguments.
pub trait Executable: Send + Sync {
    /// Run the tool; non-zero exit is reported as [`CommandError`].
    fn execute(&self, args: &[&str]) -> Result<CommandOutput, CommandError>;

    /// Directory the tool runs in.
    fn working_dir(&self) -> &Path;
}

/// Runs a program as a child process in a fixed working directory.
#[derive(Debug, Clone)]
pub struct ProcessExecutable {
    program: String,
    working_dir: PathBuf,
    envs: Vec<(String, String)>,
}

impl ProcessExecutable {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
            envs: Vec::new(),
        }
    }

    /// Set an environment variable for every invocation.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(&self.working_dir);
        if self.program == "git" {
            for key in GIT_ENV_OVERRIDES {
                cmd.env_remove(key);
            }
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }
}

impl Executable for ProcessExecutable {
    fn execute(&self, args: &[&str]) -> Result<CommandOutput, CommandError> {
        tracing::debug!(program = %self.program, ?args, "executing");

        let output = self.command(args).output().map_err(|err| {
            CommandError::new(format!("Failed to run {} {:?}: {}", self.program, args, err))
                .with_command(&self.program, args)
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let combined = match (stdout.trim(), stderr.trim()) {
                ("", err) => err.to_string(),
                (out, "") => out.to_string(),
                (out, err) => format!("{out}\n{err}"),
            };
            let mut error = CommandError::new(combined).with_command(&self.program, args);
            error.exit_code = output.status.code();
            return Err(error);
        }

        Ok(CommandOutput { stdout, stderr })
    }

    fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}
