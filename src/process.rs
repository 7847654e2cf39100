//! Execution of external CLI tools (pachctl, kubectl, helm).
//!
//! Every shell-out in the crate goes through the [`ProcessRunner`] trait so
//! commands can be scripted in tests without the real binaries installed.
use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::Context;
use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::Error;

/// An external command to run, with captured output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// Additional environment variables for the child process.
    pub env: BTreeMap<String, String>,

    /// Optional data written to the child's standard input.
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    /// Start describing an invocation of `program`.
    pub fn new<P: Into<String>>(program: P) -> CommandSpec {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdin: None,
        }
    }

    /// Append an argument to the command line.
    pub fn arg<A: Into<String>>(mut self, arg: A) -> CommandSpec {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for the child process.
    pub fn env<K, V>(mut self, key: K, value: V) -> CommandSpec
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Write the given bytes to the child's standard input.
    pub fn stdin(mut self, data: Vec<u8>) -> CommandSpec {
        self.stdin = Some(data);
        self
    }
}

/// Captured outcome of an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code of the process, -1 if killed by a signal.
    pub code: i32,

    /// Captured standard output, decoded as UTF-8.
    pub stdout: String,

    /// Captured standard error, decoded as UTF-8.
    pub stderr: String,
}

impl CommandOutput {
    /// True if the command exited with code zero.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Interface to run external commands and capture their output.
///
/// Calls block until the child exits; no timeout is imposed here, a hung CLI
/// hangs the pipeline just as it would hang an operator's shell.
#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the command to completion and capture both output channels.
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput>;
}

/// [`ProcessRunner`] backed by real child processes.
pub struct SystemRunner;

#[async_trait::async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if spec.stdin.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::dependency_missing(&spec.program)).with_context(|| {
                    format!("failed to execute '{}'", spec.program)
                });
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to execute '{}'", spec.program));
            }
        };
        if let Some(data) = &spec.stdin {
            let mut stdin = child.stdin.take().expect("child stdin must be piped");
            stdin
                .write_all(data)
                .await
                .with_context(|| format!("failed to write to '{}' stdin", spec.program))?;
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("failed to wait for '{}'", spec.program))?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
