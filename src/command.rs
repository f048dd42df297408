use std::fmt::Display;
use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};

use crate::{Error, Result};

/// A single external command: program, arguments, extra environment and
/// optional stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Invocation {
            program: program.into(),
            args: vec![],
            env: vec![],
            stdin: None,
        }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.env.push((k.into(), v.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// The command ran, but said something was wrong.
    pub fn failed(&self) -> bool {
        !self.success
    }
}

/// Runs external commands and captures their output.
///
/// `Err` means the command could not be started at all; a command that ran
/// and exited non-zero is an `Ok` with `success == false`.
pub trait CommandRunner: Send + Sync {
    fn run(&self, inv: &Invocation) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, inv: &Invocation) -> Result<CommandOutput> {
        let spawn_error = |source| Error::Spawn {
            program: inv.program.clone(),
            source,
        };

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .envs(inv.env.iter().map(|(k, v)| (k, v)))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if inv.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        log::trace!("running: {}", inv);
        let mut child = cmd.spawn().map_err(spawn_error)?;

        let writer = match (child.stdin.take(), inv.stdin.clone()) {
            (Some(mut pipe), Some(input)) => Some(std::thread::spawn(move || {
                // A child that exits early closes the pipe; its exit status
                // tells the real story.
                let _ = pipe.write_all(input.as_bytes());
            })),
            _ => None,
        };

        let output = child.wait_with_output().map_err(spawn_error)?;
        if let Some(w) = writer {
            let _ = w.join();
        }

        Ok(CommandOutput {
            success: output.status.success(),
            status: describe_status(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub(crate) use scripted::ScriptedRunner;

#[cfg(test)]
mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned outputs in order and records what was asked of it.
    #[derive(Default)]
    pub struct ScriptedRunner {
        replies: Mutex<VecDeque<Result<CommandOutput>>>,
        pub calls: Mutex<Vec<Invocation>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ok(self, stdout: &str) -> Self {
            self.push(Ok(CommandOutput {
                success: true,
                status: "exit code 0".into(),
                stdout: stdout.into(),
                stderr: String::new(),
            }))
        }

        pub fn fail(self, stderr: &str) -> Self {
            self.push(Ok(CommandOutput {
                success: false,
                status: "exit code 1".into(),
                stdout: String::new(),
                stderr: stderr.into(),
            }))
        }

        pub fn missing(self, program: &str) -> Self {
            self.push(Err(Error::Spawn {
                program: program.into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }))
        }

        fn push(self, r: Result<CommandOutput>) -> Self {
            self.replies.lock().unwrap().push_back(r);
            self
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, inv: &Invocation) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(inv.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected command: {}", inv))
        }
    }
}
