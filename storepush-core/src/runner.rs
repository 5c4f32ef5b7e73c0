//! External command capability.
//!
//! Every process the pipeline starts (store queries, container inspection,
//! the push utility) goes through [`CommandRunner`]. [`HostRunner`] spawns
//! real processes; [`ScriptedRunner`] answers from a script and records what
//! it was asked to run.

use std::collections::VecDeque;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use crate::error::RunnerError;

/// A command line plus its environment and stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    /// Variables removed from the inherited environment.
    pub env_remove: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program and arguments, for logs. Never includes the environment.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }

    /// `true` if `needle` appears as a contiguous run in the arguments.
    pub fn has_args(&self, needle: &[&str]) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.args
            .windows(needle.len())
            .any(|window| window.iter().zip(needle).all(|(a, b)| a == b))
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit 0 with `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Exit `code` with `stderr`.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

pub trait CommandRunner {
    /// Run to completion and capture stdout/stderr. A non-zero exit is
    /// reported through [`CommandOutput::code`], not as an error.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, RunnerError>;
}

// ---------------------------------------------------------------------------
// Host runner
// ---------------------------------------------------------------------------

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, RunnerError> {
        tracing::debug!(command = %invocation.command_line(), "running");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for key in &invocation.env_remove {
            command.env_remove(key);
        }
        for (key, value) in &invocation.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        // Stdin is written concurrently with reading stdout/stderr.
        let writer = match (child.stdin.take(), invocation.stdin.clone()) {
            (Some(mut stdin), Some(input)) => Some(std::thread::spawn(move || {
                stdin.write_all(input.as_bytes())
            })),
            _ => None,
        };

        let output = child.wait_with_output().map_err(|source| RunnerError::Io {
            program: invocation.program.clone(),
            source,
        })?;

        if let Some(handle) = writer {
            match handle.join() {
                Ok(Ok(())) => {}
                // Child exited without reading all input; the status decides.
                Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(source)) => {
                    return Err(RunnerError::Io {
                        program: invocation.program.clone(),
                        source,
                    })
                }
                Err(_) => {
                    return Err(RunnerError::Io {
                        program: invocation.program.clone(),
                        source: std::io::Error::other("stdin writer thread panicked"),
                    })
                }
            }
        }

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted runner
// ---------------------------------------------------------------------------

struct Rule {
    program: Option<String>,
    needle: Vec<String>,
    responses: VecDeque<CommandOutput>,
}

impl Rule {
    fn matches(&self, invocation: &Invocation) -> bool {
        if let Some(program) = &self.program {
            if program != &invocation.program {
                return false;
            }
        }
        let needle: Vec<&str> = self.needle.iter().map(String::as_str).collect();
        invocation.has_args(&needle)
    }
}

/// Answers invocations from a script instead of spawning processes.
///
/// A rule matches when its argument sequence appears contiguously in the
/// invocation's arguments (and, for [`ScriptedRunner::on_program`], the
/// program matches). The first matching rule answers. Queued responses are
/// consumed in order; the last one repeats.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` for any program invoked with `args`.
    pub fn on(self, args: &[&str], output: CommandOutput) -> Self {
        self.push_rule(None, args, output);
        self
    }

    /// Queue `output` for `program` invoked with `args`.
    pub fn on_program(self, program: &str, args: &[&str], output: CommandOutput) -> Self {
        self.push_rule(Some(program), args, output);
        self
    }

    fn push_rule(&self, program: Option<&str>, args: &[&str], output: CommandOutput) {
        let mut rules = lock(&self.rules);
        let needle: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let program = program.map(str::to_string);
        if let Some(rule) = rules
            .iter_mut()
            .find(|r| r.program == program && r.needle == needle)
        {
            rule.responses.push_back(output);
            return;
        }
        rules.push(Rule {
            program,
            needle,
            responses: VecDeque::from([output]),
        });
    }

    /// Every invocation seen so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    /// Invocations whose arguments contain `args`.
    pub fn calls_with(&self, args: &[&str]) -> Vec<Invocation> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.has_args(args))
            .cloned()
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, RunnerError> {
        lock(&self.calls).push(invocation.clone());
        let mut rules = lock(&self.rules);
        let Some(rule) = rules.iter_mut().find(|rule| rule.matches(invocation)) else {
            return Err(RunnerError::Unscripted {
                command: invocation.command_line(),
            });
        };
        let output = if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        };
        output.ok_or_else(|| RunnerError::Unscripted {
            command: invocation.command_line(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
