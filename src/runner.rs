//! External command execution
//!
//! Providers describe commands as [`Invocation`]s and run them through a
//! [`CommandRunner`], so tests can substitute a recording fake.

use anyhow::{Context, Result};
use declarative::Sensitive;
use std::fmt;
use std::process::{Command, Stdio};

/// A command line plus secret environment
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    env: Vec<(String, Sensitive)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
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

    /// Pass a credential through the environment, never on the command line
    pub fn secret_env(mut self, key: impl Into<String>, value: &Sensitive) -> Self {
        self.env.push((key.into(), value.clone()));
        self
    }

    pub fn env_keys(&self) -> impl Iterator<Item = &str> {
        self.env.iter().map(|(k, _)| k.as_str())
    }
}

/// Rendered without environment, safe to log
impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into an error carrying stderr
    pub fn check(self, invocation: &Invocation) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        match self.code {
            Some(code) => anyhow::bail!("`{invocation}` exited with {code}: {detail}"),
            None => anyhow::bail!("`{invocation}` was terminated by a signal"),
        }
    }
}

/// Runs invocations to completion
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run and fail on non-zero exit
    fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.run(invocation)?.check(invocation)
    }
}

/// Runs commands on the local host
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        log::debug!("Running: {invocation}");
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).stdin(Stdio::null());
        for (key, value) in &invocation.env {
            command.env(key, value.expose());
        }

        let output = command
            .output()
            .with_context(|| format!("Failed to execute: {invocation}"))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Answers invocations by longest matching command-line prefix and
    /// records every command line it saw
    #[derive(Default)]
    pub struct FakeRunner {
        responses: Vec<(String, CommandOutput)>,
        calls: Mutex<Vec<String>>,
        env: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(mut self, prefix: &str, code: i32, stdout: &str) -> Self {
            self.responses.push((
                prefix.to_string(),
                CommandOutput {
                    code: Some(code),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            ));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            match self.calls.lock() {
                Ok(calls) => calls.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }

        /// Environment keys passed with any call
        pub fn env_keys(&self) -> Vec<String> {
            match self.env.lock() {
                Ok(env) => env.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }

        /// Calls whose command line starts with `prefix`
        pub fn ran(&self, prefix: &str) -> bool {
            self.calls().iter().any(|c| c.starts_with(prefix))
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
            let line = invocation.to_string();
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(line.clone());
            }
            if let Ok(mut env) = self.env.lock() {
                env.extend(invocation.env_keys().map(str::to_string));
            }
            Ok(self
                .responses
                .iter()
                .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, output)| output.clone())
                .unwrap_or(CommandOutput {
                    code: Some(0),
                    ..CommandOutput::default()
                }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_omits_secret_env() {
        let invocation = Invocation::new("rsync")
            .args(["-a", "src/", "dest/"])
            .secret_env("RSYNC_PASSWORD", &Sensitive::new("hunter2"));
        let rendered = invocation.to_string();
        assert_eq!(rendered, "rsync -a src/ dest/");
        assert!(!format!("{invocation:?}").contains("hunter2"));
    }

    #[test]
    fn test_check_reports_stderr() {
        let output = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "unit httpd.service not found\n".into(),
        };
        let err = output
            .check(&Invocation::new("systemctl").arg("start").arg("httpd"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "`systemctl start httpd` exited with 1: unit httpd.service not found"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let output = SystemRunner
            .run(&Invocation::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }
}
