//! Local program execution checks

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use super::StatusProvider;
use crate::error::CheckError;
use crate::health::checks::{body_from, Check, CheckResult};

pub struct ProgramProvider {
    timeout: Duration,
    shell: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Option<String>,
}

impl Invocation {
    /// `<command> <args>`, or just the command without args.
    pub fn command_line(&self) -> String {
        match &self.args {
            Some(args) => format!("{} {}", self.command, args),
            None => self.command.clone(),
        }
    }
}

impl ProgramProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, shell: true }
    }

    /// Shell mode runs `sh -c "<command> <args>"`, otherwise the command is
    /// executed directly with the args payload as a single argument.
    pub fn with_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut command = if self.shell {
            let mut command = Command::new("sh");
            command.arg("-c").arg(invocation.command_line());
            command
        } else {
            let mut command = Command::new(&invocation.command);
            if let Some(args) = &invocation.args {
                command.arg(args);
            }
            command
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Splits `program://<command>?args=<payload>`; surrounding quotes of the
/// payload are removed.
pub fn parse_invocation(url: &str) -> Invocation {
    let rest = url.trim_start_matches("program://");
    match rest.split_once("?args=") {
        Some((command, args)) => {
            let args = args.trim().trim_matches('"').trim_matches('\'');
            Invocation {
                command: command.to_string(),
                args: if args.is_empty() { None } else { Some(args.to_string()) },
            }
        }
        None => Invocation {
            command: rest.to_string(),
            args: None,
        },
    }
}

#[async_trait::async_trait]
impl StatusProvider for ProgramProvider {
    async fn status(&self, check: &Check) -> Result<CheckResult, CheckError> {
        let start = Instant::now();
        let invocation = parse_invocation(&check.url);
        debug!("running program {:?} for {}", invocation, check.name);

        let outcome = match self.command(&invocation).spawn() {
            Ok(child) => match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => {
                    let status = if output.status.success() {
                        "ok".to_string()
                    } else {
                        output.status.to_string()
                    };
                    Ok((output, status))
                }
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("program timed out after {:?}", self.timeout)),
            },
            Err(e) => Err(e.to_string()),
        };

        let (status_code, stdout, stderr, status) = match outcome {
            Ok((output, status)) => {
                let code = if output.status.success() { 200 } else { 500 };
                (
                    code,
                    String::from_utf8_lossy(&output.stdout).into_owned(),
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                    status,
                )
            }
            Err(message) => (500, String::new(), String::new(), message),
        };

        let body = json!({
            "command": invocation.command_line(),
            "stdout": stdout,
            "stderr": stderr,
            "status": status,
        });

        Ok(CheckResult::new(&check.name, status_code)
            .with_body(body_from(body))
            .with_response_time(start.elapsed()))
    }
}
