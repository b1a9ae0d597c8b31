// External program invocation.
// Every child runs with LC_ALL=C plus its own overlay; the engine never
// touches the environment of its own process.

use std::fs::File;
use std::io::Write;
use std::process::{Child, Command, Stdio};

use crate::{DiskError, Result};

/// Lines of captured output attached to a tool failure.
pub const OUTPUT_TAIL_LINES: usize = 20;

#[derive(Debug)]
pub enum StdinSource {
    Null,
    Bytes(Vec<u8>),
    /// Left open for the caller to feed after `spawn`.
    Piped,
}

#[derive(Debug)]
pub enum StdoutSink {
    Piped,
    File(File),
}

#[derive(Debug)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: StdinSource,
    pub stdout: StdoutSink,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: StdinSource::Null,
            stdout: StdoutSink::Piped,
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
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, overlay: &[(String, String)]) -> Self {
        self.env.extend(overlay.iter().cloned());
        self
    }

    pub fn input(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = StdinSource::Bytes(bytes.into());
        self
    }

    pub fn piped_stdin(mut self) -> Self {
        self.stdin = StdinSource::Piped;
        self
    }

    pub fn stdout_to(mut self, file: File) -> Self {
        self.stdout = StdoutSink::File(file);
        self
    }

    /// Shell-like rendering used in logs and error reports.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("'{}'", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout followed by stderr, the way a terminal would interleave short outputs.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout.trim_end(), self.stderr)
        }
    }

    pub fn tail(&self, lines: usize) -> String {
        tail_lines(&self.combined(), lines)
    }

    /// Turns a nonzero exit into `ExternalToolFailure`.
    pub fn check(self, command_line: &str) -> Result<ToolOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(DiskError::tool_failure(command_line, self.code, self.tail(OUTPUT_TAIL_LINES)))
        }
    }
}

pub fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

pub trait ToolRunner: Send + Sync {
    /// Run to completion, capturing stdout and stderr.
    fn run(&self, command: ToolCommand) -> Result<ToolOutput>;

    /// Start a long-running child with piped stderr (and stdout unless redirected).
    fn spawn(&self, command: ToolCommand) -> Result<Child>;
}

/// `std::process` backed runner.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn build(command: &mut ToolCommand) -> Result<Command> {
        let program = which::which(&command.program)
            .map_err(|_| DiskError::ToolNotFound(command.program.clone()))?;

        let mut cmd = Command::new(program);
        cmd.args(&command.args);
        cmd.env("LC_ALL", "C");
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        cmd.stdin(match command.stdin {
            StdinSource::Null => Stdio::null(),
            StdinSource::Bytes(_) | StdinSource::Piped => Stdio::piped(),
        });

        let sink = std::mem::replace(&mut command.stdout, StdoutSink::Piped);
        cmd.stdout(match sink {
            StdoutSink::Piped => Stdio::piped(),
            StdoutSink::File(file) => Stdio::from(file),
        });
        cmd.stderr(Stdio::piped());

        Ok(cmd)
    }
}

impl ToolRunner for SystemRunner {
    fn run(&self, mut command: ToolCommand) -> Result<ToolOutput> {
        let line = command.command_line();
        log::debug!("Executing: {}", line);

        let mut child = Self::build(&mut command)?.spawn()?;

        if let StdinSource::Bytes(input) = &command.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input)?;
            }
        }

        let output = child.wait_with_output()?;
        let result = ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        log::debug!("`{}` exited with {:?}", line, result.code);
        Ok(result)
    }

    fn spawn(&self, mut command: ToolCommand) -> Result<Child> {
        log::debug!("Spawning: {}", command.command_line());
        let child = Self::build(&mut command)?.spawn()?;
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_quotes_whitespace() {
        let cmd = ToolCommand::new("sfdisk").args(["-l", "/dev/disk with space"]);
        assert_eq!(cmd.command_line(), "sfdisk -l '/dev/disk with space'");
    }

    #[test]
    fn test_check_attaches_tail() {
        let mut stderr = String::new();
        for i in 0..30 {
            stderr.push_str(&format!("line {}\n", i));
        }
        let output = ToolOutput { code: Some(2), stdout: String::new(), stderr };

        match output.check("tool --flag") {
            Err(DiskError::ExternalToolFailure { command, code, output }) => {
                assert_eq!(command, "tool --flag");
                assert_eq!(code, Some(2));
                assert_eq!(output.lines().count(), OUTPUT_TAIL_LINES);
                assert!(output.ends_with("line 29"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_system_runner_feeds_stdin_and_overlay() {
        let runner = SystemRunner;
        let output = runner
            .run(
                ToolCommand::new("sh")
                    .args(["-c", "cat; printf '%s' \"$DISKWRIGHT_PROBE\""])
                    .env("DISKWRIGHT_PROBE", "overlay")
                    .input("fed\n"),
            )
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "fed\noverlay");
        assert!(std::env::var("DISKWRIGHT_PROBE").is_err());
    }

    #[test]
    fn test_missing_program_is_tool_not_found() {
        let result = SystemRunner.run(ToolCommand::new("diskwright-no-such-tool"));
        assert!(matches!(result, Err(DiskError::ToolNotFound(name)) if name == "diskwright-no-such-tool"));
    }
}
