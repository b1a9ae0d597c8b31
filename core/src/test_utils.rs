/// Test utilities: a scripted tool runner that never touches real disks
use crate::tool::{StdinSource, SystemRunner, ToolCommand, ToolOutput, ToolRunner};
use crate::{DiskError, Result};
use std::collections::VecDeque;
use std::process::Child;
use std::sync::{Arc, Mutex};

/// One recorded call into the runner.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub spawned: bool,
}

impl Invocation {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    pub fn stdin_text(&self) -> String {
        self.stdin
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

type Responder = Box<dyn Fn(&Invocation) -> ToolOutput + Send + Sync>;

struct Rule {
    program: String,
    needles: Vec<String>,
    responder: Responder,
}

impl Rule {
    fn matches(&self, invocation: &Invocation) -> bool {
        invocation.program == self.program && self.needles.iter().all(|n| invocation.has_arg(n))
    }
}

struct Script {
    program: String,
    body: String,
}

/// Runner with canned answers keyed by program name and required arguments.
///
/// Rules are tried most-recent first, so a test can override an earlier rule.
/// Unmatched `run` calls succeed with empty output; unmatched `spawn` calls
/// fail with `ToolNotFound`.
#[derive(Default)]
pub struct MockRunner {
    rules: Mutex<Vec<Rule>>,
    scripts: Mutex<Vec<Script>>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

pub fn ok(stdout: &str) -> ToolOutput {
    ToolOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed(code: i32, stderr: &str) -> ToolOutput {
    ToolOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `output` to `program` invoked with all of `needles`.
    pub fn respond(&self, program: &str, needles: &[&str], output: ToolOutput) {
        self.respond_with(program, needles, move |_| output.clone());
    }

    /// Answer successive matching calls from `outputs`; the last one repeats.
    pub fn respond_seq(&self, program: &str, needles: &[&str], outputs: Vec<ToolOutput>) {
        let queue = Mutex::new(VecDeque::from(outputs));
        self.respond_with(program, needles, move |_| {
            let mut queue = queue.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap_or_default()
            }
        });
    }

    pub fn respond_with<F>(&self, program: &str, needles: &[&str], responder: F)
    where
        F: Fn(&Invocation) -> ToolOutput + Send + Sync + 'static,
    {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            needles: needles.iter().map(|n| n.to_string()).collect(),
            responder: Box::new(responder),
        });
    }

    /// Spawned `program` runs `sh -c body` with the original arguments as `$@`.
    pub fn script(&self, program: &str, body: &str) {
        self.scripts.lock().unwrap().push(Script {
            program: program.to_string(),
            body: body.to_string(),
        });
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.program == program)
            .collect()
    }

    pub fn clear_invocations(&self) {
        self.invocations.lock().unwrap().clear();
    }

    fn record(&self, command: &ToolCommand, spawned: bool) -> Invocation {
        let invocation = Invocation {
            program: command.program.clone(),
            args: command.args.clone(),
            env: command.env.clone(),
            stdin: match &command.stdin {
                StdinSource::Bytes(bytes) => Some(bytes.clone()),
                _ => None,
            },
            spawned,
        };
        self.invocations.lock().unwrap().push(invocation.clone());
        invocation
    }
}

impl ToolRunner for MockRunner {
    fn run(&self, command: ToolCommand) -> Result<ToolOutput> {
        let invocation = self.record(&command, false);
        let rules = self.rules.lock().unwrap();
        let output = rules
            .iter()
            .rev()
            .find(|rule| rule.matches(&invocation))
            .map(|rule| (rule.responder)(&invocation))
            .unwrap_or_else(|| ok(""));
        Ok(output)
    }

    fn spawn(&self, command: ToolCommand) -> Result<Child> {
        let invocation = self.record(&command, true);
        let body = self
            .scripts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.program == invocation.program)
            .map(|s| s.body.clone())
            .ok_or_else(|| DiskError::ToolNotFound(invocation.program.clone()))?;

        let shell = ToolCommand {
            program: "sh".to_string(),
            args: ["-c".to_string(), body, invocation.program.clone()]
                .into_iter()
                .chain(command.args)
                .collect(),
            env: command.env,
            stdin: command.stdin,
            stdout: command.stdout,
        };
        SystemRunner.spawn(shell)
    }
}
