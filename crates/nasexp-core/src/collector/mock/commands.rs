//! Scripted command runner for testing probes without vendor tools.
//!
//! Responses are keyed by the program's file name plus its arguments, so a
//! probe that resolved `getsysinfo` to `/sbin/getsysinfo` hits the same entry
//! as one that runs it by bare name. Clones share their response table and
//! invocation log, which lets a test keep a handle after moving the runner
//! into an engine.

use crate::collector::traits::{CommandRunner, ExecError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone)]
enum Response {
    Output(String),
    Failure { code: i32, stderr: String },
}

#[derive(Debug, Clone, Default)]
pub struct MockCommands {
    tools: Arc<Mutex<HashMap<String, PathBuf>>>,
    responses: Arc<Mutex<HashMap<String, Response>>>,
    invocations: Arc<Mutex<Vec<String>>>,
}

fn command_key(program: &str, args: &[&str]) -> String {
    let mut key = program.to_string();
    for arg in args {
        key.push(' ');
        key.push_str(arg);
    }
    key
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

impl MockCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `name` resolvable by `look_path` at `/sbin/<name>`.
    pub fn add_tool(&self, name: &str) {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), PathBuf::from("/sbin").join(name));
    }

    /// Scripts a successful invocation. Output is trimmed like a real run.
    pub fn set_output(&self, program: &str, args: &[&str], stdout: impl Into<String>) {
        let stdout: String = stdout.into();
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                command_key(program, args),
                Response::Output(stdout.trim().to_string()),
            );
    }

    /// Scripts a failing invocation.
    pub fn set_failure(&self, program: &str, args: &[&str], code: i32, stderr: &str) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                command_key(program, args),
                Response::Failure {
                    code,
                    stderr: stderr.to_string(),
                },
            );
    }

    /// All invocations so far, as `program arg1 arg2 ...`.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of invocations whose rendered command line starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    pub fn clear_invocations(&self) {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl CommandRunner for MockCommands {
    fn run(&self, program: &Path, args: &[&str]) -> Result<String, ExecError> {
        let name = program_name(program);
        let key = command_key(&name, args);
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.clone());

        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();

        match response {
            Some(Response::Output(out)) => Ok(out),
            Some(Response::Failure { code, stderr }) => Err(ExecError::Failed {
                program: name,
                code: Some(code),
                stderr,
            }),
            None => Err(ExecError::Failed {
                program: name,
                code: Some(127),
                stderr: format!("no scripted response for `{}`", key),
            }),
        }
    }

    fn look_path(&self, name: &str) -> Option<PathBuf> {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
