//! The probe abstraction: one independent data source per implementation.

use std::fmt;
use std::io;

use crate::collector::environment::EnvironmentSnapshot;
use crate::collector::procfs::ParseError;
use crate::collector::traits::{CommandRunner, ExecError, FileSystem};
use crate::metrics::MetricSample;
use crate::status::ExporterStatus;

/// Error from a single probe. Local to the probe: other probes keep running.
#[derive(Debug)]
pub enum CollectError {
    /// I/O error reading a file or talking to a daemon.
    Io(io::Error),
    /// A tool ran but failed.
    Exec(ExecError),
    /// Tool or file output could not be understood.
    Parse(String),
    /// A daemon could not be reached.
    Connection(String),
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Exec(e) => write!(f, "{}", e),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
            CollectError::Connection(msg) => write!(f, "connection error: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Io(e) => Some(e),
            CollectError::Exec(e) => Some(e),
            CollectError::Parse(_) | CollectError::Connection(_) => None,
        }
    }
}

impl From<io::Error> for CollectError {
    fn from(e: io::Error) -> Self {
        CollectError::Io(e)
    }
}

impl From<ExecError> for CollectError {
    fn from(e: ExecError) -> Self {
        CollectError::Exec(e)
    }
}

impl From<ParseError> for CollectError {
    fn from(e: ParseError) -> Self {
        CollectError::Parse(e.message)
    }
}

/// A probe error attributed to the probe that raised it.
#[derive(Debug)]
pub struct ProbeFailure {
    pub probe: &'static str,
    pub error: CollectError,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.probe, self.error)
    }
}

impl std::error::Error for ProbeFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Read-only view of the host handed to every probe during a cycle.
#[derive(Clone, Copy)]
pub struct ProbeContext<'a> {
    pub fs: &'a dyn FileSystem,
    pub commands: &'a dyn CommandRunner,
    pub env: &'a EnvironmentSnapshot,
}

impl<'a> ProbeContext<'a> {
    /// Runs a discovered tool. `None` when the tool is not installed.
    pub fn run_tool(&self, tool: &str, args: &[&str]) -> Option<Result<String, ExecError>> {
        let path = self.env.tool_path(tool)?;
        Some(self.commands.run(path, args))
    }
}

/// One data source.
///
/// Probes run on their own worker thread each cycle; state they keep between
/// cycles (connections, discovered lists) belongs to them alone.
pub trait Probe: Send {
    /// Short name used to attribute errors.
    fn name(&self) -> &'static str;

    /// Called after the environment snapshot is refreshed, before any probe
    /// of the same cycle runs. `ctx.env` is the fresh snapshot.
    fn on_environment_refresh(&mut self, _ctx: &ProbeContext<'_>) {}

    /// Gathers this cycle's samples.
    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError>;

    /// Contributes discovered facts to the status page.
    fn describe(&self, _status: &mut ExporterStatus) {}

    /// Releases held resources. Must be idempotent.
    fn close(&mut self) {}
}
