//! Parsers for the plain-text documents the server hands out per job.
//!
//! All of them are `key: value` lines. Unknown keys are ignored.

use crate::error::{ResourceError, Result};

/// A job granted to this resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub job_id: String,
    pub iosession_id: String,
    pub session_id: String,
    pub local_name: String,
    pub executables: Vec<String>,
}

impl JobDescriptor {
    /// Parse the generated input-files document of job `local_name`.
    pub fn parse(local_name: &str, text: &str) -> Result<Self> {
        let mut session_id = None;
        let mut iosession_id = None;
        let mut job_id = None;
        let mut executables = Vec::new();

        for (key, value) in fields(text) {
            match key {
                "mig_session_id" => session_id = Some(value.to_string()),
                "mig_iosession_id" => iosession_id = Some(value.to_string()),
                "job_id" => job_id = Some(value.to_string()),
                "executables" => executables.push(value.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            job_id: job_id.ok_or_else(|| missing("job description", "job_id"))?,
            iosession_id: iosession_id
                .ok_or_else(|| missing("job description", "mig_iosession_id"))?,
            session_id: session_id.ok_or_else(|| missing("job description", "mig_session_id"))?,
            local_name: local_name.to_string(),
            executables,
        })
    }
}

/// One `execute:` line of a job file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteDirective {
    pub command: String,
    pub args: Vec<String>,
}

impl ExecuteDirective {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Split a directive into command and arguments. `None` if blank.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let command = words.next()?;
        Some(Self {
            command,
            args: words.collect(),
        })
    }

    /// All directives of a job file, in order.
    pub fn parse_job_file(text: &str) -> Vec<Self> {
        fields(text)
            .filter(|(key, _)| *key == "execute")
            .filter_map(|(_, value)| Self::parse(value))
            .collect()
    }
}

impl std::fmt::Display for ExecuteDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Where the results of a job are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTargets {
    pub status: String,
    pub stderr: String,
    pub stdout: String,
}

impl OutputTargets {
    pub fn parse(text: &str) -> Result<Self> {
        let mut status = None;
        let mut stderr = None;
        let mut stdout = None;
        for (key, value) in fields(text) {
            match key {
                "status" => status = Some(value.to_string()),
                "stderr" => stderr = Some(value.to_string()),
                "stdout" => stdout = Some(value.to_string()),
                _ => {}
            }
        }
        Ok(Self {
            status: status.ok_or_else(|| missing("send-outputs descriptor", "status"))?,
            stderr: stderr.ok_or_else(|| missing("send-outputs descriptor", "stderr"))?,
            stdout: stdout.ok_or_else(|| missing("send-outputs descriptor", "stdout"))?,
        })
    }
}

fn fields(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.lines().filter_map(|line| {
        let line = line.trim_end_matches('\r');
        let (key, value) = line.split_once(": ")?;
        Some((key, value.trim()))
    })
}

fn missing(context: &str, key: &str) -> ResourceError {
    ResourceError::Malformed {
        context: context.to_string(),
        detail: format!("missing '{key}'"),
    }
}
