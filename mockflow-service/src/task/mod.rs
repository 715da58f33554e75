// Task Model
// Structured description of one schedulable unit of work

pub mod handle;
pub mod resources;

pub use handle::{Handle, JobId};
pub use resources::{EnvSetup, ResourceSpec, WallTime};

use crate::error::ConfigError;

use std::path::{Path, PathBuf};

/// One element of a command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// `--key value`
    Option { key: String, value: String },
    /// `--key v1 v2 v3`
    Values { key: String, values: Vec<String> },
    /// `--key`
    Flag(String),
    /// bare word
    Positional(String),
}

impl Argument {
    pub fn render(&self) -> String {
        match self {
            Argument::Option { key, value } => format!("{} {}", key, shell_quote(value)),
            Argument::Values { key, values } => {
                let mut rendered = key.clone();
                for value in values {
                    rendered.push(' ');
                    rendered.push_str(&shell_quote(value));
                }
                rendered
            }
            Argument::Flag(key) => key.clone(),
            Argument::Positional(value) => shell_quote(value),
        }
    }
}

/// Quote a word for bash when it contains anything beyond a safe set
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// A command with its resources, environment, dependencies and outputs.
///
/// Tasks are immutable once built; stage builders construct them and the
/// gate decides whether they reach a backend.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    /// Label of the stage that produced this task
    pub stage: String,
    pub command: String,
    pub arguments: Vec<Argument>,
    pub resources: ResourceSpec,
    pub environment: Vec<EnvSetup>,
    pub upstream: Handle,
    /// Artifacts whose joint existence means the task is already done
    pub outputs: Vec<PathBuf>,
    pub script_path: PathBuf,
    /// `%j` is replaced with the job id by the scheduler
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

impl Task {
    pub fn builder(name: impl Into<String>, command: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name, command)
    }

    /// Command and arguments as a single shell line
    pub fn invocation(&self) -> String {
        let mut line = self.command.clone();
        for argument in &self.arguments {
            line.push(' ');
            line.push_str(&argument.render());
        }
        line
    }

    /// True only when outputs are declared and every one of them exists
    pub fn outputs_exist(&self) -> bool {
        !self.outputs.is_empty() && self.outputs.iter().all(|path| path.exists())
    }
}

/// Builder for [`Task`]
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    name: String,
    stage: String,
    command: String,
    arguments: Vec<Argument>,
    resources: ResourceSpec,
    environment: Vec<EnvSetup>,
    upstream: Handle,
    outputs: Vec<PathBuf>,
    script_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: String::new(),
            command: command.into(),
            arguments: Vec::new(),
            resources: ResourceSpec::default(),
            environment: Vec::new(),
            upstream: Handle::None,
            outputs: Vec::new(),
            script_path: None,
            log_dir: None,
        }
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.arguments.push(Argument::Option {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn path_option(self, key: impl Into<String>, path: &Path) -> Self {
        let value = path.display().to_string();
        self.option(key, value)
    }

    pub fn values<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.arguments.push(Argument::Values {
            key: key.into(),
            values: values.into_iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn flag(mut self, key: impl Into<String>) -> Self {
        self.arguments.push(Argument::Flag(key.into()));
        self
    }

    pub fn flag_if(self, condition: bool, key: impl Into<String>) -> Self {
        if condition {
            self.flag(key)
        } else {
            self
        }
    }

    pub fn positional(mut self, value: impl Into<String>) -> Self {
        self.arguments.push(Argument::Positional(value.into()));
        self
    }

    /// Append pre-split words verbatim as positionals
    pub fn extra_args(mut self, words: &[String]) -> Self {
        self.arguments
            .extend(words.iter().cloned().map(Argument::Positional));
        self
    }

    pub fn resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = resources;
        self
    }

    pub fn environment(mut self, setup: impl IntoIterator<Item = EnvSetup>) -> Self {
        self.environment.extend(setup);
        self
    }

    pub fn upstream(mut self, upstream: Handle) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn script_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_path = Some(path.into());
        self
    }

    /// Directory for `<name>-%j.out` and `<name>-%j.err`
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<Task, ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "task '{}' has no command",
                self.name
            )));
        }
        let script_path = self.script_path.ok_or_else(|| {
            ConfigError::Invalid(format!("task '{}' has no script path", self.name))
        })?;

        let log_dir = match self.log_dir {
            Some(dir) => dir,
            None => script_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };

        Ok(Task {
            stdout_log: log_dir.join(format!("{}-%j.out", self.name)),
            stderr_log: log_dir.join(format!("{}-%j.err", self.name)),
            name: self.name,
            stage: self.stage,
            command: self.command,
            arguments: self.arguments,
            resources: self.resources,
            environment: self.environment,
            upstream: self.upstream,
            outputs: self.outputs,
            script_path,
        })
    }
}
