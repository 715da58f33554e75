// Task Resources
// Wall-time, node and launcher requests plus shell environment setup

use crate::error::ConfigError;

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Wall-time limit, stored in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "WallTimeValue", into = "String")]
pub struct WallTime {
    seconds: u64,
}

/// Accepted YAML forms: fractional hours or "hh:mm:ss"
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WallTimeValue {
    Hours(f64),
    Text(String),
}

impl WallTime {
    pub fn from_seconds(seconds: u64) -> Self {
        Self { seconds }
    }

    /// Convert fractional hours, rounding any partial second up
    pub fn from_hours(hours: f64) -> Result<Self, ConfigError> {
        if !hours.is_finite() || hours <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "wall-time must be a positive number of hours, got {}",
                hours
            )));
        }
        // Absorb float noise such as 0.1 * 3600 = 360.00000000000006
        let seconds = (hours * 3600.0 - 1e-6).ceil().max(1.0) as u64;
        Ok(Self { seconds })
    }

    pub fn as_seconds(&self) -> u64 {
        self.seconds
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.seconds / 3600;
        let minutes = (self.seconds % 3600) / 60;
        let seconds = self.seconds % 60;
        write!(f, "{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

impl FromStr for WallTime {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Invalid(format!("invalid wall-time '{}'", s));

        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() == 1 {
            let hours: f64 = parts[0].parse().map_err(|_| invalid())?;
            return Self::from_hours(hours);
        }
        if parts.len() != 3 {
            return Err(invalid());
        }

        let mut fields = [0u64; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| invalid())?;
        }
        let [hours, minutes, seconds] = fields;
        if minutes >= 60 || seconds >= 60 {
            return Err(invalid());
        }
        Ok(Self::from_seconds(hours * 3600 + minutes * 60 + seconds))
    }
}

impl TryFrom<WallTimeValue> for WallTime {
    type Error = ConfigError;

    fn try_from(value: WallTimeValue) -> Result<Self, Self::Error> {
        match value {
            WallTimeValue::Hours(hours) => Self::from_hours(hours),
            WallTimeValue::Text(text) => text.parse(),
        }
    }
}

impl From<WallTime> for String {
    fn from(value: WallTime) -> Self {
        value.to_string()
    }
}

/// Resource request rendered into scheduler directives and the launcher line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub nodes: u32,
    pub tasks_per_node: Option<u32>,
    pub cpus_per_task: Option<u32>,
    /// Exported as OMP_NUM_THREADS
    pub omp_threads: Option<u32>,
    pub wall_time: WallTime,
    /// Quality of service / partition
    pub queue: String,
    pub account: Option<String>,
    pub constraint: Option<String>,
    /// Extra options placed between `srun` and the command
    pub launcher_options: Vec<String>,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            nodes: 1,
            tasks_per_node: None,
            cpus_per_task: None,
            omp_threads: None,
            wall_time: WallTime::from_seconds(30 * 60),
            queue: "regular".to_string(),
            account: None,
            constraint: None,
            launcher_options: Vec::new(),
        }
    }
}

impl ResourceSpec {
    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_wall_time(mut self, wall_time: WallTime) -> Self {
        self.wall_time = wall_time;
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.omp_threads = Some(threads);
        self
    }

    pub fn with_tasks_per_node(mut self, tasks: u32) -> Self {
        self.tasks_per_node = Some(tasks);
        self
    }

    pub fn with_cpus_per_task(mut self, cpus: u32) -> Self {
        self.cpus_per_task = Some(cpus);
        self
    }

    pub fn with_launcher_option(mut self, option: impl Into<String>) -> Self {
        self.launcher_options.push(option.into());
        self
    }
}

/// One shell-level setup line executed before the command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvSetup {
    ModuleLoad(String),
    Source(String),
    Export { name: String, value: String },
    Umask(String),
    Raw(String),
}

impl EnvSetup {
    pub fn render(&self) -> String {
        match self {
            EnvSetup::ModuleLoad(module) => format!("module load {}", module),
            EnvSetup::Source(path) => format!("source {}", path),
            EnvSetup::Export { name, value } => format!("export {}={}", name, value),
            EnvSetup::Umask(mask) => format!("umask {}", mask),
            EnvSetup::Raw(line) => line.clone(),
        }
    }
}
