// Pipeline Stages
// Stage names, fan-out dimensions and the per-realization stage graph

pub mod builders;
pub mod graph;

pub use graph::{PendingFit, RealizationOutput, StageGraph, VariantOutput};

use crate::error::ConfigError;
use crate::task::Handle;

use serde::{Deserialize, Serialize};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Every step a campaign knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StageKind {
    Synthesis,
    Catalog,
    RedshiftErrors,
    Deltas,
    Correlations,
    Export,
    Covariance,
    Fit,
    StackExport,
    StackCovariance,
    PartitionedExport,
}

impl StageKind {
    /// Every stage, per-realization stages first in execution order
    pub const ALL: [StageKind; 11] = [
        StageKind::Synthesis,
        StageKind::Catalog,
        StageKind::RedshiftErrors,
        StageKind::Deltas,
        StageKind::Correlations,
        StageKind::Export,
        StageKind::Covariance,
        StageKind::Fit,
        StageKind::StackExport,
        StageKind::StackCovariance,
        StageKind::PartitionedExport,
    ];

    /// Per-realization stages in execution order, the leading part of `ALL`
    pub const PIPELINE: [StageKind; 8] = {
        let mut stages = [StageKind::Synthesis; 8];
        let mut i = 0;
        while i < 8 {
            stages[i] = Self::ALL[i];
            i += 1;
        }
        stages
    };

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Synthesis => "synthesis",
            StageKind::Catalog => "catalog",
            StageKind::RedshiftErrors => "redshift-errors",
            StageKind::Deltas => "deltas",
            StageKind::Correlations => "correlations",
            StageKind::Export => "export",
            StageKind::Covariance => "covariance",
            StageKind::Fit => "fit",
            StageKind::StackExport => "stack-export",
            StageKind::StackCovariance => "stack-covariance",
            StageKind::PartitionedExport => "partitioned-export",
        }
    }

    /// Built once per campaign rather than per realization
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            StageKind::StackExport | StageKind::StackCovariance | StageKind::PartitionedExport
        )
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownStage(s.to_string()))
    }
}

impl TryFrom<String> for StageKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StageKind> for String {
    fn from(kind: StageKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Rest-frame wavelength window used for delta extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Lya,
    Lyb,
}

impl Region {
    pub fn name(&self) -> &'static str {
        match self {
            Region::Lya => "lya",
            Region::Lyb => "lyb",
        }
    }

    /// Rest-frame window in Angstrom
    pub fn rest_frame(&self) -> (f64, f64) {
        match self {
            Region::Lya => (1040.0, 1200.0),
            Region::Lyb => (920.0, 1020.0),
        }
    }
}

/// Continuum treatment of one analysis pass over a realization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisVariant {
    /// Deltas converted straight from the input transmission
    Raw,
    /// Extraction against the known input continuum
    TrueContinuum,
    /// Extraction with a fitted continuum
    FittedContinuum,
}

impl AnalysisVariant {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisVariant::Raw => "raw",
            AnalysisVariant::TrueContinuum => "true_cont",
            AnalysisVariant::FittedContinuum => "fitted",
        }
    }

    /// Analysis directory for this variant. The fitted-continuum pass
    /// owns the plain analysis name.
    pub fn dir_name(&self, analysis: &str) -> String {
        match self {
            AnalysisVariant::FittedContinuum => analysis.to_string(),
            other => format!("{}_{}", other.name(), analysis),
        }
    }
}

impl fmt::Display for AnalysisVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Correlation pair types, auto (forest x forest) or cross (forest x quasar)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairType {
    LyaLya,
    LyaLyb,
    LyaQso,
    LybQso,
}

impl PairType {
    pub const ALL: [PairType; 4] = [
        PairType::LyaLya,
        PairType::LyaLyb,
        PairType::LyaQso,
        PairType::LybQso,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PairType::LyaLya => "lya_lya",
            PairType::LyaLyb => "lya_lyb",
            PairType::LyaQso => "lya_qso",
            PairType::LybQso => "lyb_qso",
        }
    }

    pub fn is_cross(&self) -> bool {
        matches!(self, PairType::LyaQso | PairType::LybQso)
    }

    /// Delta regions this pair reads
    pub fn regions(&self) -> &'static [Region] {
        match self {
            PairType::LyaLya | PairType::LyaQso => &[Region::Lya],
            PairType::LyaLyb => &[Region::Lya, Region::Lyb],
            PairType::LybQso => &[Region::Lyb],
        }
    }

    /// Block name used by covariance tools, e.g. `lya-qso`
    pub fn block(&self) -> String {
        self.name().replace('_', "-")
    }
}

impl fmt::Display for PairType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What is measured for a pair type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Measurement {
    Correlation,
    Distortion,
    MetalDistortion,
}

impl Measurement {
    /// Estimator name, which differs between auto and cross pairs
    pub fn prefix(&self, pair: PairType) -> &'static str {
        match (self, pair.is_cross()) {
            (Measurement::Correlation, false) => "cf",
            (Measurement::Correlation, true) => "xcf",
            (Measurement::Distortion, false) => "dmat",
            (Measurement::Distortion, true) => "xdmat",
            (Measurement::MetalDistortion, false) => "metal_dmat",
            (Measurement::MetalDistortion, true) => "metal_xdmat",
        }
    }

    /// Task name such as `xdmat_lya_qso`
    pub fn task_name(&self, pair: PairType) -> String {
        format!("{}_{}", self.prefix(pair), pair.name())
    }

    /// Default wall-time in hours per measurement
    pub fn default_hours(&self, pair: PairType) -> f64 {
        match (pair, self) {
            (PairType::LyaLya, Measurement::Correlation) => 1.5,
            (PairType::LyaLya, _) => 2.0,
            (PairType::LyaLyb, _) => 1.0,
            (PairType::LyaQso, _) => 0.5,
            (PairType::LybQso, _) => 0.25,
        }
    }
}

/// One branch of the correlation fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub pair: PairType,
    pub measurement: Measurement,
    pub artifact: PathBuf,
    pub handle: Handle,
}
