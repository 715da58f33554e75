// Aggregation Registry
// Per-realization artifact paths collected for the cross-realization stack

use crate::stage::{AnalysisVariant, PairType};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    /// Measured correlation as written by the correlation task
    Correlation,
    /// Correlation after export, distortion matrix attached
    Exported,
}

/// Artifacts from different analysis variants never stack together
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    pub variant: AnalysisVariant,
    pub pair: PairType,
    pub kind: ArtifactKind,
}

impl ArtifactKey {
    pub fn new(variant: AnalysisVariant, pair: PairType, kind: ArtifactKind) -> Self {
        Self {
            variant,
            pair,
            kind,
        }
    }
}

/// Append-only map from artifact key to paths, one per realization in
/// processing order
#[derive(Debug, Clone, Default)]
pub struct AggregationRegistry {
    entries: BTreeMap<ArtifactKey, Vec<PathBuf>>,
}

impl AggregationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: ArtifactKey, path: impl Into<PathBuf>) {
        self.entries.entry(key).or_default().push(path.into());
    }

    pub fn get(&self, key: &ArtifactKey) -> &[PathBuf] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ArtifactKey> {
        self.entries.keys()
    }

    /// Paths of one variant and kind grouped by pair type
    pub fn by_kind(
        &self,
        variant: AnalysisVariant,
        kind: ArtifactKind,
    ) -> BTreeMap<PairType, Vec<PathBuf>> {
        self.entries
            .iter()
            .filter(|(key, _)| key.variant == variant && key.kind == kind)
            .map(|(key, paths)| (key.pair, paths.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ArtifactKey, path: &Path) -> bool {
        self.get(key).iter().any(|p| p == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FITTED: AnalysisVariant = AnalysisVariant::FittedContinuum;

    #[test]
    fn test_paths_keep_registration_order() {
        let mut registry = AggregationRegistry::new();
        let key = ArtifactKey::new(FITTED, PairType::LyaLya, ArtifactKind::Correlation);
        registry.register(key, "/out/mock-1.1.1/cf.fits.gz");
        registry.register(key, "/out/mock-0.0.0/cf.fits.gz");

        assert_eq!(
            registry.get(&key),
            &[
                PathBuf::from("/out/mock-1.1.1/cf.fits.gz"),
                PathBuf::from("/out/mock-0.0.0/cf.fits.gz"),
            ]
        );
        assert!(registry.contains(&key, Path::new("/out/mock-0.0.0/cf.fits.gz")));
    }

    #[test]
    fn test_by_kind_groups_pairs() {
        let mut registry = AggregationRegistry::new();
        registry.register(
            ArtifactKey::new(FITTED, PairType::LyaQso, ArtifactKind::Correlation),
            "xcf.fits.gz",
        );
        registry.register(
            ArtifactKey::new(FITTED, PairType::LyaQso, ArtifactKind::Exported),
            "xcf-exp.fits.gz",
        );
        registry.register(
            ArtifactKey::new(FITTED, PairType::LyaLya, ArtifactKind::Correlation),
            "cf.fits.gz",
        );

        let raw = registry.by_kind(FITTED, ArtifactKind::Correlation);
        assert_eq!(raw.keys().copied().collect::<Vec<_>>(), vec![PairType::LyaLya, PairType::LyaQso]);
        assert_eq!(registry.len(), 3);
        assert!(registry
            .get(&ArtifactKey::new(FITTED, PairType::LybQso, ArtifactKind::Exported))
            .is_empty());
    }

    #[test]
    fn test_variants_are_kept_apart() {
        let mut registry = AggregationRegistry::new();
        registry.register(
            ArtifactKey::new(AnalysisVariant::Raw, PairType::LyaLya, ArtifactKind::Correlation),
            "raw_baseline/cf.fits.gz",
        );
        registry.register(
            ArtifactKey::new(FITTED, PairType::LyaLya, ArtifactKind::Correlation),
            "baseline/cf.fits.gz",
        );

        let raw = registry.by_kind(AnalysisVariant::Raw, ArtifactKind::Correlation);
        assert_eq!(raw[&PairType::LyaLya], vec![PathBuf::from("raw_baseline/cf.fits.gz")]);
        assert!(registry
            .by_kind(AnalysisVariant::TrueContinuum, ArtifactKind::Correlation)
            .is_empty());
    }
}
