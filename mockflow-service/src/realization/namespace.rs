// Realization Namespaces
// Disjoint directory trees owned by each realization and by the stack

use super::seeds::RealizationId;
use crate::config::MockSetup;
use crate::stage::{AnalysisVariant, Region};

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    label: String,
    root: PathBuf,
    skewers: PathBuf,
    analysis: String,
}

impl Namespace {
    /// `<output_root>/<prefix>-<mock>.<catalog>.<job>`
    pub fn for_realization(setup: &MockSetup, id: &RealizationId) -> Self {
        Self {
            label: id.to_string(),
            root: setup.output_root.join(format!("{}-{}", setup.prefix, id)),
            skewers: setup.input_root.join(format!("{}-{}", setup.prefix, id.mock)),
            analysis: setup.analysis_name.clone(),
        }
    }

    /// Tree for cross-realization products
    pub fn for_stack(setup: &MockSetup) -> Self {
        Self {
            label: setup.stack_name.clone(),
            root: setup
                .output_root
                .join(format!("{}-{}", setup.prefix, setup.stack_name)),
            skewers: setup.input_root.clone(),
            analysis: setup.analysis_name.clone(),
        }
    }

    /// Same tree, analysis products under the directory owned by `variant`
    pub fn for_variant(&self, setup: &MockSetup, variant: AnalysisVariant) -> Self {
        Self {
            analysis: variant.dir_name(&setup.analysis_name),
            ..self.clone()
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn skewers_dir(&self) -> &Path {
        &self.skewers
    }

    pub fn spectra_dir(&self) -> PathBuf {
        self.root.join("spectra")
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.root.join("catalog")
    }

    pub fn input_catalog(&self) -> PathBuf {
        self.catalog_dir().join("input_qso_cat.fits")
    }

    pub fn zcat(&self) -> PathBuf {
        self.catalog_dir().join("zcat.fits")
    }

    pub fn zcat_with_errors(&self) -> PathBuf {
        self.catalog_dir().join("zcat_zerr.fits")
    }

    pub fn contaminant_catalog(&self) -> PathBuf {
        self.catalog_dir().join("dla_cat.fits")
    }

    pub fn analysis_dir(&self) -> PathBuf {
        self.root.join(&self.analysis)
    }

    pub fn deltas_dir(&self, region: Region) -> PathBuf {
        self.analysis_dir().join(format!("deltas_{}", region.name()))
    }

    pub fn correlations_dir(&self) -> PathBuf {
        self.analysis_dir().join("correlations")
    }

    pub fn fits_dir(&self) -> PathBuf {
        self.analysis_dir().join("fits")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.analysis_dir().join("scripts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.analysis_dir().join("logs")
    }

    pub fn script(&self, name: &str) -> PathBuf {
        self.scripts_dir().join(format!("{}.sh", name))
    }

    /// Create the tree. The spectra directory is left to the synthesis
    /// job, whose presence check depends on it.
    pub async fn create_dirs(&self, regions: &[Region]) -> io::Result<()> {
        let mut dirs = vec![
            self.catalog_dir(),
            self.correlations_dir(),
            self.fits_dir(),
            self.scripts_dir(),
            self.logs_dir(),
        ];
        dirs.extend(regions.iter().map(|region| self.deltas_dir(*region).join("Delta")));
        dirs.extend(regions.iter().map(|region| self.deltas_dir(*region).join("Log")));
        for dir in dirs {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(root: &Path) -> MockSetup {
        MockSetup {
            output_root: root.to_path_buf(),
            input_root: PathBuf::from("/skewers"),
            ..MockSetup::default()
        }
    }

    #[test]
    fn test_realizations_are_disjoint() {
        let setup = setup(Path::new("/out"));
        let a = Namespace::for_realization(&setup, &RealizationId { mock: 0, catalog: 0, job: 1 });
        let b = Namespace::for_realization(&setup, &RealizationId { mock: 0, catalog: 0, job: 2 });

        assert_eq!(a.root(), Path::new("/out/mock-0.0.1"));
        assert_ne!(a.root(), b.root());
        assert_eq!(a.skewers_dir(), b.skewers_dir());
        assert_eq!(
            a.deltas_dir(Region::Lyb),
            PathBuf::from("/out/mock-0.0.1/baseline/deltas_lyb")
        );
    }

    #[test]
    fn test_variants_share_catalogs_not_analysis() {
        let setup = setup(Path::new("/out"));
        let base = Namespace::for_realization(&setup, &RealizationId { mock: 2, catalog: 2, job: 2 });
        let raw = base.for_variant(&setup, AnalysisVariant::Raw);
        let fitted = base.for_variant(&setup, AnalysisVariant::FittedContinuum);

        assert_eq!(raw.zcat(), base.zcat());
        assert_eq!(raw.label(), base.label());
        assert_eq!(fitted, base);
        assert_eq!(
            raw.correlations_dir(),
            PathBuf::from("/out/mock-2.2.2/raw_baseline/correlations")
        );
        assert_ne!(raw.scripts_dir(), fitted.scripts_dir());
    }

    #[tokio::test]
    async fn test_create_dirs_leaves_spectra() {
        let dir = TempDir::new().unwrap();
        let ns = Namespace::for_stack(&setup(dir.path()));
        ns.create_dirs(&[Region::Lya]).await.unwrap();

        assert!(ns.scripts_dir().is_dir());
        assert!(ns.deltas_dir(Region::Lya).join("Delta").is_dir());
        assert!(!ns.spectra_dir().exists());
        assert_eq!(ns.label(), "stack");
    }
}
