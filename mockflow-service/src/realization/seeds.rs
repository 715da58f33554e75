// Seed Expansion
// Turns seed specifications into realization identifiers

use crate::error::ConfigError;

use serde::{Deserialize, Serialize};

use std::fmt;

/// Expand `"0-3,7"` style specifications.
///
/// Ranges are end-exclusive, so `"0-3"` is `[0, 1, 2]`. The result is
/// sorted numerically; duplicates are kept.
pub fn expand_seeds(spec: &str) -> Result<Vec<u64>, ConfigError> {
    let invalid = |token: &str| ConfigError::InvalidSeedToken {
        spec: spec.to_string(),
        token: token.to_string(),
    };

    let mut seeds = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        let bounds: Vec<&str> = token.split('-').collect();
        match bounds.as_slice() {
            [single] => {
                let seed = single.parse::<u64>().map_err(|_| invalid(token))?;
                seeds.push(seed);
            }
            [start, end] => {
                let start = start.trim().parse::<u64>().map_err(|_| invalid(token))?;
                let end = end.trim().parse::<u64>().map_err(|_| invalid(token))?;
                if start > end {
                    return Err(invalid(token));
                }
                seeds.extend(start..end);
            }
            _ => return Err(invalid(token)),
        }
    }

    seeds.sort_unstable();
    Ok(seeds)
}

/// Composite seed of one realization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RealizationId {
    /// Input (skewer) seed
    pub mock: u64,
    pub catalog: u64,
    pub job: u64,
}

impl fmt::Display for RealizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.mock, self.catalog, self.job)
    }
}

/// Combine up to three seed specifications index by index.
///
/// A missing list borrows from the ones given: catalog and job seeds
/// default to each other before falling back to the input seeds, and
/// missing input seeds come from the catalog list, then the job list.
/// Every list that was actually supplied must have the same length.
pub fn realization_ids(
    mock: Option<&str>,
    catalog: Option<&str>,
    job: Option<&str>,
) -> Result<Vec<RealizationId>, ConfigError> {
    let expand = |spec: Option<&str>| spec.map(expand_seeds).transpose();
    let mock = expand(mock)?;
    let catalog = expand(catalog)?;
    let job = expand(job)?;

    let supplied: Vec<(&str, usize)> = [("mock", &mock), ("catalog", &catalog), ("job", &job)]
        .into_iter()
        .filter_map(|(name, list)| list.as_ref().map(|l| (name, l.len())))
        .collect();

    let Some(&(_, expected)) = supplied.first() else {
        return Err(ConfigError::NoSeeds);
    };
    if supplied.iter().any(|(_, len)| *len != expected) {
        let details = supplied
            .iter()
            .map(|(name, len)| format!("{} {} seeds", len, name))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ConfigError::SeedCountMismatch { details });
    }

    let mock_list = mock
        .clone()
        .or_else(|| catalog.clone())
        .or_else(|| job.clone())
        .unwrap_or_default();
    let catalog_list = catalog
        .clone()
        .or_else(|| job.clone())
        .unwrap_or_else(|| mock_list.clone());
    let job_list = job
        .or(catalog)
        .unwrap_or_else(|| mock_list.clone());

    Ok(mock_list
        .iter()
        .zip(&catalog_list)
        .zip(&job_list)
        .map(|((&mock, &catalog), &job)| RealizationId { mock, catalog, job })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_are_end_exclusive() {
        assert_eq!(expand_seeds("0-3").unwrap(), vec![0, 1, 2]);
        assert_eq!(expand_seeds("5").unwrap(), vec![5]);
        assert_eq!(expand_seeds("0-2,7").unwrap(), vec![0, 1, 7]);
    }

    #[test]
    fn test_sorted_with_duplicates_kept() {
        assert_eq!(expand_seeds("9, 2-4, 3").unwrap(), vec![2, 3, 3, 9]);
        assert_eq!(expand_seeds("4-4").unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn test_malformed_tokens() {
        for spec in ["", "1,,2", "a", "3-1", "1-2-3", "-4"] {
            assert!(
                matches!(expand_seeds(spec), Err(ConfigError::InvalidSeedToken { .. })),
                "{} should be rejected",
                spec
            );
        }
    }

    #[test]
    fn test_single_list_fills_all_positions() {
        let ids = realization_ids(Some("0-2"), None, None).unwrap();
        assert_eq!(
            ids,
            vec![
                RealizationId { mock: 0, catalog: 0, job: 0 },
                RealizationId { mock: 1, catalog: 1, job: 1 },
            ]
        );
        assert_eq!(ids[1].to_string(), "1.1.1");
    }

    #[test]
    fn test_job_list_defaults_missing_catalog() {
        let ids = realization_ids(Some("0-2"), None, Some("100-102")).unwrap();
        assert_eq!(ids[0], RealizationId { mock: 0, catalog: 100, job: 100 });
        assert_eq!(ids[1], RealizationId { mock: 1, catalog: 101, job: 101 });
    }

    #[test]
    fn test_length_mismatch_is_config_error() {
        let err = realization_ids(Some("0-3"), Some("0-2"), Some("10-13")).unwrap_err();
        match err {
            ConfigError::SeedCountMismatch { details } => {
                assert_eq!(details, "3 mock seeds, 2 catalog seeds, 3 job seeds");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_no_seeds() {
        assert!(matches!(realization_ids(None, None, None), Err(ConfigError::NoSeeds)));
    }
}
