// Realizations
// Seed expansion, per-realization namespaces and the campaign that runs them

pub mod aggregate;
pub mod campaign;
pub mod namespace;
pub mod seeds;

pub use aggregate::{AggregationRegistry, ArtifactKey, ArtifactKind};
pub use campaign::{Campaign, CampaignRun, CampaignSummary, CONFIG_SNAPSHOT};
pub use namespace::Namespace;
pub use seeds::{expand_seeds, realization_ids, RealizationId};
