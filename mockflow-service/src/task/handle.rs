// Job Handles
// Scheduler job identifiers and the dependency sets built from them

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;
use std::fmt;

/// Opaque scheduler job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a downstream task waits on.
///
/// `None` means "nothing to wait for": the producing task was skipped,
/// run synchronously, or only written in dry-run mode. Sets may nest and
/// may contain `None` entries; they are only normalized through
/// [`Handle::flatten_to_set`] when a dependency clause is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Handle {
    #[default]
    None,
    Id(JobId),
    Set(Vec<Handle>),
}

impl Handle {
    /// Combine several handles into one fan-in dependency
    pub fn join<I>(handles: I) -> Self
    where
        I: IntoIterator<Item = Handle>,
    {
        Handle::Set(handles.into_iter().collect())
    }

    /// Every real job id reachable from this handle, deduplicated and ordered
    pub fn flatten_to_set(&self) -> BTreeSet<JobId> {
        let mut ids = BTreeSet::new();
        self.collect_into(&mut ids);
        ids
    }

    fn collect_into(&self, ids: &mut BTreeSet<JobId>) {
        match self {
            Handle::None => {}
            Handle::Id(id) => {
                ids.insert(*id);
            }
            Handle::Set(handles) => {
                for handle in handles {
                    handle.collect_into(ids);
                }
            }
        }
    }

    /// True when nothing real has to finish first
    pub fn is_satisfied(&self) -> bool {
        self.flatten_to_set().is_empty()
    }

    /// The job id when this handle names exactly one submitted job
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Handle::Id(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<JobId> for Handle {
    fn from(id: JobId) -> Self {
        Handle::Id(id)
    }
}

impl From<Option<JobId>> for Handle {
    fn from(id: Option<JobId>) -> Self {
        id.map(Handle::Id).unwrap_or_default()
    }
}

impl From<Vec<Handle>> for Handle {
    fn from(handles: Vec<Handle>) -> Self {
        Handle::Set(handles)
    }
}

impl FromIterator<Handle> for Handle {
    fn from_iter<I: IntoIterator<Item = Handle>>(iter: I) -> Self {
        Handle::join(iter)
    }
}
