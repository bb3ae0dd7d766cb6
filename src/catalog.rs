use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::Resolution;
use crate::error::HicbandError;
use crate::source::Dataset;

/// Resolutions present in a dataset, ascending and without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionSet(Vec<Resolution>);

impl ResolutionSet {
    pub fn new(mut resolutions: Vec<Resolution>) -> Self {
        resolutions.sort();
        resolutions.dedup();
        Self(resolutions)
    }

    pub fn as_slice(&self) -> &[Resolution] {
        &self.0
    }

    pub fn contains(&self, resolution: Resolution) -> bool {
        self.0.binary_search(&resolution).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Resolution> + '_ {
        self.0.iter().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    #[default]
    All,
    One(Resolution),
    Many(Vec<Resolution>),
}

/// Lists the resolutions physically present in `dataset`.
pub fn discover<D: Dataset>(dataset: &D) -> Result<ResolutionSet, HicbandError> {
    let set = ResolutionSet::new(dataset.list_resolutions()?);
    if set.is_empty() {
        return Err(HicbandError::EmptyCatalog(dataset.id().to_string()));
    }
    info!(
        dataset = %dataset.id(),
        resolutions = ?set.as_slice().iter().map(|r| r.bp()).collect::<Vec<_>>(),
        "available resolutions"
    );
    Ok(set)
}

/// Narrows the catalog to the requested resolutions, failing on the first one
/// the catalog does not have.
pub fn select(
    catalog: &ResolutionSet,
    requested: &Selection,
) -> Result<ResolutionSet, HicbandError> {
    let wanted = match requested {
        Selection::All => return Ok(catalog.clone()),
        Selection::One(resolution) => std::slice::from_ref(resolution),
        Selection::Many(resolutions) => resolutions.as_slice(),
    };
    if let Some(&missing) = wanted.iter().find(|res| !catalog.contains(**res)) {
        return Err(HicbandError::ResolutionNotFound {
            requested: missing,
            available: catalog.as_slice().to_vec(),
        });
    }
    Ok(ResolutionSet::new(wanted.to_vec()))
}
