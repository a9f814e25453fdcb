use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::metadata::PackageId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactsError {
    #[error("failed to encode fact {kind:?} for {package}: {message}")]
    Encode {
        package: PackageId,
        kind: String,
        message: String,
    },
    #[error("failed to decode fact {kind:?} from {package}: {message}")]
    Decode {
        package: PackageId,
        kind: String,
        message: String,
    },
}

/// Encoded analyzer facts addressed by `(package, kind)`.
///
/// One `Facts` value belongs to a single analyzer; facts of different analyzers never mix.
/// Values are stored bincode-encoded so results stay `Eq` and cheap to share.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facts {
    entries: im::OrdMap<(PackageId, String), Arc<[u8]>>,
}

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize>(
        &mut self,
        package: &PackageId,
        kind: &str,
        value: &T,
    ) -> Result<(), FactsError> {
        let bytes = bincode::serialize(value).map_err(|err| FactsError::Encode {
            package: package.clone(),
            kind: kind.to_string(),
            message: err.to_string(),
        })?;
        self.entries
            .insert((package.clone(), kind.to_string()), Arc::from(bytes));
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        package: &PackageId,
        kind: &str,
    ) -> Result<Option<T>, FactsError> {
        let Some(bytes) = self.entries.get(&(package.clone(), kind.to_string())) else {
            return Ok(None);
        };
        bincode::deserialize(bytes)
            .map(Some)
            .map_err(|err| FactsError::Decode {
                package: package.clone(),
                kind: kind.to_string(),
                message: err.to_string(),
            })
    }

    pub fn contains(&self, package: &PackageId, kind: &str) -> bool {
        self.entries
            .contains_key(&(package.clone(), kind.to_string()))
    }

    /// Packages that exported at least one fact, in id order.
    pub fn packages(&self) -> Vec<PackageId> {
        let mut out: Vec<PackageId> = Vec::new();
        for (package, _) in self.entries.keys() {
            if out.last() != Some(package) {
                out.push(package.clone());
            }
        }
        out
    }

    /// Adds every fact of `other`; entries already present are kept.
    pub fn extend(&mut self, other: &Facts) {
        for (key, value) in other.entries.iter() {
            if !self.entries.contains_key(key) {
                self.entries.insert(key.clone(), Arc::clone(value));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
