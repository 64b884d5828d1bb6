//! Lifecycle of a concurrently built index.
//!
//! ```text
//! Absent --RequestBuild--> Building --BuildSucceeded--> PresentValid
//!    ^                        |
//!    |                   BuildFailed
//!    |                        v
//!    +--------Drop------ PresentInvalid
//! ```
//!
//! "The name exists" is not enough to skip a build: an interrupted
//! `CREATE INDEX CONCURRENTLY` leaves a catalog entry that queries cannot
//! use. Only [`IndexState::PresentValid`] satisfies an index spec.

use std::fmt;

use serde::Serialize;

use super::index_policy::Identifier;

/// Externally observable state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// No index with the name exists.
    Absent,
    /// A concurrent build is in flight.
    Building,
    /// The index exists and queries may use it.
    PresentValid,
    /// The index exists in the catalog but is unusable; it must be dropped.
    PresentInvalid,
}

/// Event moving an index between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTransition {
    /// A creation request was issued.
    RequestBuild,
    /// The build completed and the index is valid.
    BuildSucceeded,
    /// The build was interrupted or failed.
    BuildFailed,
    /// The index was explicitly dropped.
    Drop,
}

/// A transition that the lifecycle does not permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {transition:?} to an index that is {from}")]
pub struct IllegalTransition {
    /// State the transition was attempted from.
    pub from: IndexState,
    /// Rejected transition.
    pub transition: IndexTransition,
}

impl IndexState {
    /// Apply a transition, rejecting moves the lifecycle does not allow.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use insightball_migrations::domain::{IndexState, IndexTransition};
    ///
    /// let building = IndexState::Absent
    ///     .apply(IndexTransition::RequestBuild)
    ///     .expect("absent indexes may be built");
    /// assert_eq!(building, IndexState::Building);
    ///
    /// // An invalid index must be dropped before it can be rebuilt.
    /// assert!(IndexState::PresentInvalid
    ///     .apply(IndexTransition::RequestBuild)
    ///     .is_err());
    /// ```
    pub fn apply(self, transition: IndexTransition) -> Result<Self, IllegalTransition> {
        match (self, transition) {
            (Self::Absent, IndexTransition::RequestBuild) => Ok(Self::Building),
            (Self::Building, IndexTransition::BuildSucceeded) => Ok(Self::PresentValid),
            (Self::Building, IndexTransition::BuildFailed) => Ok(Self::PresentInvalid),
            (Self::PresentInvalid, IndexTransition::Drop) => Ok(Self::Absent),
            (from, transition) => Err(IllegalTransition { from, transition }),
        }
    }

    /// Derive the state from a catalog observation (`None` when absent).
    pub fn observe(observation: Option<&IndexObservation>) -> Self {
        match observation {
            None => Self::Absent,
            Some(observed) if observed.is_valid => Self::PresentValid,
            Some(observed) if observed.build_in_progress => Self::Building,
            Some(_) => Self::PresentInvalid,
        }
    }

    /// Returns true when queries may use the index.
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::PresentValid)
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Absent => "absent",
            Self::Building => "building",
            Self::PresentValid => "present-valid",
            Self::PresentInvalid => "present-invalid",
        })
    }
}

/// Catalog facts about an existing index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexObservation {
    /// Table the index is defined on.
    pub table: Identifier,
    /// `pg_index.indisvalid`.
    pub is_valid: bool,
    /// A `CREATE INDEX CONCURRENTLY` for this index is currently running.
    pub build_in_progress: bool,
}
