//! Serializable projections of engine-resident objects.
//!
//! The worker never sends a level or a report across the channel. It sends one
//! of these instead, keyed by the `TrackingId` under which the real object sits
//! in its handle table.

use serde::Deserialize;
use serde::Serialize;

/// Strong type for handle table keys.
///
/// A tracking id is the `promise_id` of the request that created the object.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(pub u64);

impl TrackingId {
    pub fn from_promise(promise_id: u64) -> Self {
        Self(promise_id)
    }
}

impl std::fmt::Display for TrackingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// The argument shape used to refer back to a handle.
///
/// Unknown fields are ignored on decode, so a full `LevelInfo` or
/// `ConversionSummary` can be passed where a reference is expected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRef {
    pub tracking_id: TrackingId,
}

impl TrackingRef {
    pub fn new(tracking_id: TrackingId) -> Self {
        Self { tracking_id }
    }
}

/// Result of `get_gmd_info`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub tracking_id: TrackingId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl LevelInfo {
    pub fn tracking(&self) -> TrackingRef {
        TrackingRef::new(self.tracking_id)
    }
}

/// Result of `run_conversion`.
///
/// The removed objects themselves are not needed by the page, only how many
/// there were, so they travel as a sequence of nulls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub tracking_id: TrackingId,
    pub removed_objects: Vec<()>,
    pub preconversion_object_count: u64,
}

impl ConversionSummary {
    pub fn new(tracking_id: TrackingId, removed_count: usize, preconversion_object_count: u64) -> Self {
        Self {
            tracking_id,
            removed_objects: vec![(); removed_count],
            preconversion_object_count,
        }
    }

    pub fn tracking(&self) -> TrackingRef {
        TrackingRef::new(self.tracking_id)
    }

    pub fn removed_count(&self) -> usize {
        self.removed_objects.len()
    }

    /// Share of the original objects that were removed, as a whole percent.
    ///
    /// An empty level reports 0.
    pub fn removed_percentage(&self) -> u64 {
        if self.preconversion_object_count == 0 {
            return 0;
        }
        let ratio = self.removed_count() as f64 * 100.0 / self.preconversion_object_count as f64;
        ratio.round() as u64
    }
}
