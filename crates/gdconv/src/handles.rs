//! Handle table for engine-resident objects.
//!
//! Levels and reports produced by the engine cannot cross the channel. The
//! worker keeps them here and hands the controller a `TrackingId` instead.
//!
//! Entries are only ever removed by `clear`, which the reset operation calls.
//! A missing reset leaks entries until the worker is dropped.

use std::collections::HashMap;

use gdrpc::TrackingId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No entry is stored under this id.
    NotFound(TrackingId),
    /// An entry exists but holds a different kind of object.
    KindMismatch { id: TrackingId, expected: &'static str },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "{} is not in the handle table", id),
            Self::KindMismatch { id, expected } => write!(f, "{} does not refer to a {}", id, expected),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps tracking ids to objects owned by the worker.
#[derive(Debug)]
pub struct HandleTable<T> {
    entries: HashMap<TrackingId, T>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Stores `object` under `id`.
    ///
    /// An existing entry under the same id is replaced without notice. Callers
    /// keep ids unique by using the promise id of the creating request.
    pub fn store(&mut self, id: TrackingId, object: T) {
        self.entries.insert(id, object);
    }

    pub fn get(&self, id: TrackingId) -> Result<&T> {
        self.entries.get(&id).ok_or(Error::NotFound(id))
    }

    pub fn get_mut(&mut self, id: TrackingId) -> Result<&mut T> {
        self.entries.get_mut(&id).ok_or(Error::NotFound(id))
    }

    pub fn contains(&self, id: TrackingId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drops every entry, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
