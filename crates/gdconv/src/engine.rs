//! # Conversion Engine Contract
//!
//! The engine that actually parses and rewrites levels is a foreign component.
//! The worker only sees it through the `Engine` trait, and only obtains one
//! through `Bootstrap`, which may take arbitrarily long (fetching a runtime,
//! installing the conversion package).
//!
//! Every engine entry point may fail. Failures are `ForeignError`s: a name, a
//! message, an optional stack, and an optional payload that the engine attached
//! and that is not guaranteed to be serializable.

use serde::Serialize;
use serde_json::Value;

/// Extra data attached to a `ForeignError`.
///
/// Serialization is attempted only when the error is sent to the controller,
/// and is allowed to fail.
pub trait Payload: std::fmt::Debug + Send + Sync {
    fn to_json(&self) -> serde_json::Result<Value>;
}

impl<T> Payload for T
where
    T: Serialize + std::fmt::Debug + Send + Sync,
{
    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// An error raised by the foreign engine.
#[derive(Debug)]
pub struct ForeignError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    data: Option<Box<dyn Payload>>,
}

impl ForeignError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            data: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_data<P: Payload + 'static>(mut self, data: P) -> Self {
        self.data = Some(Box::new(data));
        self
    }

    pub fn data(&self) -> Option<&dyn Payload> {
        self.data.as_deref()
    }
}

impl std::fmt::Display for ForeignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ForeignError {}

pub type Result<T> = std::result::Result<T, ForeignError>;

/// Display fields of a parsed level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelDetails {
    pub name: String,
    /// Raw (usually base64) description, `None` when the level has none.
    pub description: Option<String>,
}

/// Object counts of a conversion report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportCounts {
    pub removed: usize,
    pub preconversion: u64,
}

/// The entry points the dispatcher calls on a ready engine.
///
/// Levels and reports are engine-resident: they never leave the worker.
pub trait Engine: Send + Sync + 'static {
    type Level: Send + 'static;
    type Report: Send + 'static;

    /// Parses level file text.
    fn parse_level(&self, text: &str) -> Result<Self::Level>;

    fn level_details(&self, level: &Self::Level) -> Result<LevelDetails>;

    /// Rewrites `level` in place using the named conversion groups.
    ///
    /// Group names the engine does not know are ignored.
    fn convert(&self, level: &mut Self::Level, groups: &[String]) -> Result<Self::Report>;

    fn report_counts(&self, report: &Self::Report) -> Result<ReportCounts>;

    /// Serializes a level back to level file text.
    fn serialize_level(&self, level: &Self::Level) -> Result<String>;

    /// Renders a report as human-readable text.
    fn describe_report(&self, report: &Self::Report) -> Result<String>;

    /// Names of all conversion groups, in catalog order.
    fn conversion_groups(&self) -> Result<Vec<String>>;

    /// Member groups of a named metagroup, `None` when there is no such metagroup.
    fn metagroup(&self, name: &str) -> Result<Option<Vec<String>>>;

    fn base64_decode(&self, text: &str) -> Result<String>;

    fn version(&self) -> Result<String>;
}

/// Produces a ready engine.
#[async_trait::async_trait]
pub trait Bootstrap: Send + Sync + 'static {
    type Engine: Engine;

    async fn bootstrap(&self) -> Result<Self::Engine>;
}
