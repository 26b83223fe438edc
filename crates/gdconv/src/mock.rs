//! A small deterministic engine for tests and demos.
//!
//! It understands a toy level format, one `key=value` per line:
//!
//! ```text
//! name=Stereo Madness
//! description=VGhlIGZpcnN0IGxldmVs
//! objects=1,8,750,812,1400
//! ```
//!
//! Object ids up to `LEGACY_MAX_OBJECT_ID` survive conversion untouched. Ids
//! above it are rewritten when their conversion group is selected and removed
//! otherwise. A `poison=<group>` line makes conversion fail whenever that
//! group is selected, with an error payload that cannot be serialized. A
//! `sealed=<anything>` line parses and converts normally but makes
//! serialization fail.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use serde::Serialize;

use crate::engine::Bootstrap;
use crate::engine::Engine;
use crate::engine::ForeignError;
use crate::engine::LevelDetails;
use crate::engine::ReportCounts;
use crate::engine::Result;

/// Highest object id the legacy format knows about.
pub const LEGACY_MAX_OBJECT_ID: u32 = 744;

/// Binary version stamped on converted levels.
pub const LEGACY_BINARY_VERSION: u32 = 24;

pub const MOCK_VERSION: &str = "mock-1.0.4";

struct Group {
    name: &'static str,
    ids: Range<u32>,
    replacement: u32,
}

const GROUPS: [Group; 3] = [
    Group { name: "glow", ids: 745..800, replacement: 503 },
    Group { name: "portals", ids: 800..900, replacement: 10 },
    Group { name: "triggers", ids: 900..1000, replacement: 31 },
];

const METAGROUPS: [(&str, &[&str]); 2] = [
    ("base", &["glow"]),
    ("all", &["glow", "portals", "triggers"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockLevel {
    pub name: String,
    pub description: String,
    pub objects: Vec<u32>,
    pub binary_version: Option<u32>,
    pub poison: Option<String>,
    /// Unrecognized lines, kept in order.
    pub extra: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockReport {
    pub removed: Vec<u32>,
    pub converted: BTreeMap<String, usize>,
    pub preconversion: u64,
}

#[derive(Debug, Serialize)]
struct LineInfo {
    line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockEngine;

impl MockEngine {
    pub fn new() -> Self {
        Self
    }
}

fn parse_error(line: usize, message: String) -> ForeignError {
    let stack = format!("LevelParseError: {}\n    at MockEngine::parse_level (line {})", message, line);
    ForeignError::new("LevelParseError", message)
        .with_stack(stack)
        .with_data(LineInfo { line })
}

impl Engine for MockEngine {
    type Level = MockLevel;
    type Report = MockReport;

    fn parse_level(&self, text: &str) -> Result<MockLevel> {
        let mut name = None;
        let mut description = String::new();
        let mut objects = Vec::new();
        let mut binary_version = None;
        let mut poison = None;
        let mut extra = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(parse_error(line_no, format!("expected key=value, found '{}'", line)));
            };

            match key {
                "name" => name = Some(value.to_string()),
                "description" => description = value.to_string(),
                "objects" => {
                    objects = value
                        .split(',')
                        .filter(|id| !id.is_empty())
                        .map(|id| {
                            id.trim()
                                .parse::<u32>()
                                .map_err(|_| parse_error(line_no, format!("invalid object id '{}'", id)))
                        })
                        .collect::<Result<Vec<_>>>()?;
                }
                "binary_version" => {
                    let version = value
                        .parse::<u32>()
                        .map_err(|_| parse_error(line_no, format!("invalid binary version '{}'", value)))?;
                    binary_version = Some(version);
                }
                "poison" => poison = Some(value.to_string()),
                _ => extra.push((key.to_string(), value.to_string())),
            }
        }

        let name = name.ok_or_else(|| parse_error(0, "level has no name".to_string()))?;

        Ok(MockLevel { name, description, objects, binary_version, poison, extra })
    }

    fn level_details(&self, level: &MockLevel) -> Result<LevelDetails> {
        let description = (!level.description.is_empty()).then(|| level.description.clone());
        Ok(LevelDetails { name: level.name.clone(), description })
    }

    fn convert(&self, level: &mut MockLevel, groups: &[String]) -> Result<MockReport> {
        let selected = |name: &str| groups.iter().any(|g| g == name);

        if let Some(poison) = level.poison.as_deref().filter(|p| selected(*p)) {
            // map keys that are not strings do not survive JSON
            let detail: BTreeMap<Vec<u32>, String> = BTreeMap::from([(vec![0], poison.to_string())]);
            return Err(ForeignError::new("ConversionError", format!("group '{}' cannot be applied to this level", poison))
                .with_stack("ConversionError\n    at MockEngine::convert")
                .with_data(detail));
        }

        let preconversion = level.objects.len() as u64;
        let mut kept = Vec::with_capacity(level.objects.len());
        let mut removed = Vec::new();
        let mut converted = BTreeMap::new();

        for &id in &level.objects {
            if id <= LEGACY_MAX_OBJECT_ID {
                kept.push(id);
                continue;
            }
            match GROUPS.iter().find(|g| g.ids.contains(&id) && selected(g.name)) {
                Some(group) => {
                    kept.push(group.replacement);
                    *converted.entry(group.name.to_string()).or_insert(0) += 1;
                }
                None => removed.push(id),
            }
        }

        level.objects = kept;
        level.binary_version = Some(LEGACY_BINARY_VERSION);

        Ok(MockReport { removed, converted, preconversion })
    }

    fn report_counts(&self, report: &MockReport) -> Result<ReportCounts> {
        Ok(ReportCounts { removed: report.removed.len(), preconversion: report.preconversion })
    }

    fn serialize_level(&self, level: &MockLevel) -> Result<String> {
        if level.extra.iter().any(|(key, _)| key == "sealed") {
            return Err(ForeignError::new("SerializationError", format!("level '{}' is sealed", level.name))
                .with_stack("SerializationError\n    at MockEngine::serialize_level"));
        }

        let objects = level.objects.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");

        let mut out = format!("name={}\ndescription={}\nobjects={}\n", level.name, level.description, objects);
        if let Some(version) = level.binary_version {
            out.push_str(&format!("binary_version={}\n", version));
        }
        if let Some(poison) = &level.poison {
            out.push_str(&format!("poison={}\n", poison));
        }
        for (key, value) in &level.extra {
            out.push_str(&format!("{}={}\n", key, value));
        }
        Ok(out)
    }

    fn describe_report(&self, report: &MockReport) -> Result<String> {
        let mut out = String::new();

        if report.converted.is_empty() {
            out.push_str("No objects were converted.\n");
        } else {
            out.push_str("Converted objects:\n");
            for (group, count) in &report.converted {
                out.push_str(&format!("- {}: {}\n", group, count));
            }
        }

        if report.removed.is_empty() {
            out.push_str("No objects were removed.\n");
        } else {
            let mut by_id: BTreeMap<u32, usize> = BTreeMap::new();
            for &id in &report.removed {
                *by_id.entry(id).or_insert(0) += 1;
            }
            out.push_str("Removed objects:\n");
            for (id, count) in by_id {
                out.push_str(&format!("- {} (x{})\n", id, count));
            }
        }

        Ok(out)
    }

    fn conversion_groups(&self) -> Result<Vec<String>> {
        Ok(GROUPS.iter().map(|g| g.name.to_string()).collect())
    }

    fn metagroup(&self, name: &str) -> Result<Option<Vec<String>>> {
        let members = METAGROUPS
            .iter()
            .find(|(meta, _)| *meta == name)
            .map(|(_, members)| members.iter().map(|m| m.to_string()).collect());
        Ok(members)
    }

    fn base64_decode(&self, text: &str) -> Result<String> {
        let bytes = URL_SAFE
            .decode(text)
            .map_err(|e| ForeignError::new("binascii.Error", e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| ForeignError::new("UnicodeDecodeError", e.to_string()))
    }

    fn version(&self) -> Result<String> {
        Ok(MOCK_VERSION.to_string())
    }
}

/// Bootstraps a `MockEngine`, counting how many times it was asked to.
#[derive(Debug, Clone, Default)]
pub struct MockBootstrap {
    bootstraps: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    delay: Duration,
}

impl MockBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every bootstrap take at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes the next `count` bootstraps fail.
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// How many bootstraps have been started so far, across clones.
    pub fn bootstrap_count(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Bootstrap for MockBootstrap {
    type Engine = MockEngine;

    async fn bootstrap(&self) -> Result<MockEngine> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ForeignError::new("PackageInstallError", "failed to install the conversion package")
                .with_stack("PackageInstallError\n    at MockBootstrap::bootstrap"));
        }

        Ok(MockEngine::new())
    }
}
