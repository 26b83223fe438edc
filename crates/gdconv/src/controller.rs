//! # Conversion Controller
//!
//! Drives one level through load, convert and reset, and keeps the display
//! projections the presentation layer reads.
//!
//! ```text
//!            load ok               convert ok
//!   Idle ---------------> LevelLoaded ----> Converting ----> Converted
//!    |  ^                      ^                 |
//!    |  |                      | (retain_level)  | convert failed
//!    |  |  load failed         +---------------- Error
//!    +--|--------------------------------------> Error
//!       |
//!       +---------------- reset (from any state)
//! ```
//!
//! The state is only changed by the controller's own methods. `convert`
//! takes `&mut self`, so a second conversion cannot start while one is in
//! flight.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::DecodePaddingMode;
use base64::engine::GeneralPurpose;
use base64::engine::GeneralPurposeConfig;
use gdrpc::ConversionSummary;
use gdrpc::SerializedError;
use gdrpc::TrackingId;
use gdrpc::TrackingRef;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::bridge;
use crate::bridge::Bridge;
use crate::bridge::Fault;
use crate::channel::ChannelTransport;
use crate::config::ConvertFailurePolicy;
use crate::config::ConverterConfig;
use crate::engine::Bootstrap;
use crate::transport::Transport;
use crate::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConverterState {
    Idle,
    LevelLoaded,
    Converting,
    Converted,
    Error,
}

impl std::fmt::Display for ConverterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::LevelLoaded => "level_loaded",
            Self::Converting => "converting",
            Self::Converted => "converted",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Which controller operation a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialize,
    LoadLevel,
    Convert,
    Reset,
    Query,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initialize => "initialize",
            Self::LoadLevel => "load level",
            Self::Convert => "convert",
            Self::Reset => "reset",
            Self::Query => "query",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum Error {
    /// `initialize` has not completed.
    NotInitialized,
    /// The operation is not allowed in the current state.
    InvalidState { action: &'static str, state: ConverterState },
    /// The worker rejected the call, or the call never completed.
    Bridge { phase: Phase, source: bridge::Error },
}

impl Error {
    /// The worker's error record, if the worker rejected the call.
    pub fn remote(&self) -> Option<&SerializedError> {
        match self {
            Self::Bridge { source, .. } => source.remote(),
            _ => None,
        }
    }

    /// Text for the user: the message, followed by the stack when there is one.
    pub fn diagnostic(&self) -> String {
        match self.remote() {
            Some(remote) if !remote.stack.is_empty() => format!("{}\n{}", self, remote.stack),
            _ => self.to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "The conversion engine is not initialized"),
            Self::InvalidState { action, state } => write!(f, "Cannot {} while {}", action, state),
            Self::Bridge { phase, source } => write!(f, "Failed to {}: {}", phase, source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bridge { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn at(phase: Phase) -> impl FnOnce(bridge::Error) -> Error {
    move |source| Error::Bridge { phase, source }
}

/// Display projection of the loaded level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelView {
    pub tracking_id: TrackingId,
    pub name: String,
    /// Decoded description, or the configured placeholder.
    pub description: String,
}

impl LevelView {
    fn tracking(&self) -> TrackingRef {
        TrackingRef::new(self.tracking_id)
    }
}

/// The converted level, ready to be offered as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportView {
    pub tracking_id: TrackingId,
    pub removed_count: usize,
    pub preconversion_object_count: u64,
    /// `removed_count` as a whole percentage of `preconversion_object_count`.
    pub removed_percentage: u64,
    /// The engine's own description of the conversion.
    pub text: String,
}

/// One conversion session.
pub struct Converter {
    config: ConverterConfig,
    bridge: Bridge,
    ready: bool,
    state: ConverterState,
    level: Option<LevelView>,
    /// The worker's copy of `level` has already been rewritten.
    rewritten: bool,
    artifact: Option<Artifact>,
    report: Option<ReportView>,
    last_error: Option<Error>,
}

impl Converter {
    /// Connects to a worker listening on the other end of `transport`.
    pub fn connect(
        transport: Box<dyn Transport>,
        config: ConverterConfig,
        on_fault: impl Fn(Fault) + Send + Sync + 'static,
    ) -> Self {
        let bridge = Bridge::new(config.worker_name.clone(), transport, on_fault);
        Self {
            config,
            bridge,
            ready: false,
            state: ConverterState::Idle,
            level: None,
            rewritten: false,
            artifact: None,
            report: None,
            last_error: None,
        }
    }

    /// Starts an in-process worker for `bootstrap` and connects to it.
    ///
    /// The worker stops when the returned `Worker` is dropped.
    pub fn spawn<B: Bootstrap>(
        bootstrap: B,
        config: ConverterConfig,
        on_fault: impl Fn(Fault) + Send + Sync + 'static,
    ) -> (Self, Worker<B>) {
        let (controller_end, worker_end) = ChannelTransport::pair();
        let worker = Worker::spawn(config.worker_name.clone(), Box::new(worker_end), bootstrap);
        let converter = Self::connect(Box::new(controller_end), config, on_fault);
        (converter, worker)
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn state(&self) -> ConverterState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn level(&self) -> Option<&LevelView> {
        self.level.as_ref()
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    pub fn report(&self) -> Option<&ReportView> {
        self.report.as_ref()
    }

    /// The failure that last moved the controller to `Error`.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Brings the worker's engine up. Safe to call more than once.
    pub async fn initialize(&mut self) -> Result<()> {
        self.bridge.initialize_engine().await.map_err(at(Phase::Initialize))?;
        if !self.ready {
            info!(worker = %self.config.worker_name, "conversion engine ready");
        }
        self.ready = true;
        Ok(())
    }

    pub async fn conversion_groups(&self) -> Result<Vec<String>> {
        self.bridge.conversion_groups().await.map_err(at(Phase::Query))
    }

    /// Groups to mark active for a metagroup choice.
    ///
    /// `"none"` selects nothing. `None` means the name is not a metagroup and
    /// the current selection should be left alone.
    pub async fn select_metagroup(&self, name: &str) -> Result<Option<Vec<String>>> {
        if name == "none" {
            return Ok(Some(Vec::new()));
        }
        self.bridge.metagroup(name).await.map_err(at(Phase::Query))
    }

    pub async fn version(&self) -> Result<String> {
        self.bridge.version().await.map_err(at(Phase::Query))
    }

    /// Loads level file contents.
    ///
    /// Allowed from `Idle`, and from `Error` when no level is held. On failure
    /// the controller moves to `Error` with no level.
    pub async fn load_level(&mut self, bytes: &[u8]) -> Result<&LevelView> {
        if !self.ready {
            return Err(Error::NotInitialized);
        }
        let accepted = match self.state {
            ConverterState::Idle => true,
            ConverterState::Error => self.level.is_none(),
            _ => false,
        };
        if !accepted {
            return Err(Error::InvalidState { action: "load a level", state: self.state });
        }

        let text = String::from_utf8_lossy(bytes);
        let info = match self.bridge.gmd_info(&text).await {
            Ok(info) => info,
            Err(e) => return Err(self.fail(at(Phase::LoadLevel)(e))),
        };

        let description = self.describe(info.description.as_deref());
        debug!(tracking_id = %info.tracking_id, name = %info.name, "level parsed");

        self.last_error = None;
        self.rewritten = false;
        let level = self.level.insert(LevelView {
            tracking_id: info.tracking_id,
            name: info.name,
            description,
        });
        Self::transition(&mut self.state, ConverterState::LevelLoaded);
        Ok(level)
    }

    /// Converts the loaded level with the given groups.
    ///
    /// On success the artifact and report are available and the state is
    /// `Converted`. On failure the state is `Error` and the level is kept.
    ///
    /// Under `RetainLevel` a failed convert may be retried, unless the worker
    /// already rewrote the level and only fetching the artifact or the report
    /// failed. Converting that level again would convert converted objects, so
    /// it needs `reset` and a fresh load.
    pub async fn convert(&mut self, groups: &[String]) -> Result<&ReportView> {
        let accepted = match self.state {
            ConverterState::LevelLoaded => true,
            ConverterState::Error => {
                self.config.convert_failure == ConvertFailurePolicy::RetainLevel
                    && self.level.is_some()
                    && !self.rewritten
            }
            _ => false,
        };
        let level = match &self.level {
            Some(level) if accepted => level.clone(),
            _ => return Err(Error::InvalidState { action: "convert", state: self.state }),
        };

        Self::transition(&mut self.state, ConverterState::Converting);

        let summary = match self.bridge.run_conversion(level.tracking(), groups).await {
            Ok(summary) => summary,
            Err(e) => return Err(self.fail(at(Phase::Convert)(e))),
        };
        self.rewritten = true;

        match self.collect(&level, &summary).await {
            Ok((artifact, report)) => {
                self.last_error = None;
                self.artifact = Some(artifact);
                Self::transition(&mut self.state, ConverterState::Converted);
                Ok(self.report.insert(report))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Fetches the artifact and the report text of a finished conversion.
    async fn collect(&self, level: &LevelView, summary: &ConversionSummary) -> Result<(Artifact, ReportView)> {
        let text = self.bridge.level_to_gmd(level.tracking()).await.map_err(at(Phase::Convert))?;
        let artifact = Artifact {
            file_name: format!("{}.{}", level.name, self.config.artifact_extension),
            mime: self.config.artifact_mime.clone(),
            bytes: text.into_bytes(),
        };

        let report_text = self
            .bridge
            .parse_reports(summary.tracking())
            .await
            .map_err(at(Phase::Convert))?;
        let report = ReportView {
            tracking_id: summary.tracking_id,
            removed_count: summary.removed_count(),
            preconversion_object_count: summary.preconversion_object_count,
            removed_percentage: summary.removed_percentage(),
            text: report_text,
        };

        Ok((artifact, report))
    }

    /// Returns to `Idle` from any state.
    ///
    /// Clears the worker's handles when a level was loaded. Local state is
    /// cleared even if that call fails.
    pub async fn reset(&mut self) -> Result<()> {
        let had_level = self.level.is_some();

        self.level = None;
        self.rewritten = false;
        self.artifact = None;
        self.report = None;
        self.last_error = None;
        Self::transition(&mut self.state, ConverterState::Idle);

        if self.ready && had_level {
            self.bridge.reset_state().await.map_err(at(Phase::Reset))?;
        }
        Ok(())
    }

    /// Decoded description text for display.
    fn describe(&self, raw: Option<&str>) -> String {
        match raw.filter(|raw| !raw.is_empty()) {
            Some(raw) => decode_description(raw),
            None => self.config.empty_description_text.clone(),
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!(error = %error, "conversion session failed");
        self.last_error = Some(error.clone());
        Self::transition(&mut self.state, ConverterState::Error);
        error
    }

    fn transition(state: &mut ConverterState, next: ConverterState) {
        if *state != next {
            info!(from = %state, to = %next, "converter state changed");
        }
        *state = next;
    }
}

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

/// Standard alphabet, padding optional.
const DESCRIPTION_STANDARD: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

const DESCRIPTION_URL_SAFE: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Decodes base64 description text, returning `raw` unchanged when it is not
/// base64 or does not decode to UTF-8.
fn decode_description(raw: &str) -> String {
    DESCRIPTION_STANDARD
        .decode(raw)
        .or_else(|_| DESCRIPTION_URL_SAFE.decode(raw))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| raw.to_string())
}
