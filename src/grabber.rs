use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::backend::{self, DuplicationBackend};
use crate::catalog::OutputCatalog;
use crate::env_config::env_var_millis;
use crate::error::{GrabError, GrabResult, GrabStatus};
use crate::fallback;
use crate::frame::GrabbedScreen;
use crate::pipeline::{self, SessionFrame};
use crate::screen::{ScreenInfo, screen_sets_match};
use crate::session::SessionTable;
use crate::state::{
    AllocationEvent, AllocationStateMachine, DeniedKind, EngineState, ReallocationDue,
};
use crate::widget::MonitorLocator;
use crate::worker::{ReallocateJob, ReallocationWorker, WorkerOutcome};

pub const DEFAULT_DESKTOP_RETRY_MS: u64 = 1000;
pub const DEFAULT_DUPLICATION_RETRY_MS: u64 = 5000;
pub const DEFAULT_WORKER_SHUTDOWN_MS: u64 = 3000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrabberConfig {
    /// Wait before retrying after the input desktop was inaccessible.
    pub desktop_retry_interval: Duration,
    /// Wait before retrying after duplication was refused.
    pub duplication_retry_interval: Duration,
    /// Upper bound on waiting for the worker thread at teardown.
    pub worker_shutdown_timeout: Duration,
    /// Passed to frame acquisition. Zero means poll.
    pub acquire_timeout: Duration,
}

impl Default for GrabberConfig {
    fn default() -> Self {
        Self {
            desktop_retry_interval: Duration::from_millis(DEFAULT_DESKTOP_RETRY_MS),
            duplication_retry_interval: Duration::from_millis(DEFAULT_DUPLICATION_RETRY_MS),
            worker_shutdown_timeout: Duration::from_millis(DEFAULT_WORKER_SHUTDOWN_MS),
            acquire_timeout: Duration::ZERO,
        }
    }
}

impl GrabberConfig {
    /// Applies `DDUPL_GRAB_*_MS` overrides from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_var_millis("DDUPL_GRAB_DESKTOP_RETRY_MS") {
            self.desktop_retry_interval = value;
        }
        if let Some(value) = env_var_millis("DDUPL_GRAB_DUPLICATION_RETRY_MS") {
            self.duplication_retry_interval = value;
        }
        if let Some(value) = env_var_millis("DDUPL_GRAB_WORKER_SHUTDOWN_MS") {
            self.worker_shutdown_timeout = value;
        }
        if let Some(value) = env_var_millis("DDUPL_GRAB_ACQUIRE_TIMEOUT_MS") {
            self.acquire_timeout = value;
        }
        self
    }

    fn acquire_timeout_ms(&self) -> u32 {
        u32::try_from(self.acquire_timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

/// Result of [`DuplGrabber::reallocate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReallocationOutcome {
    /// Sessions exist for every matched screen.
    Ready,
    /// Access was refused for a reason expected to go away. No session is
    /// usable, placeholder buffers are served until a retry succeeds.
    DeniedRetryable(DeniedKind),
    Failed,
}

impl ReallocationOutcome {
    /// Whether the caller should treat the screens as set up. Denials count
    /// as success because retries are driven by
    /// [`DuplGrabber::is_reallocation_needed`].
    pub fn is_success(self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Host session notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionChange {
    Locked,
    Unlocked,
    Other,
}

pub struct DuplGrabberBuilder {
    backend_override: Option<Arc<dyn DuplicationBackend>>,
    config: GrabberConfig,
}

impl DuplGrabberBuilder {
    pub fn new() -> Self {
        Self {
            backend_override: None,
            config: GrabberConfig::default(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn DuplicationBackend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    pub fn config(mut self, config: GrabberConfig) -> Self {
        self.config = config;
        self
    }

    pub fn desktop_retry_interval(mut self, interval: Duration) -> Self {
        self.config.desktop_retry_interval = interval;
        self
    }

    pub fn duplication_retry_interval(mut self, interval: Duration) -> Self {
        self.config.duplication_retry_interval = interval;
        self
    }

    pub fn worker_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.worker_shutdown_timeout = timeout;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Creates the grabber. Nothing is enumerated and no thread is started
    /// until the first discovery or reallocation.
    pub fn build(self) -> GrabResult<DuplGrabber> {
        if self.config.worker_shutdown_timeout.is_zero() {
            return Err(GrabError::InvalidConfig(
                "worker shutdown timeout must be positive".to_string(),
            ));
        }
        let backend = match self.backend_override {
            Some(b) => b,
            None => backend::default_backend()?,
        };
        Ok(DuplGrabber {
            backend,
            state: AllocationStateMachine::new(
                self.config.desktop_retry_interval,
                self.config.duplication_retry_interval,
            ),
            config: self.config,
            catalog: None,
            worker: None,
            screens: Vec::new(),
            sessions: SessionTable::default(),
            session_locked: false,
            cycles: 0,
        })
    }
}

impl Default for DuplGrabberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Desktop-duplication screen grabber.
///
/// Call [`screens_with_widgets`](Self::screens_with_widgets) to discover the
/// screens to sample, [`reallocate`](Self::reallocate) whenever
/// [`is_reallocation_needed`](Self::is_reallocation_needed) says so, then
/// [`grab_screens`](Self::grab_screens) once per cycle and read
/// [`screens`](Self::screens). All calls must come from one thread at a time.
pub struct DuplGrabber {
    backend: Arc<dyn DuplicationBackend>,
    config: GrabberConfig,
    state: AllocationStateMachine,
    catalog: Option<OutputCatalog>,
    worker: Option<ReallocationWorker>,
    screens: Vec<GrabbedScreen>,
    sessions: SessionTable,
    session_locked: bool,
    cycles: u64,
}

impl DuplGrabber {
    /// Grabber on the platform backend, configured from the environment.
    pub fn new() -> GrabResult<Self> {
        Self::builder()
            .config(GrabberConfig::default().with_env_overrides())
            .build()
    }

    pub fn builder() -> DuplGrabberBuilder {
        DuplGrabberBuilder::new()
    }

    pub fn state(&self) -> EngineState {
        self.state.state()
    }

    pub fn config(&self) -> &GrabberConfig {
        &self.config
    }

    /// When the current denial was recorded, if any.
    pub fn denied_at(&self) -> Option<Instant> {
        self.state.denied_at()
    }

    pub fn is_session_locked(&self) -> bool {
        self.session_locked
    }

    /// Current capture results, one per allocated screen.
    pub fn screens(&self) -> &[GrabbedScreen] {
        &self.screens
    }

    /// Screens hosting at least one of `widgets`. Initializes the grabber
    /// on first use; returns nothing when it is unavailable.
    pub fn screens_with_widgets<W: MonitorLocator>(&mut self, widgets: &[W]) -> Vec<ScreenInfo> {
        if !self.ensure_initialized() {
            return Vec::new();
        }
        let backend = Arc::clone(&self.backend);
        self.catalog_mut()
            .and_then(|catalog| catalog.screens_with_widgets(backend.as_ref(), widgets))
            .unwrap_or_else(|err| {
                warn!(error = %err, "failed to enumerate display outputs");
                Vec::new()
            })
    }

    pub fn is_reallocation_needed(&self, requested: &[ScreenInfo]) -> bool {
        self.is_reallocation_needed_at(requested, Instant::now())
    }

    /// [`is_reallocation_needed`](Self::is_reallocation_needed) evaluated at
    /// `now`.
    pub fn is_reallocation_needed_at(&self, requested: &[ScreenInfo], now: Instant) -> bool {
        match self.state.reallocation_due(now) {
            ReallocationDue::Now => true,
            ReallocationDue::NotYet | ReallocationDue::Never => false,
            ReallocationDue::IfScreensChanged => {
                let allocated: Vec<ScreenInfo> =
                    self.screens.iter().map(|screen| screen.screen_info).collect();
                !screen_sets_match(requested, &allocated)
            }
        }
    }

    /// Releases every session and creates new ones for `requested` on the
    /// worker thread, blocking until it is done.
    pub fn reallocate(&mut self, requested: &[ScreenInfo]) -> ReallocationOutcome {
        if !self.ensure_initialized() || self.state() == EngineState::Unavailable {
            return ReallocationOutcome::Failed;
        }

        self.free_screens();

        let catalog = match self.take_catalog() {
            Ok(catalog) => catalog,
            Err(err) => {
                error!(error = %err, "failed to enumerate graphics adapters");
                self.state
                    .apply(AllocationEvent::SessionsReleased, Instant::now());
                return ReallocationOutcome::Failed;
            }
        };

        let report = match self.worker_mut().and_then(|worker| {
            worker.reallocate(ReallocateJob {
                screens: requested.to_vec(),
                catalog,
            })
        }) {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "reallocation worker failed");
                self.worker = None;
                self.state
                    .apply(AllocationEvent::SessionsReleased, Instant::now());
                return ReallocationOutcome::Failed;
            }
        };
        self.catalog = Some(report.catalog);

        let now = Instant::now();
        match report.outcome {
            WorkerOutcome::Allocated(allocated) => {
                for screen in allocated {
                    let id = self.sessions.insert(screen.session);
                    self.screens.push(GrabbedScreen::new(
                        screen.screen_info,
                        screen.rotation,
                        Some(id),
                    ));
                }
                self.state.apply(AllocationEvent::Allocated, now);
                info!(screens = self.screens.len(), "desktop duplication allocated");
                ReallocationOutcome::Ready
            }
            WorkerOutcome::Denied(kind) => {
                self.install_placeholders(requested);
                self.state.apply(AllocationEvent::Denied(kind), now);
                ReallocationOutcome::DeniedRetryable(kind)
            }
            WorkerOutcome::Unsupported(err) => {
                error!(error = %err, "desktop duplication unsupported, grabber unavailable");
                self.state.apply(AllocationEvent::Unsupported, now);
                ReallocationOutcome::Failed
            }
            WorkerOutcome::Failed(err) => {
                error!(error = %err, "failed to allocate desktop duplication");
                self.state.apply(AllocationEvent::SessionsReleased, now);
                ReallocationOutcome::Failed
            }
        }
    }

    /// Runs one capture cycle.
    pub fn grab_screens(&mut self) -> GrabStatus {
        self.cycles = self.cycles.wrapping_add(1);
        match self.state() {
            EngineState::Allocated => self.grab_allocated(),
            EngineState::AccessDeniedDuplication => self.fill_blank_buffers(),
            // Keep the last real image on the lock screen.
            EngineState::AccessDeniedDesktop if self.session_locked => GrabStatus::FrameNotReady,
            EngineState::AccessDeniedDesktop => self.fill_blank_buffers(),
            _ => GrabStatus::FrameNotReady,
        }
    }

    pub fn on_session_change(&mut self, change: SessionChange) {
        match change {
            SessionChange::Locked => self.session_locked = true,
            SessionChange::Unlocked => self.session_locked = false,
            SessionChange::Other => {}
        }
    }

    fn ensure_initialized(&mut self) -> bool {
        match self.state() {
            EngineState::Uninitialized => {}
            EngineState::Unavailable => return false,
            _ => return true,
        }

        let initialized = OutputCatalog::build(self.backend.as_ref()).and_then(|catalog| {
            let worker = ReallocationWorker::spawn(Arc::clone(&self.backend))?;
            Ok((catalog, worker))
        });
        match initialized {
            Ok((catalog, worker)) => {
                self.catalog = Some(catalog);
                self.worker = Some(worker);
                self.state
                    .apply(AllocationEvent::Initialized, Instant::now());
                info!("desktop duplication grabber initialized");
                true
            }
            Err(err) => {
                error!(error = %err, "failed to initialize desktop duplication, grabber unavailable");
                self.state.apply(AllocationEvent::InitFailed, Instant::now());
                false
            }
        }
    }

    /// The worker, respawned if a previous one died.
    fn worker_mut(&mut self) -> GrabResult<&mut ReallocationWorker> {
        if self.worker.is_none() {
            self.worker = Some(ReallocationWorker::spawn(Arc::clone(&self.backend))?);
        }
        self.worker.as_mut().ok_or(GrabError::WorkerDead)
    }

    /// The output catalog, rebuilt if it went down with a dead worker.
    fn take_catalog(&mut self) -> GrabResult<OutputCatalog> {
        match self.catalog.take() {
            Some(catalog) => Ok(catalog),
            None => OutputCatalog::build(self.backend.as_ref()),
        }
    }

    fn catalog_mut(&mut self) -> GrabResult<&mut OutputCatalog> {
        let catalog = self.take_catalog()?;
        Ok(self.catalog.insert(catalog))
    }

    fn install_placeholders(&mut self, requested: &[ScreenInfo]) {
        let backend = Arc::clone(&self.backend);
        let rotations = self
            .catalog_mut()
            .and_then(|catalog| catalog.rotations(backend.as_ref()))
            .unwrap_or_default();
        self.screens.extend(requested.iter().map(|screen| {
            let rotation = rotations
                .get(&screen.handle)
                .map_or(0, |rotation| rotation.compensation_code());
            GrabbedScreen::new(*screen, rotation, None)
        }));
    }

    fn grab_allocated(&mut self) -> GrabStatus {
        let timeout_ms = self.config.acquire_timeout_ms();
        let mut any_update = false;

        for screen in &mut self.screens {
            let Some(session) = screen.session.and_then(|id| self.sessions.get_mut(id)) else {
                let err =
                    GrabError::MissingSession(screen.session.map_or(usize::MAX, |id| id.index()));
                error!(error = %err, screen = %screen.screen_info, "cannot grab screen");
                return GrabStatus::Error;
            };

            match pipeline::grab_session(screen, session, timeout_ms) {
                Ok(SessionFrame::Updated) => any_update = true,
                Ok(SessionFrame::Unchanged | SessionFrame::Dropped) => {}
                Ok(SessionFrame::TimedOut) => {
                    if !screen.has_buffer() {
                        return GrabStatus::FrameNotReady;
                    }
                }
                Err(GrabError::AccessLost) => {
                    debug!(
                        screen = %screen.screen_info,
                        "lost access to desktop duplication, requesting reallocation"
                    );
                    self.state
                        .apply(AllocationEvent::AccessLost, Instant::now());
                    return GrabStatus::FrameNotReady;
                }
                Err(err) => {
                    error!(
                        error = %err,
                        screen = %screen.screen_info,
                        cycle = self.cycles,
                        "failed to grab screen"
                    );
                    return GrabStatus::Error;
                }
            }
        }

        if any_update {
            GrabStatus::Ok
        } else {
            GrabStatus::FrameNotReady
        }
    }

    fn fill_blank_buffers(&mut self) -> GrabStatus {
        match fallback::fill_blank_buffers(&mut self.screens) {
            Ok(()) => GrabStatus::Ok,
            Err(err) => {
                error!(error = %err, "failed to provide blank buffers");
                GrabStatus::Error
            }
        }
    }

    /// Drops every grabbed screen, then destroys the sessions behind them.
    fn free_screens(&mut self) {
        self.screens.clear();
        self.sessions.clear();
    }
}

impl Drop for DuplGrabber {
    fn drop(&mut self) {
        self.free_screens();
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown(self.config.worker_shutdown_timeout);
        }
    }
}
