//! Dedicated thread that switches to the input desktop and creates
//! duplication sessions.
//!
//! Switching desktops changes the calling thread's desktop association, so
//! the switch and every session creation that depends on it happen on one
//! thread that does nothing else. The caller talks to it through a
//! single-slot command channel and blocks on the reply, so at most one
//! command is ever in flight.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::DuplicationBackend;
use crate::catalog::OutputCatalog;
use crate::error::{GrabError, GrabResult};
use crate::screen::ScreenInfo;
use crate::session::CaptureSession;
use crate::state::DeniedKind;

/// A reallocation request. The catalog travels with the job so the worker
/// can rebuild it without sharing it.
pub(crate) struct ReallocateJob {
    pub(crate) screens: Vec<ScreenInfo>,
    pub(crate) catalog: OutputCatalog,
}

/// A session created for one requested screen.
pub(crate) struct AllocatedScreen {
    pub(crate) screen_info: ScreenInfo,
    pub(crate) rotation: u8,
    pub(crate) session: CaptureSession,
}

pub(crate) enum WorkerOutcome {
    Allocated(Vec<AllocatedScreen>),
    Denied(DeniedKind),
    Unsupported(GrabError),
    Failed(GrabError),
}

pub(crate) struct ReallocationReport {
    pub(crate) outcome: WorkerOutcome,
    pub(crate) catalog: OutputCatalog,
}

enum WorkerCommand {
    Reallocate(ReallocateJob),
    Exit,
}

enum WorkerReply {
    Reallocated(ReallocationReport),
    Exited,
}

pub(crate) struct ReallocationWorker {
    commands: SyncSender<WorkerCommand>,
    replies: Receiver<WorkerReply>,
    join_handle: Option<JoinHandle<()>>,
}

impl ReallocationWorker {
    pub(crate) fn spawn(backend: Arc<dyn DuplicationBackend>) -> GrabResult<Self> {
        let (command_tx, command_rx) = mpsc::sync_channel(1);
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);

        let join_handle = std::thread::Builder::new()
            .name("ddupl-grab-realloc".to_string())
            .spawn(move || worker_main(backend, command_rx, reply_tx))
            .map_err(|e| {
                GrabError::Platform(anyhow::anyhow!(
                    "failed to spawn reallocation worker thread: {e}"
                ))
            })?;

        Ok(Self {
            commands: command_tx,
            replies: reply_rx,
            join_handle: Some(join_handle),
        })
    }

    /// Runs a reallocation on the worker and waits for it without a timeout.
    pub(crate) fn reallocate(&mut self, job: ReallocateJob) -> GrabResult<ReallocationReport> {
        self.commands
            .send(WorkerCommand::Reallocate(job))
            .map_err(|_| GrabError::WorkerDead)?;
        match self.replies.recv() {
            Ok(WorkerReply::Reallocated(report)) => Ok(report),
            Ok(WorkerReply::Exited) | Err(_) => Err(GrabError::WorkerDead),
        }
    }

    /// Asks the worker to exit and waits up to `timeout` for it. A worker
    /// that does not answer in time is detached. Returns whether it exited.
    pub(crate) fn shutdown(&mut self, timeout: Duration) -> bool {
        let Some(join_handle) = self.join_handle.take() else {
            return true;
        };

        if self.commands.try_send(WorkerCommand::Exit).is_err() {
            warn!("reallocation worker is not accepting commands, detaching it");
            return false;
        }

        match self.replies.recv_timeout(timeout) {
            Ok(WorkerReply::Exited) | Err(RecvTimeoutError::Disconnected) => {
                let _ = join_handle.join();
                true
            }
            Ok(WorkerReply::Reallocated(_)) | Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "reallocation worker did not acknowledge exit, detaching it"
                );
                false
            }
        }
    }
}

impl Drop for ReallocationWorker {
    fn drop(&mut self) {
        self.shutdown(Duration::from_millis(crate::grabber::DEFAULT_WORKER_SHUTDOWN_MS));
    }
}

fn worker_main(
    backend: Arc<dyn DuplicationBackend>,
    commands: Receiver<WorkerCommand>,
    replies: SyncSender<WorkerReply>,
) {
    debug!("reallocation worker started");
    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Reallocate(job) => {
                let ReallocateJob {
                    screens,
                    mut catalog,
                } = job;
                let outcome = reallocate(backend.as_ref(), &mut catalog, &screens, true);
                let report = ReallocationReport { outcome, catalog };
                if replies.send(WorkerReply::Reallocated(report)).is_err() {
                    break;
                }
            }
            WorkerCommand::Exit => {
                let _ = replies.send(WorkerReply::Exited);
                break;
            }
        }
    }
    debug!("reallocation worker exiting");
}

enum AttemptError {
    DesktopDenied,
    DuplicationDenied,
    Unsupported(GrabError),
    ModeChange,
    Failed(GrabError),
}

/// Creates one session per requested screen that matches an output. A
/// mode change in progress rebuilds the catalog and retries once when
/// `allow_rebuild` is set.
pub(crate) fn reallocate(
    backend: &dyn DuplicationBackend,
    catalog: &mut OutputCatalog,
    screens: &[ScreenInfo],
    allow_rebuild: bool,
) -> WorkerOutcome {
    match try_reallocate(backend, catalog, screens) {
        Ok(allocated) => {
            for screen in unmatched_screens(screens, &allocated) {
                warn!(screen = %screen, "no output matches requested screen");
            }
            info!(
                requested = screens.len(),
                sessions = allocated.len(),
                "allocated duplication sessions"
            );
            WorkerOutcome::Allocated(allocated)
        }
        Err(AttemptError::DesktopDenied) => {
            warn!("access to the input desktop denied, a secure desktop is probably active");
            WorkerOutcome::Denied(DeniedKind::Desktop)
        }
        Err(AttemptError::DuplicationDenied) => {
            warn!("desktop duplication access denied, protected content is probably on screen");
            WorkerOutcome::Denied(DeniedKind::Duplication)
        }
        Err(AttemptError::Unsupported(err)) => WorkerOutcome::Unsupported(err),
        Err(AttemptError::ModeChange) if allow_rebuild => {
            debug!("display mode change in progress, rebuilding adapters and retrying");
            if let Err(err) = catalog.rebuild(backend) {
                return WorkerOutcome::Failed(err);
            }
            reallocate(backend, catalog, screens, false)
        }
        Err(AttemptError::ModeChange) => WorkerOutcome::Failed(GrabError::ModeChangeInProgress),
        Err(AttemptError::Failed(err)) => WorkerOutcome::Failed(err),
    }
}

/// Requested screens that did not end up with a session. Two entries on
/// one monitor with different rects count separately.
fn unmatched_screens<'a>(
    screens: &'a [ScreenInfo],
    allocated: &[AllocatedScreen],
) -> Vec<&'a ScreenInfo> {
    screens
        .iter()
        .filter(|screen| !allocated.iter().any(|a| a.screen_info == **screen))
        .collect()
}

fn try_reallocate(
    backend: &dyn DuplicationBackend,
    catalog: &OutputCatalog,
    screens: &[ScreenInfo],
) -> Result<Vec<AllocatedScreen>, AttemptError> {
    match backend.switch_to_input_desktop() {
        Ok(()) => {}
        Err(GrabError::AccessDenied) => return Err(AttemptError::DesktopDenied),
        Err(err) => return Err(AttemptError::Failed(err)),
    }

    let mut allocated = Vec::with_capacity(screens.len());
    for adapter in catalog.adapters() {
        let device = adapter.create_device().map_err(AttemptError::Failed)?;
        for output in adapter.outputs().map_err(AttemptError::Failed)? {
            let Some(monitor) = output.monitor else {
                continue;
            };
            let Some(screen) = screens.iter().find(|screen| screen.handle == monitor) else {
                continue;
            };

            let duplication = device.duplicate_output(&output).map_err(|err| match err {
                GrabError::AccessDenied => AttemptError::DuplicationDenied,
                GrabError::Unsupported(_) => AttemptError::Unsupported(err),
                GrabError::ModeChangeInProgress => AttemptError::ModeChange,
                other => AttemptError::Failed(other),
            })?;
            debug!(output = %output.name, monitor = %monitor, "created duplication session");
            allocated.push(AllocatedScreen {
                screen_info: *screen,
                rotation: output.rotation.compensation_code(),
                session: CaptureSession::new(output, duplication),
            });
        }
    }
    Ok(allocated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::OutputRotation;
    use crate::screen::ScreenRect;
    use crate::testing::{
        DesktopOutcome, DuplicateOutcome, MockBackend, MockOutput, handle, screen,
    };
    use std::time::Instant;

    fn two_outputs() -> MockBackend {
        MockBackend::new(vec![vec![MockOutput::new(1, 0), MockOutput::new(2, 1920)]])
    }

    fn run(
        backend: &MockBackend,
        worker: &mut ReallocationWorker,
        screens: Vec<ScreenInfo>,
    ) -> GrabResult<WorkerOutcome> {
        let catalog = OutputCatalog::build(backend)?;
        Ok(worker.reallocate(ReallocateJob { screens, catalog })?.outcome)
    }

    #[test]
    fn sessions_are_created_on_the_worker_thread() -> GrabResult<()> {
        let backend = two_outputs();
        let mut worker = ReallocationWorker::spawn(backend.shared())?;

        run(&backend, &mut worker, vec![screen(1, 0)])?;
        run(&backend, &mut worker, vec![screen(2, 1920)])?;

        let threads = backend.desktop_threads();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0], threads[1]);
        assert_ne!(threads[0], std::thread::current().id());
        assert!(worker.shutdown(Duration::from_secs(3)));
        Ok(())
    }

    #[test]
    fn matching_screens_get_sessions_with_rotation() -> GrabResult<()> {
        let backend = MockBackend::new(vec![vec![
            MockOutput::new(1, 0),
            MockOutput::new(2, 1920).rotated(OutputRotation::Rotate270),
        ]]);
        let mut catalog = OutputCatalog::build(&backend)?;

        let outcome = reallocate(
            &backend,
            &mut catalog,
            &[screen(2, 1920), screen(1, 0), screen(9, 3840)],
            true,
        );
        let WorkerOutcome::Allocated(allocated) = outcome else {
            panic!("expected allocation");
        };
        let summary: Vec<_> = allocated
            .iter()
            .map(|a| (a.screen_info.handle.raw(), a.rotation))
            .collect();
        assert_eq!(summary, vec![(1, 0), (2, 1)]);
        Ok(())
    }

    #[test]
    fn second_rect_on_the_same_monitor_is_unmatched() -> GrabResult<()> {
        let backend = two_outputs();
        let mut catalog = OutputCatalog::build(&backend)?;
        let cropped = ScreenInfo::new(handle(1), ScreenRect::new(0, 0, 1280, 720));
        let requested = [screen(1, 0), cropped];

        let outcome = reallocate(&backend, &mut catalog, &requested, true);
        let WorkerOutcome::Allocated(allocated) = outcome else {
            panic!("expected allocation");
        };
        assert_eq!(allocated.len(), 1);
        assert_eq!(allocated[0].screen_info, screen(1, 0));
        assert_eq!(unmatched_screens(&requested, &allocated), vec![&cropped]);
        Ok(())
    }

    #[test]
    fn denied_desktop_is_reported_without_sessions() -> GrabResult<()> {
        let backend = two_outputs();
        backend.script_desktop([DesktopOutcome::AccessDenied]);
        let mut catalog = OutputCatalog::build(&backend)?;

        let outcome = reallocate(&backend, &mut catalog, &[screen(1, 0)], true);
        assert!(matches!(outcome, WorkerOutcome::Denied(DeniedKind::Desktop)));
        assert_eq!(backend.duplications_created(), 0);
        Ok(())
    }

    #[test]
    fn other_desktop_failures_are_hard_failures() -> GrabResult<()> {
        let backend = two_outputs();
        backend.script_desktop([DesktopOutcome::Fail]);
        let mut catalog = OutputCatalog::build(&backend)?;

        let outcome = reallocate(&backend, &mut catalog, &[screen(1, 0)], true);
        assert!(matches!(outcome, WorkerOutcome::Failed(_)));
        Ok(())
    }

    #[test]
    fn denied_duplication_destroys_partial_sessions() -> GrabResult<()> {
        let backend = two_outputs();
        backend.script_duplicate(2, [DuplicateOutcome::AccessDenied]);
        let mut catalog = OutputCatalog::build(&backend)?;

        let outcome = reallocate(&backend, &mut catalog, &[screen(1, 0), screen(2, 1920)], true);
        assert!(matches!(outcome, WorkerOutcome::Denied(DeniedKind::Duplication)));
        assert_eq!(backend.duplications_created(), 1);
        assert_eq!(backend.live_duplications(), 0);
        Ok(())
    }

    #[test]
    fn unsupported_duplication_is_reported() -> GrabResult<()> {
        let backend = two_outputs();
        backend.script_duplicate(1, [DuplicateOutcome::Unsupported]);
        let mut catalog = OutputCatalog::build(&backend)?;

        let outcome = reallocate(&backend, &mut catalog, &[screen(1, 0)], true);
        assert!(matches!(outcome, WorkerOutcome::Unsupported(GrabError::Unsupported(_))));
        Ok(())
    }

    #[test]
    fn mode_change_rebuilds_catalog_and_retries_once() -> GrabResult<()> {
        let backend = two_outputs();
        backend.script_duplicate(1, [DuplicateOutcome::ModeChange]);
        let mut catalog = OutputCatalog::build(&backend)?;

        let outcome = reallocate(&backend, &mut catalog, &[screen(1, 0)], true);
        assert!(matches!(outcome, WorkerOutcome::Allocated(ref a) if a.len() == 1));
        assert_eq!(backend.adapter_enumerations(), 2);
        assert_eq!(backend.desktop_threads().len(), 2);
        Ok(())
    }

    #[test]
    fn repeated_mode_change_is_a_hard_failure() -> GrabResult<()> {
        let backend = two_outputs();
        backend.script_duplicate(
            1,
            [
                DuplicateOutcome::ModeChange,
                DuplicateOutcome::ModeChange,
                DuplicateOutcome::ModeChange,
            ],
        );
        let mut catalog = OutputCatalog::build(&backend)?;

        let outcome = reallocate(&backend, &mut catalog, &[screen(1, 0)], true);
        assert!(matches!(
            outcome,
            WorkerOutcome::Failed(GrabError::ModeChangeInProgress)
        ));
        assert_eq!(backend.adapter_enumerations(), 2);
        Ok(())
    }

    #[test]
    fn device_creation_failure_is_a_hard_failure() -> GrabResult<()> {
        let backend = two_outputs();
        backend.fail_device_creation();
        let mut catalog = OutputCatalog::build(&backend)?;

        let outcome = reallocate(&backend, &mut catalog, &[screen(1, 0)], true);
        assert!(matches!(outcome, WorkerOutcome::Failed(GrabError::Platform(_))));
        Ok(())
    }

    #[test]
    fn shutdown_is_idempotent() -> GrabResult<()> {
        let backend = two_outputs();
        let mut worker = ReallocationWorker::spawn(backend.shared())?;
        assert!(worker.shutdown(Duration::from_secs(3)));
        assert!(worker.shutdown(Duration::from_secs(3)));
        assert!(matches!(
            run(&backend, &mut worker, vec![screen(1, 0)]),
            Err(GrabError::WorkerDead)
        ));
        Ok(())
    }

    #[test]
    fn shutdown_detaches_a_busy_worker_within_the_timeout() -> GrabResult<()> {
        let backend = two_outputs();
        backend.script_desktop([DesktopOutcome::Stall(Duration::from_secs(2))]);
        let mut worker = ReallocationWorker::spawn(backend.shared())?;
        let job = ReallocateJob {
            screens: vec![screen(1, 0)],
            catalog: OutputCatalog::build(&backend)?,
        };
        worker
            .commands
            .send(WorkerCommand::Reallocate(job))
            .map_err(|_| GrabError::WorkerDead)?;

        let begin = Instant::now();
        assert!(!worker.shutdown(Duration::from_millis(200)));
        assert!(begin.elapsed() < Duration::from_millis(1500));
        Ok(())
    }
}
