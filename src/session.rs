use std::fmt;

use tracing::debug;

use crate::backend::{OutputDesc, OutputDuplication, TextureDesc};

/// Index of a capture session in the engine's session table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(usize);

impl SessionId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything needed to keep capturing one output: the duplication (which
/// owns its device, context and textures) plus the readback bookkeeping.
pub(crate) struct CaptureSession {
    pub(crate) output: OutputDesc,
    pub(crate) duplication: Box<dyn OutputDuplication>,
    pub(crate) staging: Option<TextureDesc>,
}

impl CaptureSession {
    pub(crate) fn new(output: OutputDesc, duplication: Box<dyn OutputDuplication>) -> Self {
        Self {
            output,
            duplication,
            staging: None,
        }
    }

    /// Drops the staging texture. Any buffer pointing into it must already
    /// have been cleared.
    pub(crate) fn release_staging(&mut self) {
        if self.staging.take().is_some() {
            self.duplication.release_staging();
        }
    }
}

/// Sessions addressed by [`SessionId`]. Grabbed screens hold ids, never
/// references, and the table is always cleared before it is refilled.
#[derive(Default)]
pub(crate) struct SessionTable {
    slots: Vec<Option<CaptureSession>>,
}

impl SessionTable {
    pub(crate) fn insert(&mut self, session: CaptureSession) -> SessionId {
        self.slots.push(Some(session));
        SessionId(self.slots.len() - 1)
    }

    pub(crate) fn get_mut(&mut self, id: SessionId) -> Option<&mut CaptureSession> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Destroys every session.
    pub(crate) fn clear(&mut self) {
        let live = self.len();
        for mut session in self.slots.drain(..).flatten() {
            session.release_staging();
            debug!(output = %session.output.name, "destroyed capture session");
        }
        if live > 0 {
            debug!(sessions = live, "capture sessions released");
        }
    }
}

impl Drop for SessionTable {
    fn drop(&mut self) {
        self.clear();
    }
}
