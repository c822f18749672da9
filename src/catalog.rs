use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::backend::{DuplicationBackend, GraphicsAdapter, OutputDesc};
use crate::error::GrabResult;
use crate::frame::OutputRotation;
use crate::screen::{MonitorHandle, ScreenInfo};
use crate::widget::MonitorLocator;

/// An enumerated output with a resolved monitor handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Index into [`OutputCatalog::adapters`].
    pub adapter: usize,
    pub monitor: MonitorHandle,
    pub output: OutputDesc,
}

impl CatalogEntry {
    pub fn screen_info(&self) -> ScreenInfo {
        ScreenInfo::new(self.monitor, self.output.rect)
    }
}

/// Graphics adapters known to the engine, enumerated once and rebuilt when
/// the display topology is found to have changed.
pub struct OutputCatalog {
    adapters: Vec<Arc<dyn GraphicsAdapter>>,
}

impl OutputCatalog {
    pub fn build(backend: &dyn DuplicationBackend) -> GrabResult<Self> {
        let adapters = backend.enumerate_adapters()?;
        for adapter in &adapters {
            info!(adapter = %adapter.description(), "found graphics adapter");
        }
        Ok(Self { adapters })
    }

    /// Drops every adapter and enumerates them again.
    pub fn rebuild(&mut self, backend: &dyn DuplicationBackend) -> GrabResult<()> {
        self.adapters.clear();
        *self = Self::build(backend)?;
        Ok(())
    }

    pub fn adapters(&self) -> &[Arc<dyn GraphicsAdapter>] {
        &self.adapters
    }

    /// Enumerates every output of every adapter in order.
    ///
    /// An output without a monitor handle means a topology change is being
    /// applied: the catalog is rebuilt once and enumeration starts over. A
    /// handle still missing after that is logged and the output skipped.
    pub fn enumerate_outputs(
        &mut self,
        backend: &dyn DuplicationBackend,
    ) -> GrabResult<Vec<CatalogEntry>> {
        self.enumerate_outputs_inner(backend, false)
    }

    fn enumerate_outputs_inner(
        &mut self,
        backend: &dyn DuplicationBackend,
        no_rebuild: bool,
    ) -> GrabResult<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        let adapters = self.adapters.clone();
        for (adapter_idx, adapter) in adapters.iter().enumerate() {
            for output in adapter.outputs()? {
                let Some(monitor) = output.monitor else {
                    if no_rebuild {
                        warn!(
                            output = %output.name,
                            "output still has no monitor handle after rebuilding adapters, skipping"
                        );
                        continue;
                    }
                    warn!(output = %output.name, "output has no monitor handle, rebuilding adapters");
                    self.rebuild(backend)?;
                    return self.enumerate_outputs_inner(backend, true);
                };
                entries.push(CatalogEntry {
                    adapter: adapter_idx,
                    monitor,
                    output,
                });
            }
        }
        Ok(entries)
    }

    /// Screens whose monitor hosts at least one of `widgets`, in
    /// enumeration order.
    pub fn screens_with_widgets<W: MonitorLocator>(
        &mut self,
        backend: &dyn DuplicationBackend,
        widgets: &[W],
    ) -> GrabResult<Vec<ScreenInfo>> {
        let widget_monitors: Vec<MonitorHandle> =
            widgets.iter().filter_map(MonitorLocator::monitor).collect();
        Ok(self
            .enumerate_outputs(backend)?
            .into_iter()
            .filter(|entry| widget_monitors.contains(&entry.monitor))
            .map(|entry| entry.screen_info())
            .collect())
    }

    /// Output rotation per monitor, from the catalog's last enumeration.
    pub fn rotations(
        &mut self,
        backend: &dyn DuplicationBackend,
    ) -> GrabResult<FxHashMap<MonitorHandle, OutputRotation>> {
        Ok(self
            .enumerate_outputs(backend)?
            .into_iter()
            .map(|entry| (entry.monitor, entry.output.rotation))
            .collect())
    }
}
