//! Scriptable in-memory implementation of the capture backend traits.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::backend::{
    CaptureDevice, DuplicationBackend, FrameInfo, GraphicsAdapter, OutputDesc, OutputDuplication,
    TextureDesc,
};
use crate::error::{GrabError, GrabResult};
use crate::frame::{MappedSurface, OutputRotation, SurfaceFormat};
use crate::screen::{MonitorHandle, ScreenInfo, ScreenRect};

pub(crate) fn handle(raw: isize) -> MonitorHandle {
    MonitorHandle::from_raw(raw).unwrap()
}

/// A 1920x1080 screen at `left` on the top row of the desktop.
pub(crate) fn screen(raw: isize, left: i32) -> ScreenInfo {
    ScreenInfo::new(handle(raw), ScreenRect::new(left, 0, 1920, 1080))
}

#[derive(Clone, Debug)]
pub(crate) struct MockOutput {
    pub raw_monitor: isize,
    pub rect: ScreenRect,
    pub rotation: OutputRotation,
}

impl MockOutput {
    pub(crate) fn new(raw_monitor: isize, left: i32) -> Self {
        Self {
            raw_monitor,
            rect: ScreenRect::new(left, 0, 1920, 1080),
            rotation: OutputRotation::Identity,
        }
    }

    pub(crate) fn null_monitor() -> Self {
        Self::new(0, 0)
    }

    pub(crate) fn rotated(mut self, rotation: OutputRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub(crate) fn sized(mut self, width: u32, height: u32) -> Self {
        self.rect.width = width;
        self.rect.height = height;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DesktopOutcome {
    Ok,
    AccessDenied,
    Fail,
    /// Panics on the calling thread after releasing the mock state.
    Panic,
    /// Blocks for the given time, then succeeds.
    Stall(Duration),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DuplicateOutcome {
    Ok,
    AccessDenied,
    Unsupported,
    ModeChange,
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MockFrame {
    Timeout,
    AccessLost,
    /// Acquired, but nothing was presented since the previous frame.
    NotPresented,
    Frame {
        width: u32,
        height: u32,
        format: SurfaceFormat,
    },
    Fail,
}

impl MockFrame {
    pub(crate) fn bgra(width: u32, height: u32) -> Self {
        Self::Frame {
            width,
            height,
            format: SurfaceFormat::B8G8R8A8Unorm,
        }
    }
}

#[derive(Default)]
struct MockState {
    generations: Vec<Vec<Vec<MockOutput>>>,
    adapter_enumerations: usize,
    fail_enumeration: bool,
    fail_device: bool,
    desktop: VecDeque<DesktopOutcome>,
    desktop_threads: Vec<ThreadId>,
    duplicate: FxHashMap<isize, VecDeque<DuplicateOutcome>>,
    frames: FxHashMap<isize, VecDeque<MockFrame>>,
    duplications_created: usize,
    live_duplications: usize,
    ops: Vec<String>,
}

/// Cloning shares the script and the recorders.
#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// One adapter per inner list; every enumeration sees the same layout.
    pub(crate) fn new(adapters: Vec<Vec<MockOutput>>) -> Self {
        Self::with_generations(vec![adapters])
    }

    /// Each adapter enumeration advances to the next layout, repeating the
    /// last one.
    pub(crate) fn with_generations(generations: Vec<Vec<Vec<MockOutput>>>) -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().generations = generations;
        backend
    }

    pub(crate) fn shared(&self) -> Arc<dyn DuplicationBackend> {
        Arc::new(self.clone())
    }

    pub(crate) fn fail_enumeration(&self) {
        self.state.lock().unwrap().fail_enumeration = true;
    }

    pub(crate) fn fail_device_creation(&self) {
        self.state.lock().unwrap().fail_device = true;
    }

    pub(crate) fn script_desktop(&self, outcomes: impl IntoIterator<Item = DesktopOutcome>) {
        self.state.lock().unwrap().desktop.extend(outcomes);
    }

    pub(crate) fn script_duplicate(
        &self,
        raw_monitor: isize,
        outcomes: impl IntoIterator<Item = DuplicateOutcome>,
    ) {
        self.state
            .lock()
            .unwrap()
            .duplicate
            .entry(raw_monitor)
            .or_default()
            .extend(outcomes);
    }

    pub(crate) fn script_frames(&self, raw_monitor: isize, frames: impl IntoIterator<Item = MockFrame>) {
        self.state
            .lock()
            .unwrap()
            .frames
            .entry(raw_monitor)
            .or_default()
            .extend(frames);
    }

    pub(crate) fn adapter_enumerations(&self) -> usize {
        self.state.lock().unwrap().adapter_enumerations
    }

    pub(crate) fn desktop_threads(&self) -> Vec<ThreadId> {
        self.state.lock().unwrap().desktop_threads.clone()
    }

    pub(crate) fn duplications_created(&self) -> usize {
        self.state.lock().unwrap().duplications_created
    }

    pub(crate) fn live_duplications(&self) -> usize {
        self.state.lock().unwrap().live_duplications
    }

    /// Recorded duplication calls for one monitor, without the monitor prefix.
    pub(crate) fn ops_for(&self, raw_monitor: isize) -> Vec<String> {
        let prefix = format!("{raw_monitor}:");
        self.state
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter_map(|op| op.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub(crate) fn clear_ops(&self) {
        self.state.lock().unwrap().ops.clear();
    }
}

impl DuplicationBackend for MockBackend {
    fn enumerate_adapters(&self) -> GrabResult<Vec<Arc<dyn GraphicsAdapter>>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_enumeration {
            return Err(GrabError::Platform(anyhow::anyhow!("CreateDXGIFactory1 failed")));
        }
        let generation = state
            .adapter_enumerations
            .min(state.generations.len().saturating_sub(1));
        state.adapter_enumerations += 1;
        let layout = state.generations.get(generation).cloned().unwrap_or_default();
        Ok(layout
            .into_iter()
            .enumerate()
            .map(|(id, outputs)| {
                Arc::new(MockAdapter {
                    id,
                    outputs,
                    state: Arc::clone(&self.state),
                }) as Arc<dyn GraphicsAdapter>
            })
            .collect())
    }

    fn switch_to_input_desktop(&self) -> GrabResult<()> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.desktop_threads.push(thread::current().id());
            state.desktop.pop_front().unwrap_or(DesktopOutcome::Ok)
        };
        match outcome {
            DesktopOutcome::Ok => Ok(()),
            DesktopOutcome::AccessDenied => Err(GrabError::AccessDenied),
            DesktopOutcome::Fail => Err(GrabError::Platform(anyhow::anyhow!(
                "OpenInputDesktop failed"
            ))),
            DesktopOutcome::Panic => panic!("desktop switch crashed"),
            DesktopOutcome::Stall(duration) => {
                thread::sleep(duration);
                Ok(())
            }
        }
    }
}

struct MockAdapter {
    id: usize,
    outputs: Vec<MockOutput>,
    state: Arc<Mutex<MockState>>,
}

impl GraphicsAdapter for MockAdapter {
    fn description(&self) -> String {
        format!("Mock Adapter {}", self.id)
    }

    fn outputs(&self) -> GrabResult<Vec<OutputDesc>> {
        Ok(self
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| OutputDesc {
                index: index as u32,
                name: format!(r"\\.\DISPLAY{}", index + 1),
                monitor: MonitorHandle::from_raw(output.raw_monitor),
                rect: output.rect,
                rotation: output.rotation,
            })
            .collect())
    }

    fn create_device(&self) -> GrabResult<Box<dyn CaptureDevice>> {
        if self.state.lock().unwrap().fail_device {
            return Err(GrabError::Platform(anyhow::anyhow!("D3D11CreateDevice failed")));
        }
        Ok(Box::new(MockDevice {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl CaptureDevice for MockDevice {
    fn duplicate_output(&self, output: &OutputDesc) -> GrabResult<Box<dyn OutputDuplication>> {
        let raw_monitor = output.monitor.map_or(0, |monitor| monitor.raw());
        let mut state = self.state.lock().unwrap();
        let outcome = state
            .duplicate
            .get_mut(&raw_monitor)
            .and_then(VecDeque::pop_front)
            .unwrap_or(DuplicateOutcome::Ok);
        match outcome {
            DuplicateOutcome::Ok => {
                state.duplications_created += 1;
                state.live_duplications += 1;
                Ok(Box::new(MockDuplication {
                    raw_monitor,
                    state: Arc::clone(&self.state),
                    presents: 0,
                    current: None,
                    staging: None,
                    mip_chain: None,
                }))
            }
            DuplicateOutcome::AccessDenied => Err(GrabError::AccessDenied),
            DuplicateOutcome::Unsupported => Err(GrabError::Unsupported("E_NOTIMPL".into())),
            DuplicateOutcome::ModeChange => Err(GrabError::ModeChangeInProgress),
            DuplicateOutcome::Fail => Err(GrabError::Platform(anyhow::anyhow!(
                "DuplicateOutput failed"
            ))),
        }
    }
}

struct MockStaging {
    desc: TextureDesc,
    row_pitch: usize,
    bytes: Vec<u8>,
}

struct MockDuplication {
    raw_monitor: isize,
    state: Arc<Mutex<MockState>>,
    presents: u8,
    current: Option<FrameInfo>,
    staging: Option<MockStaging>,
    mip_chain: Option<(TextureDesc, u32)>,
}

impl MockDuplication {
    fn record(&self, op: impl Into<String>) {
        let op = format!("{}:{}", self.raw_monitor, op.into());
        self.state.lock().unwrap().ops.push(op);
    }

    fn require_frame(&self) -> GrabResult<FrameInfo> {
        self.current
            .ok_or_else(|| GrabError::Platform(anyhow::anyhow!("no frame acquired")))
    }

    fn fill_staging(&mut self) -> GrabResult<()> {
        let fill = self.presents;
        let staging = self
            .staging
            .as_mut()
            .ok_or_else(|| GrabError::Platform(anyhow::anyhow!("no staging texture")))?;
        staging.bytes.fill(fill);
        Ok(())
    }
}

impl OutputDuplication for MockDuplication {
    fn acquire_next_frame(&mut self, _timeout_ms: u32) -> GrabResult<FrameInfo> {
        self.record("acquire");
        if self.current.is_some() {
            return Err(GrabError::AccessLost);
        }
        let next = self
            .state
            .lock()
            .unwrap()
            .frames
            .get_mut(&self.raw_monitor)
            .and_then(VecDeque::pop_front)
            .unwrap_or(MockFrame::Timeout);
        let info = match next {
            MockFrame::Timeout => return Err(GrabError::Timeout),
            MockFrame::AccessLost => return Err(GrabError::AccessLost),
            MockFrame::Fail => {
                return Err(GrabError::Platform(anyhow::anyhow!("AcquireNextFrame failed")));
            }
            MockFrame::NotPresented => FrameInfo {
                last_present_time: 0,
                texture: TextureDesc {
                    width: 1920,
                    height: 1080,
                    format: SurfaceFormat::B8G8R8A8Unorm,
                },
            },
            MockFrame::Frame {
                width,
                height,
                format,
            } => {
                self.presents = self.presents.wrapping_add(1);
                FrameInfo {
                    last_present_time: i64::from(self.presents),
                    texture: TextureDesc {
                        width,
                        height,
                        format,
                    },
                }
            }
        };
        self.current = Some(info);
        Ok(info)
    }

    fn release_frame(&mut self) -> GrabResult<()> {
        self.record("release");
        self.current = None;
        Ok(())
    }

    fn ensure_staging_texture(&mut self, desc: TextureDesc) -> GrabResult<()> {
        if self.staging.as_ref().is_some_and(|s| s.desc == desc) {
            self.record("reuse_staging");
            return Ok(());
        }
        self.record(format!("create_staging {}x{}", desc.width, desc.height));
        let row_pitch = (desc.width as usize * 4).next_multiple_of(64);
        self.staging = Some(MockStaging {
            desc,
            row_pitch,
            bytes: vec![0xEE; row_pitch * desc.height as usize],
        });
        Ok(())
    }

    fn ensure_mip_chain(&mut self, desc: TextureDesc, mip_levels: u32) -> GrabResult<()> {
        if self.mip_chain == Some((desc, mip_levels)) {
            self.record("reuse_mip_chain");
            return Ok(());
        }
        self.record(format!(
            "create_mip_chain {}x{} levels={mip_levels}",
            desc.width, desc.height
        ));
        self.mip_chain = Some((desc, mip_levels));
        Ok(())
    }

    fn copy_frame_to_mip_chain(&mut self) -> GrabResult<()> {
        self.require_frame()?;
        self.record("copy_frame_to_mip_chain");
        Ok(())
    }

    fn generate_mips(&mut self) -> GrabResult<()> {
        self.record("generate_mips");
        Ok(())
    }

    fn copy_mip_to_staging(&mut self, mip_level: u32) -> GrabResult<()> {
        self.require_frame()?;
        self.record(format!("copy_mip_to_staging {mip_level}"));
        self.fill_staging()
    }

    fn copy_frame_to_staging(&mut self) -> GrabResult<()> {
        self.require_frame()?;
        self.record("copy_frame_to_staging");
        self.fill_staging()
    }

    fn map_staging(&mut self) -> GrabResult<MappedSurface> {
        self.record("map");
        let staging = self
            .staging
            .as_mut()
            .ok_or_else(|| GrabError::Platform(anyhow::anyhow!("no staging texture")))?;
        let data = NonNull::new(staging.bytes.as_mut_ptr())
            .ok_or_else(|| GrabError::Platform(anyhow::anyhow!("empty staging texture")))?;
        Ok(MappedSurface {
            data,
            row_pitch: staging.row_pitch,
        })
    }

    fn release_staging(&mut self) {
        self.record("release_staging");
        self.staging = None;
    }
}

impl Drop for MockDuplication {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.live_duplications -= 1;
        }
    }
}
