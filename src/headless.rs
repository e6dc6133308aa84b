//! In-process toolkit that renders centre slices on the CPU.
//!
//! It is as strict as a real toolkit about duplicates, so it doubles as a
//! check that sessions never initialize, register or construct anything
//! twice. Every call is recorded and can be inspected afterwards.

use crate::backend::{
    MountHost, RenderingEngine, RenderingEngineFactory, RenderingRuntime, SegmentationInput,
    SegmentationRepresentationInput, SegmentationService, ToolFramework, ToolGroup, ToolkitError,
    VolumeActor,
};
use crate::enums::{MouseButton, ToolMode};
use crate::tools::Tool;
use crate::viewport::ViewportDescriptor;
use crate::volume::Volume;
use crate::window_level::VoiRange;

use async_trait::async_trait;
use image::GrayImage;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Mapping used for viewports whose actor never received a range.
const FULL_RANGE: VoiRange = VoiRange {
    lower: 0.0,
    upper: u16::MAX as f64,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct BackendState {
    rendering_initialized: bool,
    tools_initialized: bool,
    register_calls: usize,
    tool_groups: HashMap<String, Arc<HeadlessToolGroup>>,
    engines: HashMap<String, Arc<HeadlessEngine>>,
    segmentations: Vec<SegmentationInput>,
    representations: Vec<(String, SegmentationRepresentationInput)>,
}

#[derive(Default)]
pub struct HeadlessBackend {
    state: Mutex<BackendState>,
    registered: Arc<Mutex<HashSet<Tool>>>,
    mounts: Mutex<HashSet<String>>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose host already contains `mounts`.
    pub fn with_mounts<I, S>(mounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        for mount in mounts {
            backend.add_mount_point(mount);
        }
        backend
    }

    pub fn add_mount_point(&self, id: impl Into<String>) {
        lock(&self.mounts).insert(id.into());
    }

    pub fn remove_mount_point(&self, id: &str) -> bool {
        lock(&self.mounts).remove(id)
    }

    pub fn is_initialized(&self) -> bool {
        let state = lock(&self.state);
        state.rendering_initialized && state.tools_initialized
    }

    /// Number of `register_tool` calls, successful or not.
    pub fn register_calls(&self) -> usize {
        lock(&self.state).register_calls
    }

    pub fn registered_tools(&self) -> HashSet<Tool> {
        lock(&self.registered).clone()
    }

    pub fn tool_groups_created(&self) -> usize {
        lock(&self.state).tool_groups.len()
    }

    pub fn engines_created(&self) -> usize {
        lock(&self.state).engines.len()
    }

    pub fn tool_group(&self, id: &str) -> Option<Arc<HeadlessToolGroup>> {
        lock(&self.state).tool_groups.get(id).cloned()
    }

    pub fn engine(&self, id: &str) -> Option<Arc<HeadlessEngine>> {
        lock(&self.state).engines.get(id).cloned()
    }

    pub fn segmentations(&self) -> Vec<SegmentationInput> {
        lock(&self.state).segmentations.clone()
    }

    /// `(tool group id, representation)` pairs in attachment order.
    pub fn representations(&self) -> Vec<(String, SegmentationRepresentationInput)> {
        lock(&self.state).representations.clone()
    }
}

#[async_trait]
impl RenderingRuntime for HeadlessBackend {
    async fn init_rendering(&self) -> Result<(), ToolkitError> {
        let mut state = lock(&self.state);
        if state.rendering_initialized {
            return Err(ToolkitError::AlreadyExists {
                kind: "rendering runtime",
                id: "headless".to_owned(),
            });
        }
        state.rendering_initialized = true;
        debug!("headless rendering runtime initialized");
        Ok(())
    }

    async fn init_tools(&self) -> Result<(), ToolkitError> {
        let mut state = lock(&self.state);
        if state.tools_initialized {
            return Err(ToolkitError::AlreadyExists {
                kind: "tool runtime",
                id: "headless".to_owned(),
            });
        }
        state.tools_initialized = true;
        Ok(())
    }
}

impl ToolFramework for HeadlessBackend {
    fn register_tool(&self, tool: Tool) -> Result<(), ToolkitError> {
        lock(&self.state).register_calls += 1;
        if !lock(&self.registered).insert(tool) {
            return Err(ToolkitError::AlreadyExists {
                kind: "tool",
                id: tool.name().to_owned(),
            });
        }
        trace!(%tool, "tool registered");
        Ok(())
    }

    fn create_tool_group(&self, id: &str) -> Result<Arc<dyn ToolGroup>, ToolkitError> {
        let mut state = lock(&self.state);
        if state.tool_groups.contains_key(id) {
            return Err(ToolkitError::AlreadyExists {
                kind: "tool group",
                id: id.to_owned(),
            });
        }
        let group = Arc::new(HeadlessToolGroup::new(id, self.registered.clone()));
        state.tool_groups.insert(id.to_owned(), group.clone());
        Ok(group)
    }
}

impl RenderingEngineFactory for HeadlessBackend {
    fn create_engine(&self, id: &str) -> Result<Arc<dyn RenderingEngine>, ToolkitError> {
        let mut state = lock(&self.state);
        if state.engines.contains_key(id) {
            return Err(ToolkitError::AlreadyExists {
                kind: "rendering engine",
                id: id.to_owned(),
            });
        }
        let engine = Arc::new(HeadlessEngine::new(id));
        state.engines.insert(id.to_owned(), engine.clone());
        Ok(engine)
    }
}

#[async_trait]
impl SegmentationService for HeadlessBackend {
    fn add_segmentations(&self, segmentations: Vec<SegmentationInput>) -> Result<(), ToolkitError> {
        let mut state = lock(&self.state);
        for segmentation in segmentations {
            if state
                .segmentations
                .iter()
                .any(|s| s.segmentation_id == segmentation.segmentation_id)
            {
                return Err(ToolkitError::AlreadyExists {
                    kind: "segmentation",
                    id: segmentation.segmentation_id,
                });
            }
            state.segmentations.push(segmentation);
        }
        Ok(())
    }

    async fn add_segmentation_representations(
        &self,
        tool_group_id: &str,
        representations: Vec<SegmentationRepresentationInput>,
    ) -> Result<(), ToolkitError> {
        let mut state = lock(&self.state);
        if !state.tool_groups.contains_key(tool_group_id) {
            return Err(ToolkitError::Other(format!(
                "tool group `{tool_group_id}` does not exist"
            )));
        }
        for representation in representations {
            if !state
                .segmentations
                .iter()
                .any(|s| s.segmentation_id == representation.segmentation_id)
            {
                return Err(ToolkitError::UnknownSegmentation(
                    representation.segmentation_id,
                ));
            }
            let duplicate = state.representations.iter().any(|(group, existing)| {
                group == tool_group_id && existing.segmentation_id == representation.segmentation_id
            });
            if duplicate {
                return Err(ToolkitError::AlreadyExists {
                    kind: "segmentation representation",
                    id: representation.segmentation_id,
                });
            }
            state
                .representations
                .push((tool_group_id.to_owned(), representation));
        }
        Ok(())
    }
}

impl MountHost for HeadlessBackend {
    fn has_mount_point(&self, id: &str) -> bool {
        lock(&self.mounts).contains(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolState {
    pub mode: ToolMode,
    pub button: Option<MouseButton>,
}

#[derive(Default)]
struct GroupState {
    tools: Vec<(Tool, ToolState)>,
    viewports: Vec<(String, String)>,
}

pub struct HeadlessToolGroup {
    id: String,
    registered: Arc<Mutex<HashSet<Tool>>>,
    state: Mutex<GroupState>,
}

impl HeadlessToolGroup {
    fn new(id: &str, registered: Arc<Mutex<HashSet<Tool>>>) -> Self {
        Self {
            id: id.to_owned(),
            registered,
            state: Mutex::new(GroupState::default()),
        }
    }

    pub fn tool_state(&self, tool: Tool) -> Option<ToolState> {
        lock(&self.state)
            .tools
            .iter()
            .find(|(t, _)| *t == tool)
            .map(|(_, state)| *state)
    }

    pub fn tools(&self) -> Vec<Tool> {
        lock(&self.state).tools.iter().map(|(tool, _)| *tool).collect()
    }

    /// `(viewport id, engine id)` pairs currently attached.
    pub fn viewports(&self) -> Vec<(String, String)> {
        lock(&self.state).viewports.clone()
    }

    fn set_mode(
        &self,
        tool: Tool,
        mode: ToolMode,
        button: Option<MouseButton>,
    ) -> Result<(), ToolkitError> {
        let mut state = lock(&self.state);
        if let Some(button) = button {
            let taken = state.tools.iter().find(|(t, s)| {
                *t != tool && s.mode == ToolMode::Active && s.button == Some(button)
            });
            if let Some((bound, _)) = taken {
                return Err(ToolkitError::ButtonTaken {
                    group: self.id.clone(),
                    button,
                    bound: *bound,
                });
            }
        }
        let entry = state
            .tools
            .iter_mut()
            .find(|(t, _)| *t == tool)
            .ok_or_else(|| ToolkitError::ToolNotInGroup(tool, self.id.clone()))?;
        entry.1 = ToolState { mode, button };
        Ok(())
    }
}

impl ToolGroup for HeadlessToolGroup {
    fn id(&self) -> &str {
        &self.id
    }

    fn add_tool(&self, tool: Tool) -> Result<(), ToolkitError> {
        if !lock(&self.registered).contains(&tool) {
            return Err(ToolkitError::UnregisteredTool(tool));
        }
        let mut state = lock(&self.state);
        if state.tools.iter().any(|(t, _)| *t == tool) {
            return Err(ToolkitError::AlreadyExists {
                kind: "tool in group",
                id: tool.name().to_owned(),
            });
        }
        state.tools.push((
            tool,
            ToolState {
                mode: ToolMode::Disabled,
                button: None,
            },
        ));
        Ok(())
    }

    fn set_tool_active(&self, tool: Tool, button: Option<MouseButton>) -> Result<(), ToolkitError> {
        self.set_mode(tool, ToolMode::Active, button)
    }

    fn set_tool_passive(&self, tool: Tool) -> Result<(), ToolkitError> {
        self.set_mode(tool, ToolMode::Passive, None)
    }

    fn set_tool_enabled(&self, tool: Tool) -> Result<(), ToolkitError> {
        self.set_mode(tool, ToolMode::Enabled, None)
    }

    fn set_tool_disabled(&self, tool: Tool) -> Result<(), ToolkitError> {
        self.set_mode(tool, ToolMode::Disabled, None)
    }

    fn add_viewport(&self, viewport_id: &str, engine_id: &str) -> Result<(), ToolkitError> {
        let mut state = lock(&self.state);
        let pair = (viewport_id.to_owned(), engine_id.to_owned());
        if !state.viewports.contains(&pair) {
            state.viewports.push(pair);
        }
        Ok(())
    }

    fn remove_viewport(&self, viewport_id: &str, engine_id: &str) -> Result<(), ToolkitError> {
        lock(&self.state)
            .viewports
            .retain(|(v, e)| !(v == viewport_id && e == engine_id));
        Ok(())
    }
}

struct HeadlessViewport {
    descriptor: ViewportDescriptor,
    enabled: bool,
    volume: Option<Arc<Volume>>,
    range: Option<VoiRange>,
    actor_callbacks: usize,
}

#[derive(Default)]
struct EngineState {
    viewports: Vec<HeadlessViewport>,
    renders: usize,
    frames: HashMap<String, GrayImage>,
}

pub struct HeadlessEngine {
    id: String,
    state: Mutex<EngineState>,
}

struct HeadlessActor {
    viewport_id: String,
    range: Option<VoiRange>,
}

impl VolumeActor for HeadlessActor {
    fn viewport_id(&self) -> &str {
        &self.viewport_id
    }

    fn set_mapping_range(&mut self, lower: f64, upper: f64) {
        self.range = Some(VoiRange { lower, upper });
    }
}

impl HeadlessEngine {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn render_count(&self) -> usize {
        lock(&self.state).renders
    }

    /// Ids of the enabled viewports, in registration order.
    pub fn viewport_ids(&self) -> Vec<String> {
        lock(&self.state)
            .viewports
            .iter()
            .filter(|viewport| viewport.enabled)
            .map(|viewport| viewport.descriptor.id.clone())
            .collect()
    }

    pub fn descriptor(&self, viewport_id: &str) -> Option<ViewportDescriptor> {
        lock(&self.state)
            .viewports
            .iter()
            .find(|viewport| viewport.descriptor.id == viewport_id)
            .map(|viewport| viewport.descriptor.clone())
    }

    pub fn mapping_range(&self, viewport_id: &str) -> Option<VoiRange> {
        lock(&self.state)
            .viewports
            .iter()
            .find(|viewport| viewport.descriptor.id == viewport_id)
            .and_then(|viewport| viewport.range)
    }

    /// How many times the volume-actor callback ran for the viewport.
    pub fn actor_callbacks(&self, viewport_id: &str) -> usize {
        lock(&self.state)
            .viewports
            .iter()
            .find(|viewport| viewport.descriptor.id == viewport_id)
            .map_or(0, |viewport| viewport.actor_callbacks)
    }

    pub fn volume(&self, viewport_id: &str) -> Option<Arc<Volume>> {
        lock(&self.state)
            .viewports
            .iter()
            .find(|viewport| viewport.descriptor.id == viewport_id)
            .and_then(|viewport| viewport.volume.clone())
    }

    /// The image produced for the viewport by the last render.
    pub fn frame(&self, viewport_id: &str) -> Option<GrayImage> {
        lock(&self.state).frames.get(viewport_id).cloned()
    }
}

impl RenderingEngine for HeadlessEngine {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_viewports(&self, viewports: &[ViewportDescriptor]) -> Result<(), ToolkitError> {
        let mut state = lock(&self.state);
        for descriptor in viewports {
            state
                .viewports
                .retain(|viewport| viewport.descriptor.id != descriptor.id);
            state.frames.remove(&descriptor.id);
            state.viewports.push(HeadlessViewport {
                descriptor: descriptor.clone(),
                enabled: true,
                volume: None,
                range: None,
                actor_callbacks: 0,
            });
        }
        Ok(())
    }

    fn set_volume(
        &self,
        volume: Arc<Volume>,
        viewport_ids: &[String],
        on_actor: &mut dyn FnMut(&mut dyn VolumeActor),
    ) -> Result<(), ToolkitError> {
        let mut state = lock(&self.state);
        for viewport_id in viewport_ids {
            let viewport = state
                .viewports
                .iter_mut()
                .find(|viewport| viewport.enabled && viewport.descriptor.id == *viewport_id)
                .ok_or_else(|| ToolkitError::UnknownViewport(viewport_id.clone()))?;
            let mut actor = HeadlessActor {
                viewport_id: viewport_id.clone(),
                range: None,
            };
            on_actor(&mut actor);
            viewport.volume = Some(volume.clone());
            viewport.range = actor.range;
            viewport.actor_callbacks += 1;
        }
        Ok(())
    }

    fn disable_viewport(&self, viewport_id: &str) -> Result<(), ToolkitError> {
        let mut state = lock(&self.state);
        let viewport = state
            .viewports
            .iter_mut()
            .find(|viewport| viewport.descriptor.id == viewport_id)
            .ok_or_else(|| ToolkitError::UnknownViewport(viewport_id.to_owned()))?;
        viewport.enabled = false;
        state.frames.remove(viewport_id);
        Ok(())
    }

    fn render(&self) -> Result<(), ToolkitError> {
        let mut state = lock(&self.state);
        let frames: Vec<(String, GrayImage)> = state
            .viewports
            .iter()
            .filter(|viewport| viewport.enabled)
            .filter_map(|viewport| {
                let volume = viewport.volume.as_ref()?;
                let range = viewport.range.unwrap_or(FULL_RANGE);
                let image = volume.center_image(viewport.descriptor.orientation, range)?;
                Some((viewport.descriptor.id.clone(), image))
            })
            .collect();
        debug!(engine = %self.id, frames = frames.len(), "headless render");
        state.frames.extend(frames);
        state.renders += 1;
        Ok(())
    }
}
