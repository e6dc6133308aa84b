//! Interfaces of the rendering and tooling collaborators a session drives.
//!
//! Implementations are expected to behave like the toolkit they wrap:
//! registering a tool twice, creating two tool groups or engines with the
//! same id, or adding a segmentation twice is an error. The session and
//! runtime never rely on that; they guard every such call themselves.

use crate::enums::MouseButton;
use crate::tools::Tool;
use crate::viewport::ViewportDescriptor;
use crate::volume::Volume;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolkitError {
    #[error("rendering runtime failed to initialize: {0}")]
    Init(String),

    #[error("{kind} `{id}` already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("tool {0} has not been registered")]
    UnregisteredTool(Tool),

    #[error("tool {0} is not part of tool group `{1}`")]
    ToolNotInGroup(Tool, String),

    #[error("{button:?} is already bound to {bound} in tool group `{group}`")]
    ButtonTaken {
        group: String,
        button: MouseButton,
        bound: Tool,
    },

    #[error("viewport `{0}` is not registered with the rendering engine")]
    UnknownViewport(String),

    #[error("segmentation `{0}` is not registered")]
    UnknownSegmentation(String),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait RenderingRuntime: Send + Sync {
    async fn init_rendering(&self) -> Result<(), ToolkitError>;
    async fn init_tools(&self) -> Result<(), ToolkitError>;
}

pub trait ToolFramework: Send + Sync {
    fn register_tool(&self, tool: Tool) -> Result<(), ToolkitError>;
    fn create_tool_group(&self, id: &str) -> Result<Arc<dyn ToolGroup>, ToolkitError>;
}

/// Maps input events to tools for every viewport attached to it.
pub trait ToolGroup: Send + Sync {
    fn id(&self) -> &str;
    fn add_tool(&self, tool: Tool) -> Result<(), ToolkitError>;
    /// `button` is `None` for tools driven by the wheel.
    fn set_tool_active(&self, tool: Tool, button: Option<MouseButton>) -> Result<(), ToolkitError>;
    fn set_tool_passive(&self, tool: Tool) -> Result<(), ToolkitError>;
    fn set_tool_enabled(&self, tool: Tool) -> Result<(), ToolkitError>;
    fn set_tool_disabled(&self, tool: Tool) -> Result<(), ToolkitError>;
    fn add_viewport(&self, viewport_id: &str, engine_id: &str) -> Result<(), ToolkitError>;
    fn remove_viewport(&self, viewport_id: &str, engine_id: &str) -> Result<(), ToolkitError>;
}

/// Handle on a volume actor created for one viewport.
pub trait VolumeActor {
    fn viewport_id(&self) -> &str;
    fn set_mapping_range(&mut self, lower: f64, upper: f64);
}

pub trait RenderingEngineFactory: Send + Sync {
    fn create_engine(&self, id: &str) -> Result<Arc<dyn RenderingEngine>, ToolkitError>;
}

pub trait RenderingEngine: Send + Sync {
    fn id(&self) -> &str;
    fn set_viewports(&self, viewports: &[ViewportDescriptor]) -> Result<(), ToolkitError>;
    /// Assigns `volume` to each viewport; `on_actor` runs once per created
    /// actor.
    fn set_volume(
        &self,
        volume: Arc<Volume>,
        viewport_ids: &[String],
        on_actor: &mut dyn FnMut(&mut dyn VolumeActor),
    ) -> Result<(), ToolkitError>;
    fn disable_viewport(&self, viewport_id: &str) -> Result<(), ToolkitError>;
    fn render(&self) -> Result<(), ToolkitError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationType {
    Labelmap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationInput {
    pub segmentation_id: String,
    pub representation: SegmentationType,
    /// Label volume the representation data points at.
    pub volume_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationRepresentationInput {
    pub segmentation_id: String,
    pub representation: SegmentationType,
}

#[async_trait]
pub trait SegmentationService: Send + Sync {
    fn add_segmentations(&self, segmentations: Vec<SegmentationInput>) -> Result<(), ToolkitError>;
    async fn add_segmentation_representations(
        &self,
        tool_group_id: &str,
        representations: Vec<SegmentationRepresentationInput>,
    ) -> Result<(), ToolkitError>;
}

/// The host UI tree viewports are mounted into.
pub trait MountHost: Send + Sync {
    fn has_mount_point(&self, id: &str) -> bool;
}

/// Every collaborator a session needs, as shared trait objects.
#[derive(Clone)]
pub struct Toolkit {
    pub runtime: Arc<dyn RenderingRuntime>,
    pub tools: Arc<dyn ToolFramework>,
    pub engines: Arc<dyn RenderingEngineFactory>,
    pub segmentation: Arc<dyn SegmentationService>,
    pub host: Arc<dyn MountHost>,
}

impl Toolkit {
    /// Uses one object for every collaborator role.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: RenderingRuntime
            + ToolFramework
            + RenderingEngineFactory
            + SegmentationService
            + MountHost
            + 'static,
    {
        Self {
            runtime: backend.clone(),
            tools: backend.clone(),
            engines: backend.clone(),
            segmentation: backend.clone(),
            host: backend,
        }
    }
}
