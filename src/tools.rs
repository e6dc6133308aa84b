use crate::enums::{MouseButton, ToolMode};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The fixed catalog of interaction tools a session registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tool {
    WindowLevel,
    Pan,
    Zoom,
    StackScrollMouseWheel,
    Length,
    Probe,
    #[serde(rename = "RectangleROI")]
    RectangleRoi,
    #[serde(rename = "EllipticalROI")]
    EllipticalRoi,
    #[serde(rename = "CircleROI")]
    CircleRoi,
    Bidirectional,
    Angle,
    CobbAngle,
    ArrowAnnotate,
    SegmentationDisplay,
}

impl Tool {
    pub const CATALOG: [Tool; 14] = [
        Tool::WindowLevel,
        Tool::Pan,
        Tool::Zoom,
        Tool::StackScrollMouseWheel,
        Tool::Length,
        Tool::Probe,
        Tool::RectangleRoi,
        Tool::EllipticalRoi,
        Tool::CircleRoi,
        Tool::Bidirectional,
        Tool::Angle,
        Tool::CobbAngle,
        Tool::ArrowAnnotate,
        Tool::SegmentationDisplay,
    ];

    /// Measurement and annotation tools: selectable, never the default drag.
    pub const ANNOTATIONS: [Tool; 9] = [
        Tool::Length,
        Tool::Probe,
        Tool::RectangleRoi,
        Tool::EllipticalRoi,
        Tool::CircleRoi,
        Tool::Bidirectional,
        Tool::Angle,
        Tool::CobbAngle,
        Tool::ArrowAnnotate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::WindowLevel => "WindowLevel",
            Tool::Pan => "Pan",
            Tool::Zoom => "Zoom",
            Tool::StackScrollMouseWheel => "StackScrollMouseWheel",
            Tool::Length => "Length",
            Tool::Probe => "Probe",
            Tool::RectangleRoi => "RectangleROI",
            Tool::EllipticalRoi => "EllipticalROI",
            Tool::CircleRoi => "CircleROI",
            Tool::Bidirectional => "Bidirectional",
            Tool::Angle => "Angle",
            Tool::CobbAngle => "CobbAngle",
            Tool::ArrowAnnotate => "ArrowAnnotate",
            Tool::SegmentationDisplay => "SegmentationDisplay",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub tool: Tool,
    pub mode: ToolMode,
    #[serde(default)]
    pub button: Option<MouseButton>,
}

impl ToolBinding {
    pub fn active(tool: Tool, button: Option<MouseButton>) -> Self {
        Self {
            tool,
            mode: ToolMode::Active,
            button,
        }
    }

    pub fn passive(tool: Tool) -> Self {
        Self {
            tool,
            mode: ToolMode::Passive,
            button: None,
        }
    }

    pub fn enabled(tool: Tool) -> Self {
        Self {
            tool,
            mode: ToolMode::Enabled,
            button: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("{first} and {second} are both bound to {button:?}")]
    ButtonConflict {
        button: MouseButton,
        first: Tool,
        second: Tool,
    },

    #[error("{0} is listed more than once")]
    DuplicateTool(Tool),

    #[error("{0} has a mouse button but is not active")]
    InactiveBinding(Tool),
}

/// Ordered tool configuration of one tool group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolGroupLayout {
    pub bindings: Vec<ToolBinding>,
}

impl Default for ToolGroupLayout {
    /// Window/level on left drag, zoom on right, pan on middle, stack
    /// scroll on the wheel, annotations passive and the segmentation
    /// overlay enabled.
    fn default() -> Self {
        let mut bindings = vec![
            ToolBinding::active(Tool::WindowLevel, Some(MouseButton::Primary)),
            ToolBinding::active(Tool::Zoom, Some(MouseButton::Secondary)),
            ToolBinding::active(Tool::Pan, Some(MouseButton::Auxiliary)),
            ToolBinding::active(Tool::StackScrollMouseWheel, None),
        ];
        bindings.extend(Tool::ANNOTATIONS.into_iter().map(ToolBinding::passive));
        bindings.push(ToolBinding::enabled(Tool::SegmentationDisplay));
        Self { bindings }
    }
}

impl ToolGroupLayout {
    pub fn tools(&self) -> impl Iterator<Item = Tool> + '_ {
        self.bindings.iter().map(|binding| binding.tool)
    }

    pub fn binding(&self, tool: Tool) -> Option<&ToolBinding> {
        self.bindings.iter().find(|binding| binding.tool == tool)
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        for (i, binding) in self.bindings.iter().enumerate() {
            let earlier = &self.bindings[..i];
            if earlier.iter().any(|b| b.tool == binding.tool) {
                return Err(LayoutError::DuplicateTool(binding.tool));
            }
            let Some(button) = binding.button else {
                continue;
            };
            if binding.mode != ToolMode::Active {
                return Err(LayoutError::InactiveBinding(binding.tool));
            }
            if let Some(other) = earlier.iter().find(|b| b.button == Some(button)) {
                return Err(LayoutError::ButtonConflict {
                    button,
                    first: other.tool,
                    second: binding.tool,
                });
            }
        }
        Ok(())
    }
}
