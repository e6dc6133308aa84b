use serde::{Deserialize, Serialize};

/// Soft-tissue CT preset.
pub const CT_WINDOW_CENTER: f64 = 40.0;
pub const CT_WINDOW_WIDTH: f64 = 400.0;

/// A window/level (VOI) setting expressed as center and width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowLevel {
    pub center: f64,
    pub width: f64,
}

/// Value range a volume actor's transfer function is mapped onto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiRange {
    pub lower: f64,
    pub upper: f64,
}

impl Default for WindowLevel {
    fn default() -> Self {
        Self::new(CT_WINDOW_CENTER, CT_WINDOW_WIDTH)
    }
}

impl WindowLevel {
    pub fn new(center: f64, width: f64) -> Self {
        Self { center, width }
    }

    /// `[center - width / 2, center + width / 2]`
    pub fn range(&self) -> VoiRange {
        let half = self.width / 2.0;
        VoiRange {
            lower: self.center - half,
            upper: self.center + half,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.center.is_finite() && self.width.is_finite() && self.width > 0.0
    }
}

impl VoiRange {
    /// Map a raw voxel value into 8-bit display space.
    #[inline]
    pub fn apply(&self, value: f64) -> u8 {
        if value <= self.lower {
            return 0;
        }
        if value >= self.upper {
            return 255;
        }
        (((value - self.lower) / (self.upper - self.lower)) * 255.0).round() as u8
    }
}
