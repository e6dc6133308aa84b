use crate::enums::{Orientation, ViewportType};

use serde::{Deserialize, Serialize};

/// One viewport of a session, bound to a mount point in the host UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportDescriptor {
    pub id: String,
    pub orientation: Orientation,
    /// Id of the host container the viewport is drawn into.
    pub mount: String,
    #[serde(default, rename = "type")]
    pub viewport_type: ViewportType,
}

impl ViewportDescriptor {
    pub fn new(id: impl Into<String>, orientation: Orientation, mount: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            orientation,
            mount: mount.into(),
            viewport_type: ViewportType::Orthographic,
        }
    }

    /// The axial/sagittal/coronal triple, e.g. `CT_NIFTI_AXIAL`, with
    /// mount ids equal to the viewport ids.
    pub fn orthogonal(prefix: &str) -> Vec<ViewportDescriptor> {
        Orientation::ALL
            .iter()
            .map(|orientation| {
                let id = format!("{prefix}_{orientation}");
                ViewportDescriptor::new(id.clone(), *orientation, id)
            })
            .collect()
    }
}

/// Returns the first id that occurs more than once.
pub fn find_duplicate_id(viewports: &[ViewportDescriptor]) -> Option<&str> {
    viewports.iter().enumerate().find_map(|(i, viewport)| {
        viewports[..i]
            .iter()
            .any(|earlier| earlier.id == viewport.id)
            .then_some(viewport.id.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orthogonal_set_covers_every_orientation() {
        let viewports = ViewportDescriptor::orthogonal("CT_NIFTI");
        let ids: Vec<_> = viewports.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["CT_NIFTI_AXIAL", "CT_NIFTI_SAGITTAL", "CT_NIFTI_CORONAL"]);
        assert!(viewports.iter().all(|v| v.mount == v.id));
        assert!(find_duplicate_id(&viewports).is_none());
    }

    #[test]
    fn duplicate_ids_are_found() {
        let viewports = vec![
            ViewportDescriptor::new("a", Orientation::Axial, "m1"),
            ViewportDescriptor::new("b", Orientation::Coronal, "m2"),
            ViewportDescriptor::new("a", Orientation::Sagittal, "m3"),
        ];
        assert_eq!(find_duplicate_id(&viewports), Some("a"));
    }
}
