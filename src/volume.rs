use crate::enums::Orientation;
use crate::window_level::VoiRange;

use image::ImageBuffer;
use image::Luma;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;
use rayon::prelude::*;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VolumeIdError {
    #[error("volume id `{0}` has no scheme prefix")]
    MissingScheme(String),

    #[error("volume id `{0}` has an empty location")]
    EmptyLocation(String),
}

/// A content identifier such as `nifti:https://host/abd.nii.gz`.
///
/// The full string is the cache key; the scheme selects the loader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeId {
    raw: String,
    split: usize,
}

impl VolumeId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, VolumeIdError> {
        let raw = raw.into();
        let split = match raw.find(':') {
            Some(0) | None => return Err(VolumeIdError::MissingScheme(raw)),
            Some(split) => split,
        };
        if split + 1 == raw.len() {
            return Err(VolumeIdError::EmptyLocation(raw));
        }
        Ok(Self { raw, split })
    }

    pub fn new(scheme: &str, location: &str) -> Result<Self, VolumeIdError> {
        Self::parse(format!("{scheme}:{location}"))
    }

    pub fn scheme(&self) -> &str {
        &self.raw[..self.split]
    }

    pub fn location(&self) -> &str {
        &self.raw[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A decoded volume, `(depth, height, width)` voxels.
#[derive(Debug)]
pub struct Volume {
    pub id: VolumeId,
    pub data: Array3<u16>,
    pub spacing: (f32, f32, f32),
}

impl Volume {
    pub fn new(id: VolumeId, data: Array3<u16>, spacing: (f32, f32, f32)) -> Self {
        Self { id, data, spacing }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    pub fn slice_count(&self, orientation: Orientation) -> usize {
        let dim = self.data.dim();
        match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        }
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayView2<'_, u16>> {
        if index >= self.slice_count(orientation) {
            return None;
        }
        let slice = match orientation {
            Orientation::Axial => self.data.slice(s![index, .., ..]),
            Orientation::Coronal => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal => self.data.slice(s![.., .., index]),
        };
        Some(slice)
    }

    /// Centre slice of `orientation`, windowed into 8 bits.
    pub fn center_image(
        &self,
        orientation: Orientation,
        range: VoiRange,
    ) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let count = self.slice_count(orientation);
        if count == 0 {
            return None;
        }
        let slice = self.get_slice_from_axis(count / 2, orientation)?;
        Self::slice_to_image(&slice, range)
    }

    fn slice_to_image(
        slice: &ArrayView2<'_, u16>,
        range: VoiRange,
    ) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = slice
            .into_par_iter()
            .map(|&v| range.apply(f64::from(v)))
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window_level::WindowLevel;

    fn ramp() -> Volume {
        let data = Array3::from_shape_fn((4, 3, 2), |(z, y, x)| (z * 100 + y * 10 + x) as u16);
        Volume::new(VolumeId::parse("mem:ramp").unwrap(), data, (1.0, 1.0, 2.5))
    }

    #[test]
    fn parses_scheme_and_location() {
        let id = VolumeId::parse("nifti:https://host/abd.nii.gz").unwrap();
        assert_eq!(id.scheme(), "nifti");
        assert_eq!(id.location(), "https://host/abd.nii.gz");
        assert_eq!(id.to_string(), "nifti:https://host/abd.nii.gz");
    }

    #[test]
    fn rejects_ids_without_scheme() {
        assert!(matches!(
            VolumeId::parse("abd.nii.gz"),
            Err(VolumeIdError::MissingScheme(_))
        ));
        assert!(matches!(
            VolumeId::parse(":abd.nii.gz"),
            Err(VolumeIdError::MissingScheme(_))
        ));
        assert!(matches!(
            VolumeId::parse("nifti:"),
            Err(VolumeIdError::EmptyLocation(_))
        ));
    }

    #[test]
    fn slices_follow_orientation() {
        let volume = ramp();
        assert_eq!(volume.slice_count(Orientation::Axial), 4);
        assert_eq!(volume.slice_count(Orientation::Coronal), 3);
        assert_eq!(volume.slice_count(Orientation::Sagittal), 2);

        let axial = volume.get_slice_from_axis(2, Orientation::Axial).unwrap();
        assert_eq!(axial.dim(), (3, 2));
        assert_eq!(axial[[1, 1]], 211);

        let sagittal = volume.get_slice_from_axis(1, Orientation::Sagittal).unwrap();
        assert_eq!(sagittal.dim(), (4, 3));
        assert_eq!(sagittal[[3, 2]], 321);

        assert!(volume.get_slice_from_axis(4, Orientation::Axial).is_none());
    }

    #[test]
    fn center_image_is_windowed() {
        let volume = ramp();
        let range = WindowLevel::new(210.0, 20.0).range();
        let image = volume.center_image(Orientation::Axial, range).unwrap();
        assert_eq!(image.dimensions(), (2, 3));
        // slice 2 holds 200..=221; window spans 200..220
        assert_eq!(image.get_pixel(0, 0).0[0], 0);
        assert_eq!(image.get_pixel(1, 2).0[0], 255);
    }
}
