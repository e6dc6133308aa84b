use crate::{
    enums::SortBy,
    volume::{Volume, VolumeId, VolumeIdError},
};

use async_trait::async_trait;
use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use web_time::Instant;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error(transparent)]
    InvalidId(#[from] VolumeIdError),

    #[error("No loader registered for scheme `{0}`")]
    UnknownScheme(String),

    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Failed to fetch `{id}`: {reason}")]
    Fetch { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Decode task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Decodes the volumes of one identifier scheme.
#[async_trait]
pub trait SchemeHandler: Send + Sync {
    async fn load(&self, id: &VolumeId) -> Result<Volume, VolumeLoaderError>;
}

type Slot = Arc<OnceCell<Arc<Volume>>>;

/// Scheme registry with a cache of decoded volumes keyed by identifier.
///
/// Requesting the same identifier again, or concurrently, yields the
/// same `Arc<Volume>`. Failed loads leave no cache entry behind.
#[derive(Default)]
pub struct VolumeLoader {
    schemes: Mutex<HashMap<String, Arc<dyn SchemeHandler>>>,
    cache: Mutex<HashMap<String, Slot>>,
}

impl VolumeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_scheme(&self, scheme: impl Into<String>, handler: Arc<dyn SchemeHandler>) {
        let scheme = scheme.into();
        debug!(%scheme, "registering volume loader scheme");
        lock(&self.schemes).insert(scheme, handler);
    }

    pub fn has_scheme(&self, scheme: &str) -> bool {
        lock(&self.schemes).contains_key(scheme)
    }

    /// Load `id`, or return the cached volume if it was loaded before.
    pub async fn load(&self, id: &str) -> Result<Arc<Volume>, VolumeLoaderError> {
        let id = VolumeId::parse(id)?;
        let handler = lock(&self.schemes)
            .get(id.scheme())
            .cloned()
            .ok_or_else(|| VolumeLoaderError::UnknownScheme(id.scheme().to_owned()))?;
        let slot = lock(&self.cache)
            .entry(id.as_str().to_owned())
            .or_default()
            .clone();

        let result = slot
            .get_or_try_init(|| async {
                let started = Instant::now();
                info!(volume_id = %id, "loading volume");
                let volume = handler.load(&id).await?;
                info!(
                    volume_id = %id,
                    dim = ?volume.dim(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "volume loaded"
                );
                Ok::<_, VolumeLoaderError>(Arc::new(volume))
            })
            .await
            .cloned();

        if result.is_err() {
            let mut cache = lock(&self.cache);
            if cache
                .get(id.as_str())
                .is_some_and(|current| Arc::ptr_eq(current, &slot) && !slot.initialized())
            {
                cache.remove(id.as_str());
            }
        }
        result
    }

    /// Cached volume for `id`, without loading.
    pub fn get(&self, id: &str) -> Option<Arc<Volume>> {
        lock(&self.cache).get(id).and_then(|slot| slot.get().cloned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn evict(&self, id: &str) -> Option<Arc<Volume>> {
        lock(&self.cache)
            .remove(id)
            .and_then(|slot| slot.get().cloned())
    }

    pub fn purge(&self) {
        let mut cache = lock(&self.cache);
        debug!(entries = cache.len(), "purging volume cache");
        cache.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `dicom:<directory>` — every `.dcm` file of a directory stacked into a
/// volume.
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomDirectoryLoader {
    pub sort_by: SortBy,
}

impl DicomDirectoryLoader {
    pub const SCHEME: &'static str = "dicom";

    pub fn new(sort_by: SortBy) -> Self {
        Self { sort_by }
    }

    /// Load a volume from DICOM objects
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        id: VolumeId,
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let mut images_with_order: Vec<_> = dicom_objects
            .iter()
            .filter_map(|dicom_object| Self::extract_image_with_order(dicom_object, sort_by))
            .collect();

        if images_with_order.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_images(&mut images_with_order, sort_by);

        let images: Vec<_> = images_with_order
            .into_iter()
            .map(|(_, image)| image)
            .collect();

        Self::validate_dimensions(&images)?;

        let volume_array = Self::build_volume_array(&images);
        let spacing = Self::get_spacing(dicom_objects).ok_or(VolumeLoaderError::MissingSpacing)?;

        Ok(Volume::new(id, volume_array, spacing))
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        id: VolumeId,
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let paths: Vec<PathBuf> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        debug!(files = paths.len(), directory = %path.as_ref().display(), "reading DICOM files");

        let objects: Result<Vec<_>, _> = paths.par_iter().map(|path| open_file(path)).collect();
        Self::load_from_dicom_objects(id, &objects?, sort_by)
    }

    fn extract_image_with_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: SortBy,
    ) -> Option<(Option<f32>, Array2<u16>)> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let image_2d = Self::decode_image(dicom_object)?;
        Some((order, image_2d))
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn sort_images(images_with_order: &mut [(Option<f32>, Array2<u16>)], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            images_with_order
                .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        }

        if matches!(sort_by, SortBy::ImagePositionPatient) {
            images_with_order.reverse();
        }
    }

    fn validate_dimensions(images: &[Array2<u16>]) -> Result<(), VolumeLoaderError> {
        let first_dim = images[0].dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(images: &[Array2<u16>]) -> Array3<u16> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }

    fn get_spacing(dicom_objects: &[FileDicomObject<InMemDicomObject>]) -> Option<(f32, f32, f32)> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()?
                .to_float32()
                .ok()?;

            Some((pixel_spacing[0], pixel_spacing[1], slice_thickness))
        })
    }
}

#[async_trait]
impl SchemeHandler for DicomDirectoryLoader {
    async fn load(&self, id: &VolumeId) -> Result<Volume, VolumeLoaderError> {
        let id = id.clone();
        let sort_by = self.sort_by;
        tokio::task::spawn_blocking(move || {
            let directory = PathBuf::from(id.location());
            Self::load_from_directory(id, directory, sort_by)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR, dicom_value};
    use dicom::object::meta::FileMetaTableBuilder;
    use dicom_dictionary_std::uids;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A 16-bit MONOCHROME2 slice of `rows` x `cols` filled with `fill`,
    /// positioned at `z`.
    fn slice(
        rows: u16,
        cols: u16,
        fill: u16,
        z: f64,
        with_spacing: bool,
    ) -> FileDicomObject<InMemDicomObject> {
        let pixels: Vec<u8> = std::iter::repeat_n(fill, usize::from(rows) * usize::from(cols))
            .flat_map(u16::to_ne_bytes)
            .collect();
        let mut obj = InMemDicomObject::from_element_iter([
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, "2.25.1"),
            DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
            DataElement::new(
                tags::PHOTOMETRIC_INTERPRETATION,
                VR::CS,
                PrimitiveValue::from("MONOCHROME2"),
            ),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(cols)),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
            DataElement::new(
                tags::IMAGE_POSITION_PATIENT,
                VR::DS,
                dicom_value!(F64, [0.0, 0.0, z]),
            ),
            DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(pixels)),
        ]);
        if with_spacing {
            obj.put(DataElement::new(
                tags::PIXEL_SPACING,
                VR::DS,
                dicom_value!(F64, [0.5, 0.75]),
            ));
            obj.put(DataElement::new(
                tags::SLICE_THICKNESS,
                VR::DS,
                dicom_value!(F64, 2.5),
            ));
        }
        obj.with_meta(FileMetaTableBuilder::new().transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN))
            .unwrap()
    }

    fn dicom_id() -> VolumeId {
        VolumeId::new(DicomDirectoryLoader::SCHEME, "/series/ct").unwrap()
    }

    #[test]
    fn stack_is_built_from_decoded_slices() {
        let objects = [
            slice(3, 4, 7, 0.0, true),
            slice(3, 4, 8, 2.5, true),
        ];

        let volume =
            DicomDirectoryLoader::load_from_dicom_objects(dicom_id(), &objects, SortBy::None)
                .unwrap();

        assert_eq!(volume.dim(), (2, 3, 4));
        assert_eq!(volume.spacing, (0.5, 0.75, 2.5));
        assert_eq!(volume.data()[[0, 2, 3]], 7);
        assert_eq!(volume.data()[[1, 0, 0]], 8);
    }

    #[test]
    fn image_position_orders_slices_from_highest_z() {
        let objects = [
            slice(2, 2, 20, 5.0, true),
            slice(2, 2, 10, 0.0, true),
            slice(2, 2, 30, 10.0, true),
        ];

        let volume = DicomDirectoryLoader::load_from_dicom_objects(
            dicom_id(),
            &objects,
            SortBy::ImagePositionPatient,
        )
        .unwrap();

        let first_voxels: Vec<u16> = (0..3).map(|z| volume.data()[[z, 0, 0]]).collect();
        assert_eq!(first_voxels, vec![30, 20, 10]);
    }

    #[test]
    fn mismatched_slice_sizes_are_rejected() {
        let objects = [slice(2, 2, 1, 0.0, true), slice(2, 3, 1, 1.0, true)];

        let err = DicomDirectoryLoader::load_from_dicom_objects(dicom_id(), &objects, SortBy::None)
            .unwrap_err();

        assert!(matches!(err, VolumeLoaderError::InconsistentDimensions));
    }

    #[test]
    fn slices_without_spacing_are_rejected() {
        let objects = [slice(2, 2, 1, 0.0, false), slice(2, 2, 1, 1.0, false)];

        let err = DicomDirectoryLoader::load_from_dicom_objects(dicom_id(), &objects, SortBy::None)
            .unwrap_err();

        assert!(matches!(err, VolumeLoaderError::MissingSpacing));
    }

    #[test]
    fn objects_without_pixel_data_are_skipped() {
        let mut blank = slice(2, 2, 1, 0.0, true);
        blank.remove_element(tags::PIXEL_DATA);
        let objects = [blank, slice(2, 2, 4, 1.0, true)];

        let volume =
            DicomDirectoryLoader::load_from_dicom_objects(dicom_id(), &objects, SortBy::None)
                .unwrap();

        assert_eq!(volume.dim(), (1, 2, 2));
        assert_eq!(volume.data()[[0, 1, 1]], 4);
    }

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SchemeHandler for Counting {
        async fn load(&self, id: &VolumeId) -> Result<Volume, VolumeLoaderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Volume::new(id.clone(), Array3::zeros((2, 2, 2)), (1.0, 1.0, 1.0)))
        }
    }

    #[tokio::test]
    async fn unknown_scheme_is_reported() {
        let loader = VolumeLoader::new();
        let err = loader.load("nifti:abd.nii.gz").await.unwrap_err();
        assert!(matches!(err, VolumeLoaderError::UnknownScheme(s) if s == "nifti"));
    }

    #[tokio::test]
    async fn malformed_id_is_reported() {
        let loader = VolumeLoader::new();
        let err = loader.load("abd.nii.gz").await.unwrap_err();
        assert!(matches!(err, VolumeLoaderError::InvalidId(_)));
    }

    #[tokio::test]
    async fn evict_forces_a_reload() {
        let handler = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let loader = VolumeLoader::new();
        loader.register_scheme("mem", handler.clone());

        let first = loader.load("mem:a").await.unwrap();
        assert!(loader.contains("mem:a"));
        assert!(Arc::ptr_eq(&loader.evict("mem:a").unwrap(), &first));
        assert!(!loader.contains("mem:a"));

        let second = loader.load("mem:a").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_directory_is_an_io_error() {
        let loader = VolumeLoader::new();
        loader.register_scheme(
            DicomDirectoryLoader::SCHEME,
            Arc::new(DicomDirectoryLoader::default()),
        );
        let err = loader
            .load("dicom:/nonexistent/volume-session/dicom")
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeLoaderError::Io(_)));
    }

    #[tokio::test]
    async fn directory_without_dcm_files_has_no_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a slice").unwrap();
        let id = VolumeId::new("dicom", &dir.path().display().to_string()).unwrap();

        let err = DicomDirectoryLoader::default().load(&id).await.unwrap_err();
        assert!(matches!(err, VolumeLoaderError::NoValidImages));
    }
}
