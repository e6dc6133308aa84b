#![allow(dead_code)]

use async_trait::async_trait;
use ndarray::Array3;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use volume_session::{
    HeadlessBackend, Runtime, SchemeHandler, SessionConfig, Toolkit, Volume, VolumeId,
    VolumeLoaderError,
};

pub const CT_ID: &str = "mem:ct";
pub const LABEL_ID: &str = "mem:labels";

/// Synthetic volumes: voxel value is `z * 100 + y * 10 + x`.
#[derive(Default)]
pub struct MemoryScheme {
    loads: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

impl MemoryScheme {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_owned());
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemeHandler for MemoryScheme {
    async fn load(&self, id: &VolumeId) -> Result<Volume, VolumeLoaderError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.failing.lock().unwrap().contains(id.as_str()) {
            return Err(VolumeLoaderError::Fetch {
                id: id.to_string(),
                reason: "404 Not Found".to_owned(),
            });
        }
        let data = Array3::from_shape_fn((4, 6, 8), |(z, y, x)| (z * 100 + y * 10 + x) as u16);
        Ok(Volume::new(id.clone(), data, (1.0, 1.0, 2.0)))
    }
}

pub struct Fixture {
    pub backend: Arc<HeadlessBackend>,
    pub scheme: Arc<MemoryScheme>,
    pub runtime: Arc<Runtime>,
}

impl Fixture {
    /// Backend with every mount point of `config` present.
    pub fn for_config(config: &SessionConfig) -> Self {
        let backend = Arc::new(HeadlessBackend::with_mounts(
            config.viewports.iter().map(|v| v.mount.clone()),
        ));
        Self::with_backend(backend)
    }

    pub fn with_backend(backend: Arc<HeadlessBackend>) -> Self {
        let toolkit = Toolkit::from_backend(backend.clone());
        Self::with_toolkit(backend, toolkit)
    }

    /// `toolkit` may put wrappers around some of `backend`'s roles.
    pub fn with_toolkit(backend: Arc<HeadlessBackend>, toolkit: Toolkit) -> Self {
        let scheme = MemoryScheme::new();
        let runtime = Arc::new(Runtime::new(toolkit));
        runtime.loader().register_scheme("mem", scheme.clone());
        Self {
            backend,
            scheme,
            runtime,
        }
    }
}

pub fn ct_config() -> SessionConfig {
    SessionConfig::new(CT_ID)
}
