//! One mounted viewer: the bootstrap that wires a volume into a set of
//! viewports and tools, run at most once per session.

use crate::backend::{RenderingEngine, ToolGroup, ToolkitError, VolumeActor};
use crate::config::{ConfigError, SessionConfig};
use crate::enums::SessionState;
use crate::runtime::Runtime;
use crate::tools::LayoutError;
use crate::viewport::ViewportDescriptor;
use crate::volume::Volume;
use crate::volume_loader::VolumeLoaderError;

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid tool layout: {0}")]
    Layout(#[source] LayoutError),

    #[error("toolkit initialization failed: {0}")]
    Init(#[source] ToolkitError),

    #[error("failed to load volume: {0}")]
    Load(#[from] VolumeLoaderError),

    #[error("toolkit call failed: {0}")]
    Toolkit(#[from] ToolkitError),

    #[error("session is {0}")]
    Unavailable(SessionState),
}

/// Handles a ready session holds on to.
struct Mounted {
    engine: Arc<dyn RenderingEngine>,
    tool_group: Arc<dyn ToolGroup>,
    viewport_ids: Vec<String>,
}

pub struct Session {
    runtime: Arc<Runtime>,
    config: SessionConfig,
    state: SessionState,
    mounted: Option<Mounted>,
}

impl Session {
    pub fn new(runtime: Arc<Runtime>, config: SessionConfig) -> Self {
        Self {
            runtime,
            config,
            state: SessionState::Uninitialized,
            mounted: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Ids of the viewports this session created, empty until ready.
    pub fn viewport_ids(&self) -> &[String] {
        self.mounted
            .as_ref()
            .map(|mounted| mounted.viewport_ids.as_slice())
            .unwrap_or_default()
    }

    pub fn engine(&self) -> Option<&Arc<dyn RenderingEngine>> {
        self.mounted.as_ref().map(|mounted| &mounted.engine)
    }

    pub fn tool_group(&self) -> Option<&Arc<dyn ToolGroup>> {
        self.mounted.as_ref().map(|mounted| &mounted.tool_group)
    }

    /// Runs the setup sequence if it has not run yet.
    ///
    /// Mount hooks may fire several times for the same session; every call
    /// after a successful one is a no-op. A session that failed or was
    /// disposed reports [`SessionError::Unavailable`].
    ///
    /// A session still `Initializing` had its bootstrap future dropped
    /// before it finished, so whatever it wired is incomplete. It reports
    /// `Unavailable(Initializing)`; mount a new `Session` on the same
    /// [`Runtime`] to finish the setup.
    pub async fn bootstrap(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Ready => {
                debug!("bootstrap already ran for this session");
                return Ok(());
            }
            SessionState::Initializing => {
                warn!("an earlier bootstrap of this session was abandoned halfway");
                return Err(SessionError::Unavailable(SessionState::Initializing));
            }
            state @ (SessionState::Failed | SessionState::TornDown) => {
                return Err(SessionError::Unavailable(state));
            }
        }

        self.state = SessionState::Initializing;
        let outcome = self.run().await;
        match outcome {
            Ok(Some(mounted)) => {
                info!(
                    engine = %self.config.engine_id,
                    viewports = mounted.viewport_ids.len(),
                    "session ready"
                );
                self.mounted = Some(mounted);
                self.state = SessionState::Ready;
                Ok(())
            }
            Ok(None) => {
                self.state = SessionState::TornDown;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "session bootstrap failed");
                self.state = SessionState::Failed;
                Err(err)
            }
        }
    }

    async fn run(&self) -> Result<Option<Mounted>, SessionError> {
        let config = &self.config;
        let runtime = &self.runtime;
        config.validate().map_err(|err| match err {
            ConfigError::Layout(err) => SessionError::Layout(err),
            err => SessionError::Config(err),
        })?;

        runtime.ensure_initialized().await.map_err(SessionError::Init)?;
        runtime.ensure_tools_registered().map_err(SessionError::Init)?;

        let tool_group = runtime.tool_group(&config.tool_group_id, &config.tools)?;

        let (volume, _label) = self.load_volumes().await?;

        let viewports = self.mounted_viewports();
        if viewports.is_empty() {
            warn!("no viewport mount point exists, host was unmounted");
            return Ok(None);
        }

        let engine = runtime.engine(&config.engine_id)?;
        engine.set_viewports(&viewports)?;
        let viewport_ids: Vec<String> = viewports.into_iter().map(|viewport| viewport.id).collect();
        debug!(?viewport_ids, "viewports registered");

        for viewport_id in &viewport_ids {
            tool_group.add_viewport(viewport_id, engine.id())?;
        }

        if let Some(label_volume_id) = &config.label_volume_id {
            runtime.ensure_labelmap_segmentation(&config.segmentation_id, label_volume_id)?;
            runtime
                .ensure_labelmap_representation(tool_group.id(), &config.segmentation_id)
                .await?;
        }

        let range = config.window_level.range();
        engine.set_volume(volume, &viewport_ids, &mut |actor: &mut dyn VolumeActor| {
            debug!(
                viewport = actor.viewport_id(),
                lower = range.lower,
                upper = range.upper,
                "applying window/level"
            );
            actor.set_mapping_range(range.lower, range.upper);
        })?;

        engine.render()?;

        Ok(Some(Mounted {
            engine,
            tool_group,
            viewport_ids,
        }))
    }

    async fn load_volumes(&self) -> Result<(Arc<Volume>, Option<Arc<Volume>>), VolumeLoaderError> {
        let loader = self.runtime.loader();
        let primary = loader.load(&self.config.volume_id);
        match &self.config.label_volume_id {
            Some(label_id) => {
                let (volume, label) = futures::try_join!(primary, loader.load(label_id))?;
                Ok((volume, Some(label)))
            }
            None => Ok((primary.await?, None)),
        }
    }

    fn mounted_viewports(&self) -> Vec<ViewportDescriptor> {
        let host = &self.runtime.toolkit().host;
        self.config
            .viewports
            .iter()
            .filter(|viewport| {
                let present = host.has_mount_point(&viewport.mount);
                if !present {
                    warn!(
                        viewport = %viewport.id,
                        mount = %viewport.mount,
                        "mount point missing, skipping viewport"
                    );
                }
                present
            })
            .cloned()
            .collect()
    }

    /// Detaches this session's viewports and marks it torn down.
    ///
    /// Every viewport is detached even if an earlier one fails; the session
    /// ends up `TornDown` either way and the first toolkit error is
    /// returned. Engines, tool groups and cached volumes belong to the
    /// [`Runtime`] and outlive the session.
    pub fn dispose(&mut self) -> Result<(), SessionError> {
        let mut first_error = None;
        if let Some(mounted) = self.mounted.take() {
            let engine_id = mounted.engine.id();
            for viewport_id in &mounted.viewport_ids {
                let removed = mounted.tool_group.remove_viewport(viewport_id, engine_id);
                let disabled = mounted.engine.disable_viewport(viewport_id);
                for err in [removed.err(), disabled.err()].into_iter().flatten() {
                    warn!(viewport = %viewport_id, error = %err, "failed to detach viewport");
                    first_error.get_or_insert(err);
                }
            }
            info!(viewports = mounted.viewport_ids.len(), "session disposed");
        }
        self.state = SessionState::TornDown;
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
