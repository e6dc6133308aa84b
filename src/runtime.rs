//! Process-wide state shared by every session.
//!
//! The toolkit keys tool registrations, tool groups, rendering engines and
//! segmentations by fixed identifiers and refuses duplicates. `Runtime`
//! constructs each of them at most once, however many sessions bootstrap
//! against it.

use crate::backend::{
    RenderingEngine, SegmentationInput, SegmentationRepresentationInput, SegmentationType,
    ToolGroup, Toolkit, ToolkitError,
};
use crate::enums::ToolMode;
use crate::tools::{Tool, ToolGroupLayout};
use crate::volume_loader::VolumeLoader;

use std::collections::{HashMap, HashSet, hash_map::Entry};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// A tool group the toolkit has created, and how far its layout got.
struct GroupEntry {
    group: Arc<dyn ToolGroup>,
    layout: ToolGroupLayout,
    added: HashSet<Tool>,
    bindings_applied: usize,
}

impl GroupEntry {
    fn is_configured(&self) -> bool {
        self.added.len() == self.layout.tools().count()
            && self.bindings_applied == self.layout.bindings.len()
    }

    /// Adds the tools and applies the bindings not yet accepted by the
    /// toolkit. A failure leaves the entry where it stopped.
    fn configure(&mut self) -> Result<(), ToolkitError> {
        for tool in self.layout.tools() {
            if self.added.contains(&tool) {
                continue;
            }
            self.group.add_tool(tool)?;
            self.added.insert(tool);
        }
        while let Some(binding) = self.layout.bindings.get(self.bindings_applied) {
            match binding.mode {
                ToolMode::Active => self.group.set_tool_active(binding.tool, binding.button)?,
                ToolMode::Passive => self.group.set_tool_passive(binding.tool)?,
                ToolMode::Enabled => self.group.set_tool_enabled(binding.tool)?,
                ToolMode::Disabled => self.group.set_tool_disabled(binding.tool)?,
            }
            self.bindings_applied += 1;
        }
        Ok(())
    }
}

pub struct Runtime {
    toolkit: Toolkit,
    loader: Arc<VolumeLoader>,
    rendering_initialized: OnceCell<()>,
    tools_initialized: OnceCell<()>,
    registered_tools: Mutex<HashSet<Tool>>,
    tool_groups: Mutex<HashMap<String, GroupEntry>>,
    engines: Mutex<HashMap<String, Arc<dyn RenderingEngine>>>,
    segmentations: Mutex<HashSet<String>>,
    representations: tokio::sync::Mutex<HashSet<(String, String)>>,
}

impl Runtime {
    pub fn new(toolkit: Toolkit) -> Self {
        Self::with_loader(toolkit, Arc::new(VolumeLoader::new()))
    }

    pub fn with_loader(toolkit: Toolkit, loader: Arc<VolumeLoader>) -> Self {
        Self {
            toolkit,
            loader,
            rendering_initialized: OnceCell::new(),
            tools_initialized: OnceCell::new(),
            registered_tools: Mutex::new(HashSet::new()),
            tool_groups: Mutex::new(HashMap::new()),
            engines: Mutex::new(HashMap::new()),
            segmentations: Mutex::new(HashSet::new()),
            representations: tokio::sync::Mutex::new(HashSet::new()),
        }
    }

    pub fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    pub fn loader(&self) -> &Arc<VolumeLoader> {
        &self.loader
    }

    /// Initializes the rendering and tool runtimes once per process.
    ///
    /// Each runtime has its own guard, so a retry after a failed tool
    /// runtime init does not initialize rendering a second time.
    pub async fn ensure_initialized(&self) -> Result<(), ToolkitError> {
        self.rendering_initialized
            .get_or_try_init(|| async {
                self.toolkit.runtime.init_rendering().await?;
                info!("rendering runtime initialized");
                Ok::<_, ToolkitError>(())
            })
            .await?;
        self.tools_initialized
            .get_or_try_init(|| async {
                self.toolkit.runtime.init_tools().await?;
                info!("tool runtime initialized");
                Ok::<_, ToolkitError>(())
            })
            .await?;
        Ok(())
    }

    /// Registers every catalog tool the toolkit does not know yet.
    pub fn ensure_tools_registered(&self) -> Result<(), ToolkitError> {
        let mut registered = lock(&self.registered_tools);
        let before = registered.len();
        for tool in Tool::CATALOG {
            if registered.contains(&tool) {
                continue;
            }
            self.toolkit.tools.register_tool(tool)?;
            registered.insert(tool);
        }
        if registered.len() > before {
            info!(count = registered.len() - before, "tools registered");
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.rendering_initialized.initialized() && self.tools_initialized.initialized()
    }

    pub fn tools_registered(&self) -> bool {
        let registered = lock(&self.registered_tools);
        Tool::CATALOG.iter().all(|tool| registered.contains(tool))
    }

    /// Returns the tool group `id`, creating and configuring it from
    /// `layout` the first time it is requested.
    ///
    /// A group whose configuration failed halfway is finished on the next
    /// request, using the layout it was created with.
    pub fn tool_group(
        &self,
        id: &str,
        layout: &ToolGroupLayout,
    ) -> Result<Arc<dyn ToolGroup>, ToolkitError> {
        let mut groups = lock(&self.tool_groups);
        let entry = match groups.entry(id.to_owned()) {
            Entry::Occupied(entry) => {
                let entry = entry.into_mut();
                if entry.layout != *layout {
                    warn!(
                        tool_group = id,
                        "tool group already exists with a different layout, keeping the existing one"
                    );
                }
                if entry.is_configured() {
                    debug!(tool_group = id, "reusing tool group");
                    return Ok(entry.group.clone());
                }
                entry
            }
            Entry::Vacant(slot) => {
                let group = self.toolkit.tools.create_tool_group(id)?;
                slot.insert(GroupEntry {
                    group,
                    layout: layout.clone(),
                    added: HashSet::new(),
                    bindings_applied: 0,
                })
            }
        };

        entry.configure()?;
        info!(tool_group = id, tools = entry.layout.bindings.len(), "tool group configured");
        Ok(entry.group.clone())
    }

    /// Returns the rendering engine `id`, constructing it on first use.
    pub fn engine(&self, id: &str) -> Result<Arc<dyn RenderingEngine>, ToolkitError> {
        let mut engines = lock(&self.engines);
        if let Some(engine) = engines.get(id) {
            debug!(engine = id, "reusing rendering engine");
            return Ok(engine.clone());
        }
        let engine = self.toolkit.engines.create_engine(id)?;
        info!(engine = id, "rendering engine created");
        engines.insert(id.to_owned(), engine.clone());
        Ok(engine)
    }

    /// Registers a labelmap segmentation over `label_volume_id` unless
    /// one with the same id already exists. Returns whether it was added.
    pub fn ensure_labelmap_segmentation(
        &self,
        segmentation_id: &str,
        label_volume_id: &str,
    ) -> Result<bool, ToolkitError> {
        let mut segmentations = lock(&self.segmentations);
        if segmentations.contains(segmentation_id) {
            return Ok(false);
        }
        self.toolkit
            .segmentation
            .add_segmentations(vec![SegmentationInput {
                segmentation_id: segmentation_id.to_owned(),
                representation: SegmentationType::Labelmap,
                volume_id: label_volume_id.to_owned(),
            }])?;
        segmentations.insert(segmentation_id.to_owned());
        info!(
            segmentation = segmentation_id,
            label_volume = label_volume_id,
            "segmentation registered"
        );
        Ok(true)
    }

    /// Attaches a labelmap representation of `segmentation_id` to the
    /// tool group once.
    pub async fn ensure_labelmap_representation(
        &self,
        tool_group_id: &str,
        segmentation_id: &str,
    ) -> Result<bool, ToolkitError> {
        let key = (tool_group_id.to_owned(), segmentation_id.to_owned());
        let mut representations = self.representations.lock().await;
        if representations.contains(&key) {
            return Ok(false);
        }
        self.toolkit
            .segmentation
            .add_segmentation_representations(
                tool_group_id,
                vec![SegmentationRepresentationInput {
                    segmentation_id: segmentation_id.to_owned(),
                    representation: SegmentationType::Labelmap,
                }],
            )
            .await?;
        representations.insert(key);
        debug!(
            tool_group = tool_group_id,
            segmentation = segmentation_id,
            "labelmap representation attached"
        );
        Ok(true)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
