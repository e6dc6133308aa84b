//! # volume-session
//!
//! This crate bootstraps a volumetric image viewer: it loads a volume
//! (and optionally a label volume), hands it to a rendering engine, lays
//! out synchronized orthographic viewports and registers a fixed catalog
//! of interaction tools on them.
//!
//! Rendering, tool interaction and segmentation display belong to the
//! toolkit behind the [`backend`] traits. What this crate owns is the
//! setup sequence itself and its guarantees:
//!
//!  - a [`Session`] runs its setup at most once, however often the host
//!    UI fires its mount hook
//!  - tool registration, tool groups, rendering engines and segmentations
//!    are created at most once per [`Runtime`], shared by all sessions
//!  - volumes are decoded once per identifier and reused afterwards
//!  - the window/level setting is applied exactly once to every volume
//!    actor
//!
//! Volume identifiers are scheme-prefixed strings (`dicom:/data/ct`,
//! `nifti:https://host/abd.nii.gz`); the scheme selects the
//! [`SchemeHandler`] that decodes it. A handler for directories of DICOM
//! files ships with the crate.
//!
//! [`HeadlessBackend`] implements every collaborator in-process and
//! renders the centre slice of each viewport on the CPU.
//!
//! # Examples
//!
//! ## Bootstrapping three orthographic viewports
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use volume_session::{
//! #     DicomDirectoryLoader, HeadlessBackend, Runtime, Session, SessionConfig, Toolkit,
//! #     WindowLevel,
//! # };
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::new("dicom:/data/abdomen")
//!     .with_window_level(WindowLevel::new(40.0, 400.0));
//! let backend = Arc::new(HeadlessBackend::with_mounts(
//!     config.viewports.iter().map(|v| v.mount.clone()),
//! ));
//! let runtime = Arc::new(Runtime::new(Toolkit::from_backend(backend)));
//! runtime
//!     .loader()
//!     .register_scheme(DicomDirectoryLoader::SCHEME, Arc::new(DicomDirectoryLoader::default()));
//!
//! let mut session = Session::new(runtime, config);
//! session.bootstrap().await?;
//! // a second mount-hook firing does nothing
//! session.bootstrap().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod enums;
pub mod headless;
pub mod runtime;
pub mod session;
pub mod tools;
pub mod viewport;
pub mod volume;
pub mod volume_loader;
pub mod window_level;

pub use backend::{Toolkit, ToolkitError};
pub use config::{ConfigError, SessionConfig};
pub use enums::{MouseButton, Orientation, SessionState, SortBy, ToolMode};
pub use headless::HeadlessBackend;
pub use runtime::Runtime;
pub use session::{Session, SessionError};
pub use tools::{Tool, ToolBinding, ToolGroupLayout};
pub use viewport::ViewportDescriptor;
pub use volume::{Volume, VolumeId};
pub use volume_loader::{DicomDirectoryLoader, SchemeHandler, VolumeLoader, VolumeLoaderError};
pub use window_level::{VoiRange, WindowLevel};
