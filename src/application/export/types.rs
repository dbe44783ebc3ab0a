use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Printable area of the certificate artwork, in CSS pixels.
pub const CONTENT_WIDTH_PX: u32 = 1050;
pub const CONTENT_HEIGHT_PX: u32 = 720;
/// Padding the template reserves around the artwork on every side.
pub const PAGE_PADDING_PX: u32 = 60;

/// Physical page size and margins handed to the rendering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageGeometry {
    pub width_px: u32,
    pub height_px: u32,
    pub margin_top_px: u32,
    pub margin_right_px: u32,
    pub margin_bottom_px: u32,
    pub margin_left_px: u32,
}

impl PageGeometry {
    /// The single page layout every certificate is exported with: 1170×840
    /// with no margins.
    pub const fn certificate() -> Self {
        Self {
            width_px: CONTENT_WIDTH_PX + 2 * PAGE_PADDING_PX,
            height_px: CONTENT_HEIGHT_PX + 2 * PAGE_PADDING_PX,
            margin_top_px: 0,
            margin_right_px: 0,
            margin_bottom_px: 0,
            margin_left_px: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrintOptions {
    pub geometry: PageGeometry,
    pub print_background: bool,
}

impl PrintOptions {
    pub const fn certificate() -> Self {
        Self {
            geometry: PageGeometry::certificate(),
            print_background: true,
        }
    }
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self::certificate()
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rendering engine unavailable: {0}")]
    Unavailable(io::Error),
    #[error("rendering engine i/o failure: {0}")]
    Io(io::Error),
    #[error("rendering engine exited unsuccessfully (exit {exit_code:?}): {stderr}")]
    Process {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("no document has been loaded into the rendering surface")]
    NotLoaded,
    #[error("rendering engine produced an empty document")]
    EmptyOutput,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("render failed: {0}")]
    Render(#[from] EngineError),
    #[error("render did not finish within {}s", .limit.as_secs())]
    Timeout { limit: Duration },
    #[error("failed to write `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A certificate that has been written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateArtifact {
    pub path: PathBuf,
    pub bytes: u64,
}

impl CertificateArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Factory for isolated rendering surfaces. Each call must hand out a fresh
/// instance that shares no state with earlier ones.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError>;
}

/// One rendering surface. Callers always finish with [`EngineSession::close`].
#[async_trait]
pub trait EngineSession: Send {
    /// Load markup into the surface. Returns once referenced resources have
    /// settled (or the engine's quiescence budget elapsed).
    async fn load(&mut self, html: &str) -> Result<(), EngineError>;

    /// Paginate the loaded document into PDF bytes.
    async fn print_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, EngineError>;

    /// Tear the surface down and release everything it holds.
    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}
