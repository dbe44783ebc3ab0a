//! Certificate template loading and per-participant substitution.
//!
//! The template is read once per run. Relative image references are rewritten
//! to absolute `file://` URLs at load time because the browser renders from a
//! scratch directory and cannot resolve paths relative to the template.

use std::{
    io,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::domain::entities::Participant;

/// Attribute prefix that template image sources use for the assets directory.
/// Matched textually, so references inside scripts and comments move too.
pub const IMAGE_SOURCE_PREFIX: &str = r#"src="imagens/"#;

static NAME_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*NOME_PARTICIPANTE\s*\}\}").expect("name placeholder pattern must compile")
});
static DATE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*DATA_EVENTO\s*\}\}").expect("date placeholder pattern must compile")
});

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("assets directory `{path}` cannot be expressed as a file URL")]
    AssetsDir { path: PathBuf },
}

/// Fully substituted certificate markup for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    html: String,
}

impl RenderedDocument {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    pub fn html(&self) -> &str {
        &self.html
    }
}

#[derive(Debug, Clone)]
pub struct CertificateTemplate {
    markup: String,
}

impl CertificateTemplate {
    /// Read the template from disk and resolve its image references against
    /// `assets_dir`.
    pub fn load(path: &Path, assets_dir: &Path) -> Result<Self, TemplateError> {
        let raw = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let assets_url = assets_base_url(assets_dir)?;
        let template = Self::from_markup(&raw, &assets_url);
        debug!(
            target = "certgen::template",
            path = %path.display(),
            assets = %assets_url,
            bytes = template.markup.len(),
            "Certificate template loaded"
        );
        Ok(template)
    }

    /// Build a template from in-memory markup. `assets_url` must end with `/`.
    pub fn from_markup(raw: &str, assets_url: &Url) -> Self {
        Self {
            markup: rewrite_image_sources(raw, assets_url),
        }
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// Substitute the participant's name and event date into every
    /// placeholder. Placeholders the template does not know are left as-is.
    pub fn render(&self, participant: &Participant) -> RenderedDocument {
        let with_name = NAME_PLACEHOLDER.replace_all(&self.markup, NoExpand(&participant.name));
        let html = DATE_PLACEHOLDER.replace_all(&with_name, NoExpand(&participant.event_date));
        RenderedDocument::new(html.into_owned())
    }
}

/// Absolute `file://` URL of the assets directory, with a trailing slash.
pub fn assets_base_url(assets_dir: &Path) -> Result<Url, TemplateError> {
    let absolute = std::path::absolute(assets_dir).map_err(|_| TemplateError::AssetsDir {
        path: assets_dir.to_path_buf(),
    })?;
    Url::from_directory_path(&absolute).map_err(|()| TemplateError::AssetsDir { path: absolute })
}

fn rewrite_image_sources(raw: &str, assets_url: &Url) -> String {
    raw.replace(IMAGE_SOURCE_PREFIX, &format!(r#"src="{assets_url}"#))
}
