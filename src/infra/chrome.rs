use std::{
    cell::Cell,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::Stdio,
    rc::Rc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use crate::application::export::{EngineError, EngineSession, PrintOptions, RenderEngine};

const DOCUMENT_FILE: &str = "certificate.html";
const PRINT_STYLESHEET: &str = "certgen-print.css";
const OUTPUT_FILE: &str = "certificate.pdf";
const PROFILE_DIR: &str = "profile";
const DOCTYPE_OPEN: &str = "<!doctype";

/// Headless Chromium driven through its command-line printing mode.
///
/// Every [`RenderEngine::launch`] hands out a session with its own scratch
/// directory and browser profile, so no state leaks between certificates.
#[derive(Debug, Clone)]
pub struct ChromeEngine {
    binary: PathBuf,
    quiescence_budget: Duration,
}

impl ChromeEngine {
    pub fn new(binary: impl Into<PathBuf>, quiescence_budget: Duration) -> Self {
        Self {
            binary: binary.into(),
            quiescence_budget,
        }
    }

    fn open_session(&self) -> Result<ChromeSession, EngineError> {
        let scratch = tempfile::Builder::new()
            .prefix("certgen-chrome-")
            .tempdir()
            .map_err(EngineError::Io)?;
        Ok(ChromeSession {
            binary: self.binary.clone(),
            quiescence_budget: self.quiescence_budget,
            scratch,
            document: None,
        })
    }
}

#[async_trait]
impl RenderEngine for ChromeEngine {
    async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        Ok(Box::new(self.open_session()?))
    }
}

struct ChromeSession {
    binary: PathBuf,
    quiescence_budget: Duration,
    scratch: TempDir,
    document: Option<PathBuf>,
}

#[async_trait]
impl EngineSession for ChromeSession {
    async fn load(&mut self, html: &str) -> Result<(), EngineError> {
        let staged = link_print_stylesheet(html)?;
        let path = self.scratch.path().join(DOCUMENT_FILE);
        tokio::fs::write(&path, staged)
            .await
            .map_err(EngineError::Io)?;
        self.document = Some(path);
        Ok(())
    }

    async fn print_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, EngineError> {
        let document = self.document.as_ref().ok_or(EngineError::NotLoaded)?;
        let stylesheet = self.scratch.path().join(PRINT_STYLESHEET);
        tokio::fs::write(&stylesheet, print_stylesheet(options))
            .await
            .map_err(EngineError::Io)?;

        let output_path = self.scratch.path().join(OUTPUT_FILE);
        let document_url = Url::from_file_path(document).map_err(|()| {
            EngineError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                format!("`{}` is not an absolute path", document.display()),
            ))
        })?;

        let started_at = Instant::now();
        let output = Command::new(&self.binary)
            .args(browser_args(
                &self.scratch.path().join(PROFILE_DIR),
                &output_path,
                self.quiescence_budget,
            ))
            .arg(document_url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                warn!(
                    target = "certgen::export::chrome",
                    binary = %self.binary.display(),
                    error = %err,
                    "Failed to spawn browser"
                );
                if err.kind() == ErrorKind::NotFound {
                    EngineError::Unavailable(err)
                } else {
                    EngineError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "certgen::export::chrome",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                stderr = %stderr,
                "Browser exited unsuccessfully"
            );
            return Err(EngineError::Process { exit_code, stderr });
        }

        let pdf = match tokio::fs::read(&output_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(EngineError::EmptyOutput);
            }
            Err(err) => return Err(EngineError::Io(err)),
        };

        debug!(
            target = "certgen::export::chrome",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            pdf_bytes = pdf.len(),
            "Browser printed document"
        );
        Ok(pdf)
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        let ChromeSession { scratch, .. } = *self;
        tokio::task::spawn_blocking(move || scratch.close())
            .await
            .map_err(|err| EngineError::Io(io::Error::other(err)))?
            .map_err(EngineError::Io)
    }
}

fn browser_args(profile: &Path, output: &Path, quiescence_budget: Duration) -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-gpu".to_string(),
        "--hide-scrollbars".to_string(),
        "--allow-file-access-from-files".to_string(),
        "--no-pdf-header-footer".to_string(),
        "--print-to-pdf-no-header".to_string(),
        "--run-all-compositor-stages-before-draw".to_string(),
        format!("--virtual-time-budget={}", quiescence_budget.as_millis()),
        format!("--user-data-dir={}", profile.display()),
        format!("--print-to-pdf={}", output.display()),
    ]
}

/// CSS that pins the page box to the requested geometry. Chromium's CLI has
/// no paper-size flags, so the size travels through `@page`.
fn print_stylesheet(options: &PrintOptions) -> String {
    let g = &options.geometry;
    let color_adjust = if options.print_background {
        "exact"
    } else {
        "economy"
    };
    format!(
        "@page {{ size: {}px {}px; margin: {}px {}px {}px {}px; }}\n\
         html, body {{ -webkit-print-color-adjust: {color_adjust}; print-color-adjust: {color_adjust}; }}\n",
        g.width_px,
        g.height_px,
        g.margin_top_px,
        g.margin_right_px,
        g.margin_bottom_px,
        g.margin_left_px,
    )
}

/// Append a `<link>` to the print stylesheet at the end of `<head>`. Without a
/// head element the link goes right after the doctype, or first when there is
/// none, so the document keeps its rendering mode.
fn link_print_stylesheet(html: &str) -> Result<String, EngineError> {
    let link = format!(r#"<link rel="stylesheet" href="{PRINT_STYLESHEET}">"#);
    let linked = Rc::new(Cell::new(false));

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("head", {
                let linked = Rc::clone(&linked);
                let link = link.clone();
                move |el| {
                    el.append(&link, ContentType::Html);
                    linked.set(true);
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| EngineError::Io(io::Error::new(ErrorKind::InvalidData, err.to_string())))?;

    if linked.get() {
        Ok(rewritten)
    } else {
        Ok(insert_after_doctype(&rewritten, &link))
    }
}

fn insert_after_doctype(html: &str, fragment: &str) -> String {
    let start = html.len() - html.trim_start().len();
    let leading = &html[start..];
    if leading
        .get(..DOCTYPE_OPEN.len())
        .is_some_and(|open| open.eq_ignore_ascii_case(DOCTYPE_OPEN))
        && let Some(close) = leading.find('>')
    {
        let split = start + close + 1;
        return format!("{}{fragment}{}", &html[..split], &html[split..]);
    }
    format!("{fragment}{html}")
}
