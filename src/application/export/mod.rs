//! Certificate export: drives one rendering-engine session per document.
//!
//! The exporter owns the lifecycle policy (launch, load, print, close) while
//! the engine adapters only know how to talk to a concrete renderer. Teardown
//! runs on every path, including engine failures and timeouts.

mod types;

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use metrics::histogram;
use tracing::{debug, warn};

pub use types::{
    CONTENT_HEIGHT_PX, CONTENT_WIDTH_PX, CertificateArtifact, EngineError, EngineSession,
    ExportError, PAGE_PADDING_PX, PageGeometry, PrintOptions, RenderEngine,
};

use crate::{application::template::RenderedDocument, infra::telemetry::METRIC_EXPORT_MS};

pub struct DocumentExporter {
    engine: Arc<dyn RenderEngine>,
    options: PrintOptions,
    timeout: Option<Duration>,
}

impl DocumentExporter {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            engine,
            options: PrintOptions::certificate(),
            timeout: None,
        }
    }

    /// Bound the load + print phase. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn export(
        &self,
        document: &RenderedDocument,
        output_path: &Path,
    ) -> Result<CertificateArtifact, ExportError> {
        let started_at = Instant::now();
        let mut session = self.engine.launch().await?;

        let printed = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, print(session.as_mut(), document, &self.options))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ExportError::Timeout { limit }),
                }
            }
            None => print(session.as_mut(), document, &self.options).await,
        };

        if let Err(err) = session.close().await {
            warn!(
                target = "certgen::export",
                output = %output_path.display(),
                error = %err,
                "Failed to tear down rendering session"
            );
        }

        let pdf = printed?;
        tokio::fs::write(output_path, &pdf)
            .await
            .map_err(|source| ExportError::Io {
                path: output_path.to_path_buf(),
                source,
            })?;

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!(METRIC_EXPORT_MS).record(elapsed_ms as f64);
        debug!(
            target = "certgen::export",
            output = %output_path.display(),
            pdf_bytes = pdf.len(),
            elapsed_ms,
            "Certificate exported"
        );

        Ok(CertificateArtifact {
            path: output_path.to_path_buf(),
            bytes: pdf.len() as u64,
        })
    }
}

async fn print(
    session: &mut dyn EngineSession,
    document: &RenderedDocument,
    options: &PrintOptions,
) -> Result<Vec<u8>, ExportError> {
    session.load(document.html()).await?;
    let pdf = session.print_pdf(options).await?;
    if pdf.is_empty() {
        return Err(EngineError::EmptyOutput.into());
    }
    Ok(pdf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Journal {
        launched: usize,
        closed: usize,
        loaded: Vec<String>,
        printed_with: Vec<PrintOptions>,
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        FailPrint,
        Hang,
    }

    struct FakeEngine {
        journal: Arc<Mutex<Journal>>,
        behaviour: Behaviour,
    }

    struct FakeSession {
        journal: Arc<Mutex<Journal>>,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl RenderEngine for FakeEngine {
        async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError> {
            self.journal.lock().unwrap().launched += 1;
            Ok(Box::new(FakeSession {
                journal: Arc::clone(&self.journal),
                behaviour: self.behaviour,
            }))
        }
    }

    #[async_trait]
    impl EngineSession for FakeSession {
        async fn load(&mut self, html: &str) -> Result<(), EngineError> {
            self.journal.lock().unwrap().loaded.push(html.to_string());
            Ok(())
        }

        async fn print_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, EngineError> {
            self.journal.lock().unwrap().printed_with.push(*options);
            match self.behaviour {
                Behaviour::Succeed => Ok(b"%PDF-1.7 fake".to_vec()),
                Behaviour::FailPrint => Err(EngineError::Process {
                    exit_code: Some(1),
                    stderr: "boom".to_string(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn close(self: Box<Self>) -> Result<(), EngineError> {
            self.journal.lock().unwrap().closed += 1;
            Ok(())
        }
    }

    fn exporter(behaviour: Behaviour) -> (DocumentExporter, Arc<Mutex<Journal>>) {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let engine = FakeEngine {
            journal: Arc::clone(&journal),
            behaviour,
        };
        (DocumentExporter::new(Arc::new(engine)), journal)
    }

    #[tokio::test]
    async fn exports_with_fixed_geometry_and_closes_session() {
        let dir = TempDir::new().expect("temp dir");
        let output = dir.path().join("Certificado_Ana.pdf");
        let (exporter, journal) = exporter(Behaviour::Succeed);

        let artifact = exporter
            .export(&RenderedDocument::new("<p>Ana</p>"), &output)
            .await
            .expect("export succeeds");

        assert_eq!(artifact.path, output);
        assert_eq!(std::fs::read(&output).expect("pdf"), b"%PDF-1.7 fake");

        let journal = journal.lock().unwrap();
        assert_eq!(journal.launched, 1);
        assert_eq!(journal.closed, 1);
        assert_eq!(journal.loaded, vec!["<p>Ana</p>".to_string()]);
        assert_eq!(journal.printed_with.len(), 1);
        let options = journal.printed_with[0];
        assert_eq!(options.geometry.width_px, 1170);
        assert_eq!(options.geometry.height_px, 840);
        assert_eq!(options.geometry, PageGeometry::certificate());
        assert!(options.print_background);
    }

    #[tokio::test]
    async fn engine_failure_still_closes_session_and_writes_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let output = dir.path().join("out.pdf");
        let (exporter, journal) = exporter(Behaviour::FailPrint);

        let err = exporter
            .export(&RenderedDocument::new("<p/>"), &output)
            .await
            .expect_err("engine failure");

        assert!(matches!(err, ExportError::Render(EngineError::Process { .. })));
        assert!(!output.exists());
        assert_eq!(journal.lock().unwrap().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_aborts_render_and_closes_session() {
        let dir = TempDir::new().expect("temp dir");
        let output = dir.path().join("out.pdf");
        let (exporter, journal) = exporter(Behaviour::Hang);
        let exporter = exporter.with_timeout(Some(Duration::from_secs(5)));

        let err = exporter
            .export(&RenderedDocument::new("<p/>"), &output)
            .await
            .expect_err("timeout");

        assert!(matches!(err, ExportError::Timeout { .. }));
        assert_eq!(journal.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn unwritable_output_is_an_io_error() {
        let dir = TempDir::new().expect("temp dir");
        let output = dir.path().join("missing-dir").join("out.pdf");
        let (exporter, journal) = exporter(Behaviour::Succeed);

        let err = exporter
            .export(&RenderedDocument::new("<p/>"), &output)
            .await
            .expect_err("io failure");

        assert!(matches!(err, ExportError::Io { .. }));
        assert_eq!(journal.lock().unwrap().closed, 1);
    }
}
