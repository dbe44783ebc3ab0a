use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use certgen::{
    application::{
        batch::{BatchRunner, DispatchStatus, RecordOutcome},
        error::AppError,
        export::{DocumentExporter, EngineError, EngineSession, PrintOptions, RenderEngine},
        notify::{
            ChannelConfig, DeliveryError, MailChannel, MailTemplate, NotificationDispatcher,
            OutgoingMail,
        },
        roster::{RosterError, RosterSource},
        template::CertificateTemplate,
    },
    domain::entities::ParticipantRecord,
};
use tempfile::TempDir;
use url::Url;

const TEMPLATE: &str = r#"<html><body>
<img src="imagens/logo.png">
<h1>{{ NOME_PARTICIPANTE }}</h1>
<p>{{DATA_EVENTO}}</p>
</body></html>"#;

/// Prints the loaded markup back as the "PDF" so tests can inspect it.
/// Documents containing `poison` fail to print.
#[derive(Default)]
struct EchoEngine {
    launches: Mutex<usize>,
    closes: Arc<Mutex<usize>>,
}

struct EchoSession {
    html: Option<String>,
    closes: Arc<Mutex<usize>>,
}

#[async_trait]
impl RenderEngine for EchoEngine {
    async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        *self.launches.lock().unwrap() += 1;
        Ok(Box::new(EchoSession {
            html: None,
            closes: Arc::clone(&self.closes),
        }))
    }
}

#[async_trait]
impl EngineSession for EchoSession {
    async fn load(&mut self, html: &str) -> Result<(), EngineError> {
        self.html = Some(html.to_string());
        Ok(())
    }

    async fn print_pdf(&mut self, _options: &PrintOptions) -> Result<Vec<u8>, EngineError> {
        let html = self.html.as_deref().ok_or(EngineError::NotLoaded)?;
        if html.contains("poison") {
            return Err(EngineError::Process {
                exit_code: Some(1),
                stderr: "renderer crashed".to_string(),
            });
        }
        Ok(html.as_bytes().to_vec())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}

/// Echoes like [`EchoEngine`] but lingers while printing, recording the peak
/// number of prints in flight.
#[derive(Default)]
struct OverlapEngine {
    in_flight: Arc<Mutex<usize>>,
    peak: Arc<Mutex<usize>>,
}

struct OverlapSession {
    html: Option<String>,
    in_flight: Arc<Mutex<usize>>,
    peak: Arc<Mutex<usize>>,
}

#[async_trait]
impl RenderEngine for OverlapEngine {
    async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        Ok(Box::new(OverlapSession {
            html: None,
            in_flight: Arc::clone(&self.in_flight),
            peak: Arc::clone(&self.peak),
        }))
    }
}

#[async_trait]
impl EngineSession for OverlapSession {
    async fn load(&mut self, html: &str) -> Result<(), EngineError> {
        self.html = Some(html.to_string());
        Ok(())
    }

    async fn print_pdf(&mut self, _options: &PrintOptions) -> Result<Vec<u8>, EngineError> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            *in_flight += 1;
            let mut peak = self.peak.lock().unwrap();
            *peak = (*peak).max(*in_flight);
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        *self.in_flight.lock().unwrap() -= 1;
        let html = self.html.as_deref().ok_or(EngineError::NotLoaded)?;
        Ok(html.as_bytes().to_vec())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<OutgoingMail>>,
    reject: Option<&'static str>,
}

#[async_trait]
impl MailChannel for RecordingChannel {
    async fn send(&self, mail: OutgoingMail) -> Result<(), DeliveryError> {
        if self.reject == Some(mail.recipient.as_str()) {
            return Err(DeliveryError::transport("550 mailbox unavailable"));
        }
        self.sent.lock().unwrap().push(mail);
        Ok(())
    }
}

struct BrokenRoster;

impl RosterSource for BrokenRoster {
    fn load_records(&self) -> Result<Vec<ParticipantRecord>, RosterError> {
        Err(RosterError::format("unterminated quote on line 3"))
    }
}

fn record(row: usize, name: &str, date: &str, email: &str) -> ParticipantRecord {
    let mut record = ParticipantRecord::new(row);
    record.set_field("NOME_PARTICIPANTE", name);
    record.set_field("DATA_EVENTO", date);
    record.set_field("Email", email);
    record
}

fn template() -> CertificateTemplate {
    let assets = Url::parse("file:///srv/certgen/imagens/").expect("assets url");
    CertificateTemplate::from_markup(TEMPLATE, &assets)
}

fn smtp_config() -> Option<ChannelConfig> {
    ChannelConfig::from_parts(
        Some("smtp.example.com".into()),
        None,
        Some("bot@example.com".into()),
        Some("secret".into()),
        None,
    )
}

fn runner(
    records: Vec<ParticipantRecord>,
    engine: Arc<EchoEngine>,
    dispatcher: NotificationDispatcher,
    output: &Path,
) -> BatchRunner {
    BatchRunner::new(
        Arc::new(records),
        template(),
        DocumentExporter::new(engine),
        dispatcher,
        output,
    )
}

#[tokio::test]
async fn renders_personalised_certificates_in_roster_order() {
    let dir = TempDir::new().expect("temp dir");
    let output = dir.path().join("certificados-gerados");
    let engine = Arc::new(EchoEngine::default());
    let runner = runner(
        vec![
            record(1, "  Ana   Silva ", "10/05/2024", "ana@x.com"),
            record(2, "João $1 Souza", "11/05/2024", "joao@x.com"),
        ],
        Arc::clone(&engine),
        NotificationDispatcher::unconfigured(MailTemplate::default()),
        &output,
    );

    let report = runner.run().await.expect("batch runs");

    assert_eq!(report.total, 2);
    assert_eq!(report.generated, 2);
    assert_eq!(report.sent, 0);

    let ana = std::fs::read_to_string(output.join("Certificado_Ana_Silva.pdf")).expect("ana pdf");
    assert!(ana.contains("<h1>Ana   Silva</h1>"));
    assert!(ana.contains("<p>10/05/2024</p>"));
    assert!(ana.contains(r#"src="file:///srv/certgen/imagens/logo.png""#));
    assert!(!ana.contains("{{"));

    let joao = std::fs::read_to_string(output.join("Certificado_Joo_1_Souza.pdf")).expect("joao pdf");
    assert!(joao.contains("<h1>João $1 Souza</h1>"));

    assert!(matches!(
        &report.outcomes[0],
        RecordOutcome::Done { row: 1, dispatch: DispatchStatus::NotDispatched, .. }
    ));
    assert_eq!(*engine.closes.lock().unwrap(), 2);
}

#[tokio::test]
async fn failing_record_does_not_disturb_its_neighbours() {
    let dir = TempDir::new().expect("temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let engine = Arc::new(EchoEngine::default());
    let runner = runner(
        vec![
            record(1, "Ana", "10/05/2024", "ana@x.com"),
            record(2, "poison", "10/05/2024", "p@x.com"),
            record(3, "Bruno", "10/05/2024", "bruno@x.com"),
        ],
        Arc::clone(&engine),
        NotificationDispatcher::new(MailTemplate::default(), smtp_config(), channel.clone()),
        dir.path(),
    );

    let report = runner.run().await.expect("batch runs");

    assert_eq!(report.generated, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.sent, 2);
    assert!(report.has_failures());
    assert!(matches!(&report.outcomes[1], RecordOutcome::Failed { row: 2, .. }));
    assert!(dir.path().join("Certificado_Ana.pdf").exists());
    assert!(!dir.path().join("Certificado_poison.pdf").exists());
    assert!(dir.path().join("Certificado_Bruno.pdf").exists());

    let recipients: Vec<_> = channel
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|mail| mail.recipient.clone())
        .collect();
    assert_eq!(recipients, vec!["ana@x.com", "bruno@x.com"]);
    assert_eq!(*engine.closes.lock().unwrap(), 3);
}

#[tokio::test]
async fn incomplete_rows_are_skipped_without_rendering_or_mail() {
    let dir = TempDir::new().expect("temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let engine = Arc::new(EchoEngine::default());
    let mut no_email = ParticipantRecord::new(3);
    no_email.set_field("NOME_PARTICIPANTE", "Carla");
    no_email.set_field("DATA_EVENTO", "10/05/2024");

    let runner = runner(
        vec![
            record(1, "Ana Silva", "10/05/2024", "ana@x.com"),
            record(2, "   ", "10/05/2024", "b@x.com"),
            no_email,
        ],
        Arc::clone(&engine),
        NotificationDispatcher::new(MailTemplate::default(), smtp_config(), channel.clone()),
        dir.path(),
    );

    let report = runner.run().await.expect("batch runs");

    assert_eq!(report.skipped, 2);
    assert_eq!(report.generated, 1);
    assert!(!report.has_failures());
    assert_eq!(
        report.outcomes[1],
        RecordOutcome::Skipped {
            row: 2,
            missing: vec!["NOME_PARTICIPANTE"],
        }
    );
    assert_eq!(
        report.outcomes[2],
        RecordOutcome::Skipped {
            row: 3,
            missing: vec!["Email"],
        }
    );
    assert_eq!(*engine.launches.lock().unwrap(), 1);
    assert_eq!(channel.sent.lock().unwrap().len(), 1);

    let written: Vec<_> = std::fs::read_dir(dir.path())
        .expect("list output")
        .map(|entry| {
            entry
                .expect("entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(written, vec!["Certificado_Ana_Silva.pdf"]);
}

#[tokio::test]
async fn incomplete_channel_config_never_touches_the_channel() {
    let dir = TempDir::new().expect("temp dir");
    let channel = Arc::new(RecordingChannel::default());
    let incomplete = ChannelConfig::from_parts(
        Some("smtp.example.com".into()),
        None,
        Some("bot@example.com".into()),
        None,
        None,
    );
    let runner = runner(
        vec![record(1, "Ana", "10/05/2024", "ana@x.com")],
        Arc::new(EchoEngine::default()),
        NotificationDispatcher::new(MailTemplate::default(), incomplete, channel.clone()),
        dir.path(),
    );

    let report = runner.run().await.expect("batch runs");

    assert!(matches!(
        &report.outcomes[0],
        RecordOutcome::Done { dispatch: DispatchStatus::NotDispatched, .. }
    ));
    assert!(channel.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_email_marks_dispatch_failed_but_keeps_certificate() {
    let dir = TempDir::new().expect("temp dir");
    let channel = Arc::new(RecordingChannel {
        reject: Some("ana@x.com"),
        ..RecordingChannel::default()
    });
    let runner = runner(
        vec![
            record(1, "Ana", "10/05/2024", "ana@x.com"),
            record(2, "Bruno", "10/05/2024", "bruno@x.com"),
        ],
        Arc::new(EchoEngine::default()),
        NotificationDispatcher::new(MailTemplate::default(), smtp_config(), channel.clone()),
        dir.path(),
    );

    let report = runner.run().await.expect("batch runs");

    assert_eq!(report.generated, 2);
    assert_eq!(report.dispatch_failed, 1);
    assert_eq!(report.sent, 1);
    assert!(dir.path().join("Certificado_Ana.pdf").exists());
    assert!(matches!(
        &report.outcomes[0],
        RecordOutcome::Done { dispatch: DispatchStatus::Failed { .. }, .. }
    ));
}

#[tokio::test]
async fn concurrent_batches_report_in_roster_order() {
    let dir = TempDir::new().expect("temp dir");
    let records = (1..=8)
        .map(|row| record(row, &format!("Pessoa {row}"), "10/05/2024", "p@x.com"))
        .collect();
    let runner = runner(
        records,
        Arc::new(EchoEngine::default()),
        NotificationDispatcher::unconfigured(MailTemplate::default()),
        dir.path(),
    )
    .with_concurrency(4);

    let report = runner.run().await.expect("batch runs");

    let rows: Vec<_> = report.outcomes.iter().map(RecordOutcome::row).collect();
    assert_eq!(rows, (1..=8).collect::<Vec<_>>());
    assert_eq!(report.generated, 8);
}

#[tokio::test]
async fn colliding_file_names_never_export_at_once() {
    let dir = TempDir::new().expect("temp dir");
    let engine = Arc::new(OverlapEngine::default());
    let runner = BatchRunner::new(
        Arc::new(vec![
            record(1, "Ana Silva", "10/05/2024", "a@x.com"),
            record(2, "Ana  Silva", "11/05/2024", "b@x.com"),
        ]),
        template(),
        DocumentExporter::new(engine.clone()),
        NotificationDispatcher::unconfigured(MailTemplate::default()),
        dir.path(),
    )
    .with_concurrency(2);

    let report = runner.run().await.expect("batch runs");

    assert_eq!(report.generated, 2);
    assert_eq!(*engine.peak.lock().unwrap(), 1);
    let written =
        std::fs::read_to_string(dir.path().join("Certificado_Ana_Silva.pdf")).expect("pdf");
    assert!(written.contains("<h1>Ana  Silva</h1>"), "later row should win: {written}");
}

#[tokio::test]
async fn distinct_file_names_export_concurrently() {
    let dir = TempDir::new().expect("temp dir");
    let engine = Arc::new(OverlapEngine::default());
    let runner = BatchRunner::new(
        Arc::new(vec![
            record(1, "Ana", "10/05/2024", "a@x.com"),
            record(2, "Bruno", "10/05/2024", "b@x.com"),
        ]),
        template(),
        DocumentExporter::new(engine.clone()),
        NotificationDispatcher::unconfigured(MailTemplate::default()),
        dir.path(),
    )
    .with_concurrency(2);

    runner.run().await.expect("batch runs");

    assert_eq!(*engine.peak.lock().unwrap(), 2);
}

#[tokio::test]
async fn roster_failure_aborts_before_processing() {
    let dir = TempDir::new().expect("temp dir");
    let output = dir.path().join("out");
    let engine = Arc::new(EchoEngine::default());
    let runner = BatchRunner::new(
        Arc::new(BrokenRoster),
        template(),
        DocumentExporter::new(engine.clone()),
        NotificationDispatcher::unconfigured(MailTemplate::default()),
        &output,
    );

    let err = runner.run().await.expect_err("roster failure");

    assert!(matches!(err, AppError::Roster(RosterError::Format { .. })));
    assert!(output.is_dir());
    assert_eq!(*engine.launches.lock().unwrap(), 0);
}
