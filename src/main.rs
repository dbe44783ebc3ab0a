use std::{path::Path, process, sync::Arc};

use certgen::{
    application::{
        batch::{BatchReport, BatchRunner},
        error::{AppError, error_chain},
        export::DocumentExporter,
        notify::{ChannelConfig, MailTemplate, NotificationDispatcher},
        template::CertificateTemplate,
    },
    config::{self, MailSettings},
    infra::{
        chrome::ChromeEngine, error::InfraError, roster::CsvRoster, smtp::SmtpChannel, telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

/// Exit status when `fail_on_error` is set and the batch had failures.
const EXIT_BATCH_FAILURES: i32 = 2;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(RunStatus::Clean) => {}
        Ok(RunStatus::Failures) => process::exit(EXIT_BATCH_FAILURES),
        Err(error) => {
            report_application_error(&error);
            process::exit(1);
        }
    }
}

enum RunStatus {
    Clean,
    Failures,
}

fn report_application_error(error: &AppError) {
    let chain = error_chain(error);
    if dispatcher::has_been_set() {
        error!(kind = error.kind(), error = %error, chain = ?chain, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(kind = error.kind(), error = %error, chain = ?chain, "application error");
    });
}

async fn run() -> Result<RunStatus, AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args
        .resolved_command()
        .map_err(config::LoadError::from)?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Generate(args) => run_generate(settings, *args).await,
    }
}

async fn run_generate(
    settings: config::Settings,
    args: config::GenerateArgs,
) -> Result<RunStatus, AppError> {
    let template = CertificateTemplate::load(&settings.paths.template, &settings.paths.assets_dir)?;
    let roster = Arc::new(CsvRoster::new(settings.paths.roster.clone()));
    let engine = Arc::new(ChromeEngine::new(
        settings.render.chrome_path.clone(),
        settings.render.quiescence_budget,
    ));
    let exporter = DocumentExporter::new(engine).with_timeout(settings.render.timeout);
    let dispatcher = build_dispatcher(&settings.mail)?;

    let runner = BatchRunner::new(
        roster,
        template,
        exporter,
        dispatcher,
        settings.paths.output_dir.clone(),
    )
    .with_concurrency(settings.batch.concurrency.get());

    let report = runner.run().await?;

    if let Some(path) = args.report.as_deref() {
        write_report(path, &report).await?;
    }

    if settings.batch.fail_on_error && report.has_failures() {
        warn!(
            target = "certgen::batch",
            failed = report.failed,
            dispatch_failed = report.dispatch_failed,
            "Batch finished with failures"
        );
        return Ok(RunStatus::Failures);
    }
    Ok(RunStatus::Clean)
}

fn build_dispatcher(mail: &MailSettings) -> Result<NotificationDispatcher, AppError> {
    let template = MailTemplate::from(mail);
    let Some(channel_config) = ChannelConfig::from_settings(mail) else {
        info!(
            target = "certgen::notify",
            disabled = mail.disabled,
            "SMTP not configured; certificates will not be emailed"
        );
        return Ok(NotificationDispatcher::unconfigured(template));
    };

    let channel = Arc::new(SmtpChannel::new(&channel_config)?);
    info!(
        target = "certgen::notify",
        host = %channel_config.host,
        port = channel_config.port,
        implicit_tls = channel_config.implicit_tls(),
        "Email delivery enabled"
    );
    Ok(NotificationDispatcher::new(
        template,
        Some(channel_config),
        channel,
    ))
}

async fn write_report(path: &Path, report: &BatchReport) -> Result<(), AppError> {
    let json = serde_json::to_vec_pretty(report)
        .map_err(|err| AppError::unexpected(format!("failed to encode batch report: {err}")))?;
    tokio::fs::write(path, json)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "certgen::batch",
        path = %path.display(),
        "Batch report written"
    );
    Ok(())
}
