//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, GenerateArgs, GenerateOverrides, MailOverrides, PathOverrides,
    RenderOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "certgen";
const ENV_PREFIX: &str = "CERTGEN";
const DEFAULT_ROSTER: &str = "participantes.csv";
const DEFAULT_TEMPLATE: &str = "index.html";
const DEFAULT_ASSETS_DIR: &str = "imagens";
const DEFAULT_OUTPUT_DIR: &str = "certificados-gerados";
const DEFAULT_CHROME_PATH: &str = "chromium";
const DEFAULT_QUIESCENCE_BUDGET_MS: u64 = 10_000;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_SENDER_NAME: &str = "AWS Cloud Club Univali";
const DEFAULT_SUBJECT: &str = "Seu Certificado - 1º Meetup AWS Cloud Club Univali";
const DEFAULT_EVENT_TITLE: &str = "1º Meetup AWS Cloud Club Univali";

/// Fully-resolved run settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub paths: PathSettings,
    pub render: RenderSettings,
    pub batch: BatchSettings,
    pub mail: MailSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct PathSettings {
    pub roster: PathBuf,
    pub template: PathBuf,
    pub assets_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub chrome_path: PathBuf,
    pub quiescence_budget: Duration,
    /// `None` when the timeout is disabled.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub concurrency: NonZeroUsize,
    pub fail_on_error: bool,
}

/// SMTP connection fields stay optional here; whether they add up to a usable
/// channel is decided by the notification layer.
#[derive(Clone)]
pub struct MailSettings {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub sender_name: String,
    pub subject: String,
    pub event_title: String,
    pub disabled: bool,
}

impl std::fmt::Debug for MailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("sender_name", &self.sender_name)
            .field("subject", &self.subject)
            .field("event_title", &self.event_title)
            .field("disabled", &self.disabled)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid command-line or environment arguments: {0}")]
    Arguments(#[from] clap::Error),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    load_with_environment(cli, Environment::with_prefix(ENV_PREFIX).separator("__"))
}

fn load_with_environment(cli: &CliArgs, environment: Environment) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(environment);

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.resolved_command()? {
        Command::Generate(args) => raw.apply_generate_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    paths: RawPathSettings,
    render: RawRenderSettings,
    batch: RawBatchSettings,
    mail: RawMailSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_generate_overrides(&mut self, overrides: &GenerateOverrides) {
        self.apply_path_overrides(&overrides.paths);
        self.apply_render_overrides(&overrides.render);
        self.apply_mail_overrides(&overrides.mail);

        if let Some(concurrency) = overrides.concurrency {
            self.batch.concurrency = Some(concurrency);
        }
        if overrides.fail_on_error {
            self.batch.fail_on_error = Some(true);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_path_overrides(&mut self, overrides: &PathOverrides) {
        if let Some(path) = overrides.roster.as_ref() {
            self.paths.roster = Some(path.clone());
        }
        if let Some(path) = overrides.template.as_ref() {
            self.paths.template = Some(path.clone());
        }
        if let Some(path) = overrides.assets_dir.as_ref() {
            self.paths.assets_dir = Some(path.clone());
        }
        if let Some(path) = overrides.output_dir.as_ref() {
            self.paths.output_dir = Some(path.clone());
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.chrome_path.as_ref() {
            self.render.chrome_path = Some(path.clone());
        }
        if let Some(budget) = overrides.quiescence_budget_ms {
            self.render.quiescence_budget_ms = Some(budget);
        }
        if let Some(seconds) = overrides.timeout_seconds {
            self.render.timeout_seconds = Some(seconds);
        }
    }

    fn apply_mail_overrides(&mut self, overrides: &MailOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.mail.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.mail.port = Some(port);
        }
        if let Some(user) = overrides.user.as_ref() {
            self.mail.user = Some(user.clone());
        }
        if let Some(password) = overrides.password.as_ref() {
            self.mail.password = Some(password.clone());
        }
        if let Some(from) = overrides.from.as_ref() {
            self.mail.from = Some(from.clone());
        }
        if overrides.no_email {
            self.mail.disabled = Some(true);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            paths,
            render,
            batch,
            mail,
            logging,
        } = raw;

        let paths = build_path_settings(paths)?;
        let render = build_render_settings(render)?;
        let batch = build_batch_settings(batch)?;
        let mail = build_mail_settings(mail)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            paths,
            render,
            batch,
            mail,
            logging,
        })
    }
}

fn build_path_settings(paths: RawPathSettings) -> Result<PathSettings, LoadError> {
    Ok(PathSettings {
        roster: non_empty_path(paths.roster, DEFAULT_ROSTER, "paths.roster")?,
        template: non_empty_path(paths.template, DEFAULT_TEMPLATE, "paths.template")?,
        assets_dir: non_empty_path(paths.assets_dir, DEFAULT_ASSETS_DIR, "paths.assets_dir")?,
        output_dir: non_empty_path(paths.output_dir, DEFAULT_OUTPUT_DIR, "paths.output_dir")?,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let chrome_path = non_empty_path(
        render.chrome_path,
        DEFAULT_CHROME_PATH,
        "render.chrome_path",
    )?;

    let budget_ms = render
        .quiescence_budget_ms
        .unwrap_or(DEFAULT_QUIESCENCE_BUDGET_MS);
    if budget_ms == 0 {
        return Err(LoadError::invalid(
            "render.quiescence_budget_ms",
            "must be greater than zero",
        ));
    }

    let timeout_seconds = render
        .timeout_seconds
        .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS);
    let timeout = (timeout_seconds > 0).then(|| Duration::from_secs(timeout_seconds));

    Ok(RenderSettings {
        chrome_path,
        quiescence_budget: Duration::from_millis(budget_ms),
        timeout,
    })
}

fn build_batch_settings(batch: RawBatchSettings) -> Result<BatchSettings, LoadError> {
    let concurrency = NonZeroUsize::new(batch.concurrency.unwrap_or(DEFAULT_CONCURRENCY))
        .ok_or_else(|| LoadError::invalid("batch.concurrency", "must be greater than zero"))?;

    Ok(BatchSettings {
        concurrency,
        fail_on_error: batch.fail_on_error.unwrap_or(false),
    })
}

fn build_mail_settings(mail: RawMailSettings) -> Result<MailSettings, LoadError> {
    let port = mail.port.unwrap_or(DEFAULT_SMTP_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "mail.port",
            "port must be greater than zero",
        ));
    }

    Ok(MailSettings {
        host: mail.host,
        port,
        user: mail.user,
        password: mail.password,
        from: mail.from,
        sender_name: mail
            .sender_name
            .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string()),
        subject: mail.subject.unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
        event_title: mail
            .event_title
            .unwrap_or_else(|| DEFAULT_EVENT_TITLE.to_string()),
        disabled: mail.disabled.unwrap_or(false),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPathSettings {
    roster: Option<PathBuf>,
    template: Option<PathBuf>,
    assets_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    chrome_path: Option<PathBuf>,
    quiescence_budget_ms: Option<u64>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBatchSettings {
    concurrency: Option<usize>,
    fail_on_error: Option<bool>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawMailSettings {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    from: Option<String>,
    sender_name: Option<String>,
    subject: Option<String>,
    event_title: Option<String>,
    disabled: Option<bool>,
}

impl std::fmt::Debug for RawMailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMailSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
