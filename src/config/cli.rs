use std::path::PathBuf;

use clap::{Args, FromArgMatches, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the certgen binary.
#[derive(Debug, Parser)]
#[command(
    name = "certgen",
    version,
    about = "Generate personalised event certificates from a CSV roster"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CERTGEN_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl CliArgs {
    /// The requested command, falling back to `generate` when none was given.
    ///
    /// The fallback is parsed by clap rather than built from `Default`, so
    /// `SMTP_*` and the other environment-backed flags still apply.
    pub fn resolved_command(&self) -> Result<Command, clap::Error> {
        match self.command.as_ref() {
            Some(command) => Ok(command.clone()),
            None => GenerateArgs::from_environment().map(|args| Command::Generate(Box::new(args))),
        }
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render (and optionally email) a certificate for every roster row.
    Generate(Box<GenerateArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub overrides: GenerateOverrides,

    /// Write the batch report as JSON to this file.
    #[arg(long = "report", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub report: Option<PathBuf>,
}

impl GenerateArgs {
    /// `generate` invoked without flags: only environment fallbacks are set.
    pub fn from_environment() -> Result<Self, clap::Error> {
        let matches =
            Self::augment_args(clap::Command::new("generate")).try_get_matches_from(["generate"])?;
        Self::from_arg_matches(&matches)
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct PathOverrides {
    /// Override the CSV roster path.
    #[arg(long = "roster", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub roster: Option<PathBuf>,

    /// Override the HTML template path.
    #[arg(long = "template", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub template: Option<PathBuf>,

    /// Override the directory that `imagens/` references resolve against.
    #[arg(long = "assets-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub assets_dir: Option<PathBuf>,

    /// Override the directory certificates are written to.
    #[arg(long = "output-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the Chromium executable used for PDF export.
    #[arg(long = "chrome-path", value_name = "PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Override how long the browser may wait for resources before printing.
    #[arg(long = "render-quiescence-budget-ms", value_name = "MILLIS")]
    pub quiescence_budget_ms: Option<u64>,

    /// Override the per-certificate export timeout (0 disables it).
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MailOverrides {
    /// SMTP relay host.
    #[arg(long = "smtp-host", env = "SMTP_HOST", value_name = "HOST")]
    pub host: Option<String>,

    /// SMTP relay port (465 uses implicit TLS).
    #[arg(long = "smtp-port", env = "SMTP_PORT", value_name = "PORT")]
    pub port: Option<u16>,

    /// SMTP login user.
    #[arg(long = "smtp-user", env = "SMTP_USER", value_name = "USER")]
    pub user: Option<String>,

    /// SMTP login password.
    #[arg(
        long = "smtp-pass",
        env = "SMTP_PASS",
        value_name = "PASSWORD",
        hide_env_values = true
    )]
    pub password: Option<String>,

    /// Sender address; defaults to the SMTP user.
    #[arg(long = "smtp-from", env = "SMTP_FROM", value_name = "ADDRESS")]
    pub from: Option<String>,

    /// Generate certificates without emailing them.
    #[arg(long = "no-email", action = clap::ArgAction::SetTrue)]
    pub no_email: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GenerateOverrides {
    #[command(flatten)]
    pub paths: PathOverrides,

    #[command(flatten)]
    pub render: RenderOverrides,

    #[command(flatten)]
    pub mail: MailOverrides,

    /// Override how many certificates are processed at once.
    #[arg(long = "concurrency", value_name = "COUNT")]
    pub concurrency: Option<usize>,

    /// Exit with status 2 when any certificate or email fails.
    #[arg(long = "fail-on-error", action = clap::ArgAction::SetTrue)]
    pub fail_on_error: bool,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
