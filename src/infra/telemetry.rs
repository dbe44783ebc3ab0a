use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const METRIC_CERTIFICATES_GENERATED: &str = "certgen_certificates_generated_total";
pub const METRIC_CERTIFICATES_FAILED: &str = "certgen_certificates_failed_total";
pub const METRIC_RECORDS_SKIPPED: &str = "certgen_records_skipped_total";
pub const METRIC_EMAILS_SENT: &str = "certgen_emails_sent_total";
pub const METRIC_EMAILS_FAILED: &str = "certgen_emails_failed_total";
pub const METRIC_EXPORT_MS: &str = "certgen_export_ms";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CERTIFICATES_GENERATED,
            Unit::Count,
            "Total number of certificates exported to disk."
        );
        describe_counter!(
            METRIC_CERTIFICATES_FAILED,
            Unit::Count,
            "Total number of records whose certificate could not be exported."
        );
        describe_counter!(
            METRIC_RECORDS_SKIPPED,
            Unit::Count,
            "Total number of roster rows skipped for incomplete data."
        );
        describe_counter!(
            METRIC_EMAILS_SENT,
            Unit::Count,
            "Total number of certificate emails accepted by the SMTP relay."
        );
        describe_counter!(
            METRIC_EMAILS_FAILED,
            Unit::Count,
            "Total number of certificate emails that failed to send."
        );
        describe_histogram!(
            METRIC_EXPORT_MS,
            Unit::Milliseconds,
            "Wall-clock time spent exporting one certificate, engine lifecycle included."
        );
    });
}
