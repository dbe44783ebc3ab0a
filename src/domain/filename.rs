//! Deterministic file names derived from participant names.
//!
//! Two flavours exist. The on-disk name is restricted to `[A-Za-z0-9_-]` so it
//! is safe on every filesystem; the attachment name only collapses whitespace
//! and keeps accents, since mail clients display it to the recipient.

const CERTIFICATE_PREFIX: &str = "Certificado_";
const CERTIFICATE_EXTENSION: &str = ".pdf";

/// Collapse every whitespace run into a single `_`.
pub fn collapse_whitespace(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut in_whitespace = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                output.push('_');
            }
            in_whitespace = true;
        } else {
            output.push(ch);
            in_whitespace = false;
        }
    }
    output
}

/// Filesystem-safe stem: whitespace runs become `_`, then anything outside
/// `[A-Za-z0-9_-]` is dropped.
pub fn safe_file_stem(name: &str) -> String {
    collapse_whitespace(name)
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
        .collect()
}

/// Name of the certificate written to the output directory.
pub fn certificate_file_name(name: &str) -> String {
    format!(
        "{CERTIFICATE_PREFIX}{}{CERTIFICATE_EXTENSION}",
        safe_file_stem(name)
    )
}

/// Name given to the certificate when attached to an email.
pub fn attachment_file_name(name: &str) -> String {
    format!(
        "{CERTIFICATE_PREFIX}{}{CERTIFICATE_EXTENSION}",
        collapse_whitespace(name)
    )
}
