//! Logging bootstrap
//!
//! Installs a `tracing` subscriber whose writer masks bot tokens and session
//! strings before anything reaches stderr.

// lazy_regex! statics use once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use std::io::{self, Write};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Bot API URL with the token in the path
static RE_TOKEN_URL: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)");

/// Bare bot token
static RE_TOKEN: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})");

/// `bot<id>:<secret>` fragments
static RE_TOKEN_PREFIXED: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+");

/// `SESSION_STRING=...` style assignments, including numbered and extra ones
static RE_SESSION_ASSIGNMENT: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"((?:EXTRA_)?SESSION_STRINGS?(?:_[0-9]+)?=)[^\s&]+");

/// Serialized user-account sessions: long url-safe base64 runs
static RE_SESSION_BLOB: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"\b[A-Za-z0-9_-]{200,}={0,2}");

/// Mask every secret in `input`
#[must_use]
pub fn redact(input: &str) -> String {
    let output = RE_TOKEN_URL.replace_all(input, "$1[TELEGRAM_TOKEN]$3");
    let output = RE_TOKEN.replace_all(&output, "[TELEGRAM_TOKEN]");
    let output = RE_TOKEN_PREFIXED.replace_all(&output, "$1[TELEGRAM_TOKEN]");
    let output = RE_SESSION_ASSIGNMENT.replace_all(&output, "$1[MASKED]");
    RE_SESSION_BLOB.replace_all(&output, "[SESSION]").into_owned()
}

struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        self.inner.write_all(redact(&s).as_bytes())?;
        // The caller's buffer was consumed in full even if the redacted length differs
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `DEBUG_MODE=true` (or `1`) turns on
/// debug output and the default keeps the relay crates at info.
pub fn init_logging() {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
    };

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug_mode {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "media_relay_core=info,media_relay_runtime=info,media_relay_transport_telegram=info,teloxide=warn,hyper=warn,reqwest=warn,tokio=warn",
            )
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_tokens_are_masked() {
        let token = "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw1";
        let line = format!("POST https://api.telegram.org/bot{token}/sendMessage failed");
        let redacted = redact(&line);
        assert!(!redacted.contains(token));
        assert!(redacted.contains("[TELEGRAM_TOKEN]"));

        assert_eq!(redact(&format!("token={token}")), "token=[TELEGRAM_TOKEN]");
    }

    #[test]
    fn session_strings_are_masked() {
        let blob = "1BVtsOK4Bu".repeat(30);
        let redacted = redact(&format!("connecting with {blob}"));
        assert_eq!(redacted, "connecting with [SESSION]");

        assert_eq!(
            redact("SESSION_STRING_2=abc123 next"),
            "SESSION_STRING_2=[MASKED] next"
        );
        assert_eq!(
            redact("EXTRA_SESSION_STRINGS=a,b"),
            "EXTRA_SESSION_STRINGS=[MASKED]"
        );
    }

    #[test]
    fn ordinary_lines_pass_through() {
        let line = "Forwarded files=3 file=Show.S01E01.mkv (700.0 MB)";
        assert_eq!(redact(line), line);
    }

    #[test]
    fn writer_reports_the_original_length() {
        let mut out = Vec::new();
        let mut writer = RedactingWriter { inner: &mut out };
        let input = b"SESSION_STRING=secret\n";
        assert_eq!(writer.write(input).expect("write"), input.len());
        assert_eq!(String::from_utf8(out).expect("utf8"), "SESSION_STRING=[MASKED]\n");
    }
}
