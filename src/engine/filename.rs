//! Destination filename resolution.
//!
//! Precedence, first hit wins:
//! 1. `filename*` (RFC 5987) from `Content-Disposition`, percent-decoded
//! 2. `filename` from `Content-Disposition`, percent-decoded if it has escapes
//! 3. the last path segment of the request URL
//! 4. [`FALLBACK_FILENAME`]

use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;
use reqwest::header::{self, HeaderMap};
use url::Url;

pub const FALLBACK_FILENAME: &str = "downloaded_file";

static EXTENDED_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\*\s*=\s*["']?([A-Za-z0-9!#$&+.^_`|~-]*)'[^']*'([^;\s"']+)"#)
        .expect("static regex")
});

static PLAIN_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*["']?([^"';]*)"#).expect("static regex")
});

/// Where a resolved filename came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenameSource {
    ExtendedParameter,
    Parameter,
    UrlPath,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFilename {
    pub name: String,
    pub source: FilenameSource,
}

#[tracing::instrument(level = "trace", skip(headers), ret)]
pub fn resolve_filename(headers: &HeaderMap, url: &Url) -> ResolvedFilename {
    let disposition = headers
        .get(header::CONTENT_DISPOSITION)
        .map(|value| header_text(value.as_bytes()));

    if let Some(disposition) = disposition.as_deref() {
        if let Some(name) = extended_parameter(disposition).and_then(|n| sanitize(&n)) {
            return ResolvedFilename {
                name,
                source: FilenameSource::ExtendedParameter,
            };
        }
        if let Some(name) = plain_parameter(disposition).and_then(|n| sanitize(&n)) {
            return ResolvedFilename {
                name,
                source: FilenameSource::Parameter,
            };
        }
    }

    if let Some(name) = last_path_segment(url).and_then(|n| sanitize(&n)) {
        return ResolvedFilename {
            name,
            source: FilenameSource::UrlPath,
        };
    }

    ResolvedFilename {
        name: FALLBACK_FILENAME.to_string(),
        source: FilenameSource::Fallback,
    }
}

/// Header bytes as text: UTF-8 when valid, ISO-8859-1 otherwise
fn header_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

/// `filename*=charset'lang'value`
pub fn extended_parameter(disposition: &str) -> Option<String> {
    let caps = EXTENDED_FILENAME.captures(disposition)?;
    let charset = caps.get(1).map_or("", |m| m.as_str());
    let raw = urlencoding::decode_binary(caps.get(2)?.as_str().as_bytes());

    let decoded = if charset.eq_ignore_ascii_case("iso-8859-1") {
        raw.iter().map(|&b| char::from(b)).collect()
    } else {
        String::from_utf8_lossy(&raw).into_owned()
    };
    Some(decoded)
}

/// `filename="value"`, `filename='value'` or `filename=value`
pub fn plain_parameter(disposition: &str) -> Option<String> {
    let caps = PLAIN_FILENAME.captures(disposition)?;
    let value = caps.get(1)?.as_str().trim();
    if value.is_empty() {
        return None;
    }
    Some(percent_decode_if_escaped(value).into_owned())
}

fn last_path_segment(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    if segment.is_empty() {
        return None;
    }
    Some(percent_decode_if_escaped(segment).into_owned())
}

fn percent_decode_if_escaped(value: &str) -> Cow<'_, str> {
    if !value.contains('%') {
        return Cow::Borrowed(value);
    }
    match urlencoding::decode(value) {
        Ok(decoded) => decoded,
        Err(_) => {
            let bytes = urlencoding::decode_binary(value.as_bytes());
            Cow::Owned(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

/// Reduce a name to a single safe path component
fn sanitize(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}
