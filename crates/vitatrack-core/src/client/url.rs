//! URL resolution: path parameters, base URL joining and query strings

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use url::Url;

use crate::error::RawError;
use crate::types::{QueryValue, RequestConfig};

/// Characters escaped inside a substituted path segment
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn param_pattern() -> Option<&'static Regex> {
    static PARAM_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    PARAM_REGEX
        .get_or_init(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").ok())
        .as_ref()
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Split an absolute URL into scheme plus authority and the remainder
///
/// Relative URLs have no origin part.
fn split_origin(url: &str) -> (&str, &str) {
    if !is_absolute(url) {
        return ("", url);
    }
    let authority_start = url.find("://").map_or(0, |i| i + 3);
    match url[authority_start..].find(|c: char| matches!(c, '/' | '?' | '#')) {
        Some(i) => url.split_at(authority_start + i),
        None => (url, ""),
    }
}

/// Replace `:name` tokens in the path from `path_params`, percent-encoding each value
pub(crate) fn substitute_path_params(config: &RequestConfig) -> Result<String, RawError> {
    let Some(pattern) = param_pattern() else {
        return Ok(config.url.clone());
    };

    let (origin, path) = split_origin(&config.url);
    let mut missing = Vec::new();
    let substituted = pattern.replace_all(path, |caps: &Captures<'_>| {
        let name = &caps[1];
        match config.path_params.get(name) {
            Some(value) => utf8_percent_encode(value, SEGMENT).to_string(),
            None => {
                missing.push(name.to_string());
                caps[0].to_string()
            }
        }
    });

    if !missing.is_empty() {
        return Err(RawError::InvalidRequest(format!(
            "Unresolved path parameter(s) in '{}': {}",
            config.url,
            missing.join(", ")
        )));
    }
    Ok(format!("{}{}", origin, substituted))
}

/// Full URL for a request: substituted path, joined onto `base_url`, plus query
pub(crate) fn resolve_url(base_url: &str, config: &RequestConfig) -> Result<String, RawError> {
    let path = substitute_path_params(config)?;
    let joined = if is_absolute(&path) {
        path
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    let mut url = Url::parse(&joined)
        .map_err(|e| RawError::InvalidRequest(format!("Invalid URL '{}': {}", joined, e)))?;

    if !config.query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &config.query {
            match value {
                QueryValue::Single(v) => {
                    pairs.append_pair(key, v);
                }
                QueryValue::Multiple(values) => {
                    let list_key = format!("{}[]", key);
                    for v in values {
                        pairs.append_pair(&list_key, v);
                    }
                }
            }
        }
    }

    Ok(url.to_string())
}
