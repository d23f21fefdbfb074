use std::io::Read;
use std::time::Duration;

use crate::error::ReadError;
use crate::reader::{SourcePath, SourceReader};

pub(crate) const FETCH_TIMEOUT_SECS: u64 = 30;
pub(crate) const MAX_RESPONSE_BYTES: u64 = 8 * 1024 * 1024;

/// HTTP(S) reader for absolute URLs.
pub struct HttpReader;

impl HttpReader {
    pub fn new() -> Self {
        HttpReader
    }
}

impl Default for HttpReader {
    fn default() -> Self {
        HttpReader::new()
    }
}

/// Fetch `url`, reporting failures against `reference` (the reference as the
/// user wrote it, which for the git-hosting reader differs from the URL).
pub(crate) fn fetch(url: &str, reference: &str) -> Result<String, ReadError> {
    let request = ureq::get(url).timeout(Duration::from_secs(FETCH_TIMEOUT_SECS));
    match request.call() {
        Ok(response) => read_response(response, reference),
        Err(ureq::Error::Status(status, _response)) => match status {
            404 => Err(ReadError::NotFound {
                reference: reference.to_string(),
                detail: format!("remote returned status {}", status),
            }),
            403 | 429 => Err(ReadError::RateLimited {
                reference: reference.to_string(),
            }),
            _ => Err(ReadError::Status {
                reference: reference.to_string(),
                status,
            }),
        },
        Err(err) => {
            let detail = err.to_string();
            if detail.contains("timed out") {
                Err(ReadError::Timeout {
                    reference: reference.to_string(),
                    seconds: FETCH_TIMEOUT_SECS,
                })
            } else {
                Err(ReadError::Io {
                    reference: reference.to_string(),
                    detail,
                })
            }
        }
    }
}

fn read_response(response: ureq::Response, reference: &str) -> Result<String, ReadError> {
    let mut reader = response.into_reader().take(MAX_RESPONSE_BYTES + 1);
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| ReadError::Io {
            reference: reference.to_string(),
            detail: e.to_string(),
        })?;
    if bytes.len() as u64 > MAX_RESPONSE_BYTES {
        return Err(ReadError::TooLarge {
            reference: reference.to_string(),
            limit: MAX_RESPONSE_BYTES,
        });
    }
    String::from_utf8(bytes).map_err(|_| ReadError::Io {
        reference: reference.to_string(),
        detail: "body is not valid utf-8".to_string(),
    })
}

impl SourceReader for HttpReader {
    fn supports(&self, reference: &str) -> bool {
        let lower = reference.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    fn read(&self, reference: &str) -> Result<String, ReadError> {
        fetch(reference, reference)
    }

    fn parse_path(&self, reference: &str) -> SourcePath {
        // Strip query/fragment, then split at the last path separator.
        let trimmed = reference
            .split(['?', '#'])
            .next()
            .unwrap_or(reference);
        let scheme_end = trimmed.find("://").map(|i| i + 3).unwrap_or(0);
        match trimmed[scheme_end..].rfind('/') {
            Some(idx) => {
                let split = scheme_end + idx;
                SourcePath {
                    file: trimmed[split + 1..].to_string(),
                    path: trimmed[..split].to_string(),
                }
            }
            None => SourcePath {
                file: trimmed.to_string(),
                path: String::new(),
            },
        }
    }
}
