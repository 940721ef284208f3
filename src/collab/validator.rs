//! Input validation consulted synchronously before any task is submitted.
//!
//! [`Validator`] is the collaborator interface; [`BasicValidator`] is the
//! default implementation. URLs are parsed with the `url` crate and
//! normalized to `https://www.youtube.com/watch?v=<id>`.

use std::collections::HashSet;
use std::net::IpAddr;

use url::Url;

use crate::error::CoreError;

const MAX_URL_LEN: usize = 2048;
const MAX_FILENAME_LEN: usize = 255;
const MAX_QUERY_LEN: usize = 1000;
const MIN_PORT: u16 = 1024;
const VIDEO_ID_LEN: usize = 11;

const DEFAULT_DOMAINS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "youtu.be",
    "www.youtu.be",
];

const SUSPICIOUS: &[&str] = &["<", ">", "\"", "'", "&lt;", "&gt;", "&quot;"];

const RESERVED_FILENAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const FILENAME_FORBIDDEN: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

// ---------------------------------------------------------------------------
// Validator trait
// ---------------------------------------------------------------------------

/// Pure validation functions. Never a task.
pub trait Validator: Send + Sync {
    /// Validate a video URL and return its normalized form.
    fn validate_url(&self, url: &str) -> Result<String, CoreError>;

    /// Validate a streaming port.
    fn validate_port(&self, port: u16) -> Result<u16, CoreError>;

    /// Validate the address a stream is served on.
    fn validate_bind_host(&self, host: &str) -> Result<String, CoreError>;

    fn validate_filename(&self, filename: &str) -> Result<String, CoreError>;

    fn validate_search_query(&self, query: &str) -> Result<String, CoreError>;

    /// Validate one URL per line, skipping blank lines. Duplicates are an
    /// error.
    fn validate_playlist_urls(&self, text: &str) -> Result<Vec<String>, CoreError> {
        let mut urls = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let url = self.validate_url(line).map_err(|e| {
                CoreError::validation(
                    "playlist_urls",
                    format!("line {}: {}", line_no + 1, e.user_message()),
                )
            })?;
            urls.push(url);
        }

        if urls.is_empty() {
            return Err(CoreError::validation("playlist_urls", "no valid URLs found"));
        }

        let mut seen = HashSet::new();
        let duplicates = urls.iter().filter(|u| !seen.insert(u.as_str())).count();
        if duplicates > 0 {
            return Err(CoreError::validation(
                "playlist_urls",
                format!("found {duplicates} duplicate URL(s)"),
            ));
        }
        Ok(urls)
    }
}

// ---------------------------------------------------------------------------
// BasicValidator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BasicValidator {
    allowed_domains: HashSet<String>,
}

impl BasicValidator {
    pub fn new() -> Self {
        Self {
            allowed_domains: DEFAULT_DOMAINS.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn check_suspicious(url: &str) -> Result<(), CoreError> {
        if url.len() > MAX_URL_LEN {
            return Err(CoreError::security("potential_dos", "URL is too long"));
        }
        if SUSPICIOUS.iter().any(|s| url.contains(s)) {
            return Err(CoreError::security(
                "potential_xss",
                "URL contains suspicious characters",
            ));
        }
        Ok(())
    }
}

impl Default for BasicValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for BasicValidator {
    fn validate_url(&self, url: &str) -> Result<String, CoreError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(CoreError::validation("url", "URL cannot be empty"));
        }
        Self::check_suspicious(url)?;

        let with_scheme = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };

        let parsed = Url::parse(&with_scheme)
            .map_err(|e| CoreError::validation("url", format!("invalid URL format: {e}")))?;

        // Percent-decoded query values can smuggle markup past the raw check.
        for (_, value) in parsed.query_pairs() {
            if SUSPICIOUS.iter().any(|s| value.contains(s)) {
                return Err(CoreError::security(
                    "potential_xss",
                    "suspicious content in URL parameter",
                ));
            }
        }

        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        if !self.allowed_domains.contains(&host) {
            return Err(CoreError::validation(
                "url",
                format!("only YouTube URLs are allowed, got domain: {host}"),
            ));
        }

        let id = video_id_from_url(&with_scheme)
            .ok_or_else(|| CoreError::validation("url", "could not extract video ID from URL"))?;
        Ok(format!("https://www.youtube.com/watch?v={id}"))
    }

    fn validate_port(&self, port: u16) -> Result<u16, CoreError> {
        if port < MIN_PORT {
            return Err(CoreError::validation(
                "port",
                "port must be 1024 or higher (privileged ports not allowed)",
            ));
        }
        Ok(port)
    }

    fn validate_bind_host(&self, host: &str) -> Result<String, CoreError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(CoreError::validation("host", "address cannot be empty"));
        }
        if host.eq_ignore_ascii_case("localhost") {
            return Ok("127.0.0.1".into());
        }

        let addr: IpAddr = host
            .parse()
            .map_err(|e| CoreError::validation("host", format!("invalid IP address: {e}")))?;

        if addr.is_multicast() {
            return Err(CoreError::security(
                "multicast_binding",
                "multicast addresses not allowed",
            ));
        }

        let local = match addr {
            IpAddr::V4(v4) => {
                v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
            }
            IpAddr::V6(v6) => {
                v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00
            }
        };
        if !local {
            return Err(CoreError::security(
                "public_ip_binding",
                "binding to public IP addresses is not allowed",
            ));
        }
        Ok(host.to_string())
    }

    fn validate_filename(&self, filename: &str) -> Result<String, CoreError> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(CoreError::validation("filename", "filename cannot be empty"));
        }
        if filename.chars().count() > MAX_FILENAME_LEN {
            return Err(CoreError::validation(
                "filename",
                "filename too long (max 255 characters)",
            ));
        }

        let bad: Vec<String> = FILENAME_FORBIDDEN
            .iter()
            .filter(|c| filename.contains(**c))
            .map(|c| c.to_string())
            .collect();
        if !bad.is_empty() {
            return Err(CoreError::validation(
                "filename",
                format!("filename contains invalid characters: {}", bad.join(", ")),
            ));
        }

        let base = filename
            .split('.')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if RESERVED_FILENAMES.contains(&base.as_str()) {
            return Err(CoreError::validation(
                "filename",
                format!("'{base}' is a reserved filename"),
            ));
        }
        Ok(filename.to_string())
    }

    fn validate_search_query(&self, query: &str) -> Result<String, CoreError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CoreError::validation("query", "search query cannot be empty"));
        }
        if query.chars().count() > MAX_QUERY_LEN {
            return Err(CoreError::validation(
                "query",
                "search query too long (max 1000 characters)",
            ));
        }
        let lower = query.to_lowercase();
        if lower.contains("<script") || lower.contains("javascript:") {
            return Err(CoreError::security(
                "script_injection",
                "search query contains potentially malicious content",
            ));
        }
        Ok(query.to_string())
    }
}

// ---------------------------------------------------------------------------
// Video id extraction
// ---------------------------------------------------------------------------

/// Extract the 11-character video id from a watch, embed or short-link URL.
pub fn video_id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();

    let candidate = if host.ends_with("youtu.be") {
        segments.first().map(|s| s.to_string())
    } else {
        match segments.as_slice() {
            ["watch"] => parsed
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            ["embed", id] => Some(id.to_string()),
            _ => None,
        }
    }?;

    let valid = candidate.len() == VIDEO_ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(candidate)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "dQw4w9WgXcQ";

    fn normalized() -> String {
        format!("https://www.youtube.com/watch?v={ID}")
    }

    #[test]
    fn accepts_and_normalizes_known_forms() {
        let v = BasicValidator::new();
        for input in [
            format!("https://www.youtube.com/watch?v={ID}"),
            format!("https://youtube.com/watch?v={ID}&t=42"),
            format!("https://m.youtube.com/watch?v={ID}"),
            format!("https://youtu.be/{ID}"),
            format!("https://www.youtube.com/embed/{ID}"),
            format!("youtu.be/{ID}"),
            format!("  https://youtu.be/{ID}?si=abc  "),
        ] {
            assert_eq!(v.validate_url(&input).unwrap(), normalized(), "{input}");
        }
    }

    #[test]
    fn rejects_foreign_domains() {
        let v = BasicValidator::new();
        let err = v.validate_url("https://example.com/watch?v=dQw4w9WgXcQ").unwrap_err();
        assert!(matches!(err, CoreError::Validation { field: "url", .. }));
    }

    #[test]
    fn rejects_markup_as_security_issue() {
        let v = BasicValidator::new();
        let err = v
            .validate_url("https://www.youtube.com/watch?v=<script>")
            .unwrap_err();
        assert!(matches!(err, CoreError::Security { issue: "potential_xss", .. }));

        let err = v
            .validate_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&x=%3Cb%3E")
            .unwrap_err();
        assert!(matches!(err, CoreError::Security { .. }));
    }

    #[test]
    fn rejects_overlong_and_empty_urls() {
        let v = BasicValidator::new();
        let long = format!("https://www.youtube.com/watch?v={ID}&p={}", "a".repeat(2100));
        assert!(matches!(
            v.validate_url(&long).unwrap_err(),
            CoreError::Security { issue: "potential_dos", .. }
        ));
        assert!(matches!(
            v.validate_url("   ").unwrap_err(),
            CoreError::Validation { .. }
        ));
    }

    #[test]
    fn rejects_bad_video_ids() {
        let v = BasicValidator::new();
        assert!(v.validate_url("https://www.youtube.com/watch?v=short").is_err());
        assert!(v.validate_url("https://www.youtube.com/feed/trending").is_err());
    }

    #[test]
    fn playlist_urls_reports_line_and_duplicates() {
        let v = BasicValidator::new();
        let ok = v
            .validate_playlist_urls(&format!("https://youtu.be/{ID}\n\nhttps://youtu.be/aaaaaaaaaaa\n"))
            .unwrap();
        assert_eq!(ok.len(), 2);

        let err = v
            .validate_playlist_urls(&format!("https://youtu.be/{ID}\nhttps://example.com/x"))
            .unwrap_err();
        assert!(err.to_string().contains("line 2"));

        let err = v
            .validate_playlist_urls(&format!("https://youtu.be/{ID}\nhttps://www.youtube.com/watch?v={ID}"))
            .unwrap_err();
        assert!(err.to_string().contains("1 duplicate"));

        assert!(v.validate_playlist_urls("\n \n").is_err());
    }

    #[test]
    fn ports() {
        let v = BasicValidator::new();
        assert_eq!(v.validate_port(8080).unwrap(), 8080);
        assert_eq!(v.validate_port(1024).unwrap(), 1024);
        assert!(v.validate_port(80).is_err());
        assert!(v.validate_port(0).is_err());
    }

    #[test]
    fn bind_hosts() {
        let v = BasicValidator::new();
        assert_eq!(v.validate_bind_host("0.0.0.0").unwrap(), "0.0.0.0");
        assert_eq!(v.validate_bind_host("192.168.1.20").unwrap(), "192.168.1.20");
        assert_eq!(v.validate_bind_host("localhost").unwrap(), "127.0.0.1");
        assert!(matches!(
            v.validate_bind_host("8.8.8.8").unwrap_err(),
            CoreError::Security { issue: "public_ip_binding", .. }
        ));
        assert!(matches!(
            v.validate_bind_host("224.0.0.1").unwrap_err(),
            CoreError::Security { issue: "multicast_binding", .. }
        ));
        assert!(v.validate_bind_host("not-an-ip").is_err());
    }

    #[test]
    fn filenames() {
        let v = BasicValidator::new();
        assert_eq!(v.validate_filename(" talk.srt ").unwrap(), "talk.srt");
        assert!(v.validate_filename("a/b.txt").is_err());
        assert!(v.validate_filename("con.txt").is_err());
        assert!(v.validate_filename(&"x".repeat(256)).is_err());
    }

    #[test]
    fn search_queries() {
        let v = BasicValidator::new();
        assert_eq!(v.validate_search_query("  hello ").unwrap(), "hello");
        assert!(matches!(
            v.validate_search_query("<SCRIPT>alert(1)").unwrap_err(),
            CoreError::Security { .. }
        ));
        assert!(v.validate_search_query("").is_err());
    }

    #[test]
    fn video_id_extraction() {
        assert_eq!(video_id_from_url(&normalized()).as_deref(), Some(ID));
        assert_eq!(
            video_id_from_url(&format!("https://youtu.be/{ID}")).as_deref(),
            Some(ID)
        );
        assert_eq!(video_id_from_url("https://www.youtube.com/watch"), None);
        assert_eq!(video_id_from_url("not a url"), None);
    }
}
