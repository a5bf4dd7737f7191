//! Validation of target definitions before they reach the registry.
//!
//! Rejects malformed URLs, unsupported methods and cadence settings the
//! scheduler cannot honour. Private and loopback hosts are refused only when
//! the checker is configured to stay on the public internet.

use std::net::IpAddr;
use thiserror::Error;
use url::Url;

use crate::database::models::Target;

pub const MIN_INTERVAL_SECONDS: u64 = 1;
pub const MAX_INTERVAL_SECONDS: u64 = 86_400;
pub const MIN_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_TIMEOUT_SECONDS: u64 = 300;

const ALLOWED_METHODS: [&str; 7] = ["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid scheme '{0}'. Must be http or https")]
    UnsupportedScheme(String),
    #[error("URL must have a valid host")]
    MissingHost,
    #[error("Port 0 is not valid")]
    InvalidPort,
    #[error("Private/local addresses are not allowed: {0}")]
    PrivateHost(String),
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
    #[error("Check interval must be between {min} and {max} seconds, got {0}", min = MIN_INTERVAL_SECONDS, max = MAX_INTERVAL_SECONDS)]
    IntervalOutOfRange(u64),
    #[error("Timeout must be between {min} and {max} seconds, got {0}", min = MIN_TIMEOUT_SECONDS, max = MAX_TIMEOUT_SECONDS)]
    TimeoutOutOfRange(u64),
    #[error("Timeout ({timeout}s) must be shorter than the check interval ({interval}s)")]
    TimeoutNotBelowInterval { timeout: u64, interval: u64 },
    #[error("Expected status range {min}-{max} is not valid")]
    InvalidStatusRange { min: u16, max: u16 },
}

/// Validate every user-supplied field of a target
pub fn validate_target(target: &Target, allow_private: bool) -> Result<(), ValidationError> {
    validate_url(&target.url, allow_private)?;
    validate_method(&target.method)?;
    validate_check_interval(target.interval_seconds)?;
    validate_timeout(target.timeout_seconds)?;

    if target.timeout_seconds >= target.interval_seconds {
        return Err(ValidationError::TimeoutNotBelowInterval {
            timeout: target.timeout_seconds,
            interval: target.interval_seconds,
        });
    }

    let range = target.expected_status;
    if !(100..=599).contains(&range.min) || !(100..=599).contains(&range.max) || range.min > range.max {
        return Err(ValidationError::InvalidStatusRange { min: range.min, max: range.max });
    }

    Ok(())
}

/// Validate an HTTP/HTTPS target URL
pub fn validate_url(target: &str, allow_private: bool) -> Result<(), ValidationError> {
    if target.trim().is_empty() {
        return Err(ValidationError::InvalidUrl("target cannot be empty".into()));
    }

    let url = Url::parse(target).map_err(|e| {
        if !target.contains("://") {
            ValidationError::InvalidUrl("URL must include scheme (http:// or https://)".into())
        } else {
            ValidationError::InvalidUrl(e.to_string())
        }
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    let host = url.host_str().filter(|host| !host.is_empty()).ok_or(ValidationError::MissingHost)?;

    if url.port() == Some(0) {
        return Err(ValidationError::InvalidPort);
    }

    if !allow_private && is_private_or_local(host) {
        return Err(ValidationError::PrivateHost(host.to_string()));
    }

    Ok(())
}

pub fn validate_method(method: &str) -> Result<(), ValidationError> {
    if ALLOWED_METHODS.contains(&method.to_uppercase().as_str()) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedMethod(method.to_string()))
    }
}

pub fn validate_check_interval(interval_seconds: u64) -> Result<(), ValidationError> {
    if (MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(&interval_seconds) {
        Ok(())
    } else {
        Err(ValidationError::IntervalOutOfRange(interval_seconds))
    }
}

pub fn validate_timeout(timeout_seconds: u64) -> Result<(), ValidationError> {
    if (MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout_seconds) {
        Ok(())
    } else {
        Err(ValidationError::TimeoutOutOfRange(timeout_seconds))
    }
}

/// Check if hostname/IP is private or localhost
fn is_private_or_local(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(ipv4) => {
                ipv4.is_private()
                    || ipv4.is_loopback()
                    || ipv4.is_link_local()
                    || ipv4.is_broadcast()
                    || ipv4.is_unspecified()
            }
            IpAddr::V6(ipv6) => ipv6.is_loopback() || ipv6.is_unspecified() || ipv6.is_multicast(),
        };
    }

    let host = host.to_lowercase();
    host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.ends_with(".internal")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::StatusRange;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com", false).is_ok());
        assert!(validate_url("http://example.com:8080/health", false).is_ok());

        assert_eq!(validate_url("ftp://example.com", true), Err(ValidationError::UnsupportedScheme("ftp".into())));
        assert!(matches!(validate_url("example.com", true), Err(ValidationError::InvalidUrl(_))));
        assert!(matches!(validate_url("", true), Err(ValidationError::InvalidUrl(_))));
        assert_eq!(validate_url("http://example.com:0", true), Err(ValidationError::InvalidPort));
    }

    #[test]
    fn test_private_hosts_respect_setting() {
        for url in ["http://localhost", "http://127.0.0.1", "http://192.168.1.1", "http://10.0.0.1", "http://[::1]/"] {
            assert!(matches!(validate_url(url, false), Err(ValidationError::PrivateHost(_))), "{url}");
            assert!(validate_url(url, true).is_ok(), "{url}");
        }
        assert!(validate_url("http://8.8.8.8", false).is_ok());
    }

    #[test]
    fn test_validate_check_interval() {
        assert!(validate_check_interval(1).is_ok());
        assert!(validate_check_interval(86_400).is_ok());
        assert!(validate_check_interval(0).is_err());
        assert!(validate_check_interval(100_000).is_err());
    }

    #[test]
    fn test_validate_method() {
        assert!(validate_method("get").is_ok());
        assert!(validate_method("HEAD").is_ok());
        assert!(validate_method("CONNECT").is_err());
    }

    #[test]
    fn test_validate_target() {
        let target = Target::new("https://example.com").with_interval(60, 10);
        assert!(validate_target(&target, false).is_ok());

        let slow = Target::new("https://example.com").with_interval(10, 10);
        assert_eq!(
            validate_target(&slow, false),
            Err(ValidationError::TimeoutNotBelowInterval { timeout: 10, interval: 10 })
        );

        let mut inverted = Target::new("https://example.com").with_interval(60, 10);
        inverted.expected_status = StatusRange { min: 400, max: 200 };
        assert!(matches!(validate_target(&inverted, false), Err(ValidationError::InvalidStatusRange { .. })));
    }
}
