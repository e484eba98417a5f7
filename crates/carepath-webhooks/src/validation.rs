//! URL validation and SSRF protection for webhook delivery endpoints.
//!
//! Validates webhook URLs against:
//! - Protocol requirements (HTTPS unless plain HTTP is enabled)
//! - SSRF protections (private/internal IP ranges, cloud metadata endpoints)
//! - Event type validity

use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::error::WebhookError;
use crate::events::WebhookEventType;

/// Which target URLs the subscription manager accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrlPolicy {
    /// Accept `http://` targets (development only).
    pub allow_http: bool,
    /// Skip the SSRF guard so local receivers can be registered.
    pub allow_private_targets: bool,
}

/// Validate a webhook delivery URL.
///
/// Checks:
/// 1. URL is parseable and absolute
/// 2. Scheme is HTTPS (or HTTP when the policy allows it)
/// 3. Host is not a private/internal address (SSRF protection)
pub fn validate_webhook_url(url: &str, policy: UrlPolicy) -> Result<(), WebhookError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if policy.allow_http => {}
        "http" => {
            return Err(WebhookError::InvalidUrl(
                "Webhook URLs must use HTTPS".to_string(),
            ));
        }
        scheme => {
            return Err(WebhookError::InvalidUrl(format!(
                "Unsupported URL scheme: {scheme}"
            )));
        }
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(WebhookError::InvalidUrl(
            "Webhook URLs must not embed credentials".to_string(),
        ));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("URL must have a host".to_string()))?;

    if !policy.allow_private_targets {
        validate_host_not_internal(host)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate that a host is not a private/internal address.
///
/// Blocks:
/// - Loopback addresses (127.0.0.0/8)
/// - Private networks (10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16)
/// - Link-local (169.254.0.0/16, the cloud metadata endpoint)
/// - CGNAT (100.64.0.0/10)
/// - IPv6 loopback, unspecified, unique-local and link-local
/// - Internal hostnames (localhost, *.internal, *.local)
pub fn validate_host_not_internal(host: &str) -> Result<(), WebhookError> {
    // `Url::host_str` keeps the brackets around IPv6 literals.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_internal_ip(&ip) {
            return Err(WebhookError::SsrfDetected(format!(
                "Destination host {host} is a private/internal address"
            )));
        }
    }

    let lower = host.to_ascii_lowercase();
    if lower == "localhost"
        || lower.ends_with(".localhost")
        || lower.ends_with(".internal")
        || lower.ends_with(".local")
    {
        return Err(WebhookError::SsrfDetected(format!(
            "Destination host {host} is a restricted internal hostname"
        )));
    }

    Ok(())
}

fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()                // 127.0.0.0/8
                || v4.is_private()          // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
                || v4.is_link_local()       // 169.254.0.0/16
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64) // 100.64.0.0/10 (CGNAT)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_internal_ip(&IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // fc00::/7 unique local
                || (first & 0xffc0) == 0xfe80 // fe80::/10 link local
        }
    }
}

// ---------------------------------------------------------------------------
// Event type validation
// ---------------------------------------------------------------------------

/// Parse event tags into a set, rejecting unknown tags and empty input.
pub fn parse_event_types(event_types: &[String]) -> Result<BTreeSet<WebhookEventType>, WebhookError> {
    if event_types.is_empty() {
        return Err(WebhookError::Validation(
            "at least one event type is required".to_string(),
        ));
    }
    event_types
        .iter()
        .map(|et| {
            WebhookEventType::parse(et)
                .ok_or_else(|| WebhookError::Validation(format!("Unknown event type: {et}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRICT: UrlPolicy = UrlPolicy {
        allow_http: false,
        allow_private_targets: false,
    };

    #[test]
    fn test_valid_https_url() {
        assert!(validate_webhook_url("https://example.com/webhooks", STRICT).is_ok());
        assert!(validate_webhook_url("https://hooks.example.com:8443/callback", STRICT).is_ok());
    }

    #[test]
    fn test_http_requires_opt_in() {
        let result = validate_webhook_url("http://example.com/webhooks", STRICT);
        assert!(matches!(result, Err(WebhookError::InvalidUrl(_))));

        let dev = UrlPolicy {
            allow_http: true,
            ..STRICT
        };
        assert!(validate_webhook_url("http://example.com/webhooks", dev).is_ok());
    }

    #[test]
    fn test_invalid_urls() {
        assert!(validate_webhook_url("not-a-url", STRICT).is_err());
        assert!(validate_webhook_url("/relative/path", STRICT).is_err());
        assert!(validate_webhook_url("ftp://example.com/webhooks", STRICT).is_err());
        assert!(validate_webhook_url("https://user:pw@example.com/", STRICT).is_err());
    }

    #[test]
    fn test_ssrf_blocks_private_ranges() {
        for host in [
            "127.0.0.1",
            "10.0.0.1",
            "172.16.0.1",
            "192.168.255.255",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "[::1]",
            "fd00::1",
            "fe80::1",
            "::ffff:10.0.0.1",
        ] {
            assert!(
                validate_host_not_internal(host).is_err(),
                "{host} should be blocked"
            );
        }
    }

    #[test]
    fn test_ssrf_blocks_internal_hostnames() {
        for host in [
            "localhost",
            "LOCALHOST",
            "metadata.google.internal",
            "myhost.local",
            "api.localhost",
        ] {
            assert!(validate_host_not_internal(host).is_err());
        }
    }

    #[test]
    fn test_ssrf_allows_public_hosts() {
        assert!(validate_host_not_internal("8.8.8.8").is_ok());
        assert!(validate_host_not_internal("hooks.myapp.io").is_ok());
        assert!(validate_host_not_internal("2001:4860:4860::8888").is_ok());
    }

    #[test]
    fn test_ssrf_url_integration() {
        let result = validate_webhook_url("https://10.0.0.1/webhook", STRICT);
        assert!(matches!(result, Err(WebhookError::SsrfDetected(_))));

        let local = UrlPolicy {
            allow_http: true,
            allow_private_targets: true,
        };
        assert!(validate_webhook_url("http://127.0.0.1:8080/hook", local).is_ok());
    }

    #[test]
    fn test_parse_event_types() {
        let parsed = parse_event_types(&[
            "journey.stage_changed".to_string(),
            "survey.completed".to_string(),
            "journey.stage_changed".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains(&WebhookEventType::SurveyCompleted));
    }

    #[test]
    fn test_parse_event_types_rejects_unknown_and_empty() {
        let err = parse_event_types(&["invalid.event".to_string()]).unwrap_err();
        assert!(err.to_string().contains("invalid.event"));
        assert!(parse_event_types(&[]).is_err());
    }
}
