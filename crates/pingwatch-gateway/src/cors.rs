//! CORS policy: permissive for local and private-LAN origins plus any
//! configured tunnel domains; exposes the `etag` header for relay uploads.

use std::net::Ipv4Addr;

use axum::http::{header::HeaderName, HeaderValue};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Built-in tunnel domains the dev frontends are served from.
const TUNNEL_SUFFIXES: &[&str] = &[".ngrok-free.dev", ".ngrok.io"];

pub fn build_cors_layer(extra_origins: &[String]) -> CorsLayer {
    let extra: Vec<String> = extra_origins.to_vec();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| is_origin_allowed(o, &extra))
                .unwrap_or(false)
        }))
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static("etag")])
}

/// Allow http(s) origins on localhost, unspecified, RFC1918 private ranges,
/// known tunnel domains, and exact-match configured extras.
pub fn is_origin_allowed(origin: &str, extra: &[String]) -> bool {
    if extra.iter().any(|e| e == origin) {
        return true;
    }
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };
    let host = rest.split('/').next().unwrap_or(rest);
    let host = host.rsplit_once(':').map_or(host, |(h, port)| {
        // Only treat the suffix as a port when it is numeric; IPv6 hosts
        // are not expected here.
        if port.chars().all(|c| c.is_ascii_digit()) {
            h
        } else {
            host
        }
    });

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return ip.is_loopback() || ip.is_unspecified() || ip.is_private();
    }
    let host = host.to_ascii_lowercase();
    TUNNEL_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_and_private_origins_are_allowed() {
        for origin in [
            "http://localhost",
            "http://localhost:5173",
            "https://localhost:8443",
            "http://127.0.0.1:8000",
            "http://0.0.0.0:3000",
            "http://10.0.0.7",
            "http://192.168.1.20:5173",
            "http://172.16.0.4",
            "http://172.31.255.1:9000",
            "https://abc-123.ngrok-free.dev",
            "https://mytunnel.ngrok.io",
        ] {
            assert!(is_origin_allowed(origin, &[]), "{origin}");
        }
    }

    #[test]
    fn public_origins_are_rejected() {
        for origin in [
            "https://example.com",
            "http://172.32.0.1",
            "http://11.0.0.1",
            "http://evil-ngrok.io.example.com",
            "ftp://localhost",
            "localhost",
        ] {
            assert!(!is_origin_allowed(origin, &[]), "{origin}");
        }
    }

    #[test]
    fn configured_extras_match_exactly() {
        let extra = vec!["https://cam.example.com".to_string()];
        assert!(is_origin_allowed("https://cam.example.com", &extra));
        assert!(!is_origin_allowed("https://cam.example.com.evil.com", &extra));
    }
}
