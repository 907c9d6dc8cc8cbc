use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::audit::{AuditAction, AuditEntry, AuditLevel};
use crate::config::Environment;
use crate::error::ApiError;
use crate::middleware::RequestMeta;
use crate::AppState;

const BASE_HEADERS: &[(&str, &str)] = &[
    ("x-xss-protection", "1; mode=block"),
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    (
        "permissions-policy",
        "geolocation=(), microphone=(), camera=(), payment=(), usb=(), magnetometer=(), \
         gyroscope=(), speaker=(), vibrate=(), fullscreen=(self), sync-xhr=()",
    ),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cache-control", "no-store, no-cache, must-revalidate, proxy-revalidate"),
    ("pragma", "no-cache"),
    ("expires", "0"),
    ("server", "KAGRA-API"),
];

const DEVELOPMENT_HEADERS: &[(&str, &str)] = &[
    (
        "content-security-policy",
        "default-src 'self' 'unsafe-inline' 'unsafe-eval'; \
         connect-src 'self' http://localhost:* ws://localhost:* https://api.supabase.co wss://realtime.supabase.co; \
         img-src 'self' data: https: http:; font-src 'self' https: data:; \
         style-src 'self' 'unsafe-inline' https:; script-src 'self' 'unsafe-inline' 'unsafe-eval' https:; \
         frame-ancestors 'none';",
    ),
    ("strict-transport-security", "max-age=0"),
    ("cross-origin-embedder-policy", "unsafe-none"),
    ("cross-origin-resource-policy", "cross-origin"),
    ("x-environment", "development"),
    ("x-security-level", "relaxed"),
];

const STAGING_HEADERS: &[(&str, &str)] = &[
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline' https:; \
         img-src 'self' data: https:; font-src 'self' https:; connect-src 'self' https: wss:; \
         frame-ancestors 'none';",
    ),
    ("strict-transport-security", "max-age=86400; includeSubDomains"),
    ("cross-origin-embedder-policy", "require-corp"),
    ("cross-origin-resource-policy", "same-origin"),
];

const PRODUCTION_HEADERS: &[(&str, &str)] = &[
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
         img-src 'self' data: https:; font-src 'self'; connect-src 'self' https: wss:; \
         frame-ancestors 'none'; base-uri 'self'; form-action 'self'; upgrade-insecure-requests;",
    ),
    ("strict-transport-security", "max-age=31536000; includeSubDomains; preload"),
    ("cross-origin-embedder-policy", "require-corp"),
    ("cross-origin-resource-policy", "same-origin"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-download-options", "noopen"),
    ("x-dns-prefetch-control", "off"),
    ("x-environment", "production"),
    ("x-security-level", "strict"),
];

/// Header set for an environment, base entries first
pub fn headers_for(environment: Environment) -> Vec<(&'static str, &'static str)> {
    let extra = match environment {
        Environment::Development => DEVELOPMENT_HEADERS,
        Environment::Staging => STAGING_HEADERS,
        Environment::Production => PRODUCTION_HEADERS,
    };
    BASE_HEADERS.iter().chain(extra.iter()).copied().collect()
}

static SUSPICIOUS_AGENTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "sqlmap",
        "nikto",
        "nmap",
        "masscan",
        "zap",
        "burp",
        "scanner",
        "bot.*crawler",
        "python-requests",
        "curl",
        "wget",
        "libwww",
        "<script",
        "javascript:",
        "vbscript:",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
    .collect()
});

/// Missing agents count as suspicious.
pub fn is_suspicious_user_agent(user_agent: Option<&str>) -> bool {
    match user_agent.map(str::trim) {
        None | Some("") => true,
        Some(agent) => SUSPICIOUS_AGENTS.iter().any(|re| re.is_match(agent)),
    }
}

/// Screens user agents and stamps the environment's security headers on every response.
/// A blocked request leaves a critical `security.violation` audit record.
pub async fn security_headers_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let meta = RequestMeta::read(
        request.headers(),
        request.extensions(),
        &state.config.security.trusted_proxies,
    );

    let mut response = if is_suspicious_user_agent(meta.user_agent.as_deref()) {
        let path = request.uri().path().to_string();
        tracing::warn!(
            user_agent = meta.user_agent.as_deref().unwrap_or(""),
            client_ip = %meta.client_ip,
            path = %path,
            "Suspicious user agent detected"
        );
        if state.config.security.block_suspicious_agents {
            let entry = AuditEntry::security_event(
                AuditAction::SecurityViolation,
                json!({
                    "reason": "suspicious_user_agent",
                    "path": path,
                    "method": request.method().as_str(),
                }),
            )
            .client(Some(meta.client_ip.clone()), meta.user_agent.clone())
            .failed(AuditLevel::Critical);
            state.recorder.record(entry).await;

            ApiError::forbidden("Suspicious request detected").into_response()
        } else {
            next.run(request).await
        }
    } else {
        next.run(request).await
    };

    if state.config.security.enable_security_headers {
        let headers = response.headers_mut();
        for (name, value) in headers_for(state.config.environment) {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
    }

    response
}
