use std::collections::HashMap;

pub(crate) const DOMAIN_KEY: &str = "DOMAIN";
pub(crate) const API_URL_KEY: &str = "BACKTEST_API_URL";
const LOCAL_DOMAIN_PREFIXES: [&str; 2] = ["localhost", "127.0.0.1"];

fn is_local_domain(value: &str) -> bool {
    let lower = value.to_lowercase();
    LOCAL_DOMAIN_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Accepts a bare host name, optionally with a port.
pub fn normalize_domain(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://")
        || trimmed.contains('/')
        || trimmed.contains('?')
        || trimmed.contains('#')
    {
        return None;
    }
    let (host, port) = match trimmed.rsplit_once(':') {
        Some((host, port)) if !host.ends_with(':') => (host, Some(port)),
        _ => (trimmed, None),
    };
    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return None;
    }
    Some(trimmed.to_string())
}

fn normalize_api_url(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn resolve_app_base_url(settings: &HashMap<String, String>) -> Option<String> {
    let domain = settings
        .get(DOMAIN_KEY)
        .and_then(|value| normalize_domain(Some(value.as_str())))?;
    let scheme = if is_local_domain(&domain) {
        "http"
    } else {
        "https"
    };
    Some(format!("{}://{}", scheme, domain))
}

/// An explicit `BACKTEST_API_URL` wins over the `DOMAIN`-derived `/api` root.
pub fn resolve_api_base_url(settings: &HashMap<String, String>) -> Option<String> {
    if let Some(url) = settings
        .get(API_URL_KEY)
        .and_then(|value| normalize_api_url(value))
    {
        return Some(url);
    }
    resolve_app_base_url(settings).map(|base| format!("{}/api", base))
}
