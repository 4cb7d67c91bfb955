use axum::http::{header, HeaderMap};

pub const FLAG: &str = "terms_accepted";

/// Session cookie set once both terms checkboxes were ticked.
pub const SET_COOKIE: &str = "terms_accepted=true; Path=/; HttpOnly; SameSite=Lax";

/// The flag travels in a cookie, or as `?terms_accepted=true` for mobile
/// previews that drop cookies across the redirect.
pub fn accepted(headers: &HeaderMap, query: Option<&str>) -> bool {
    cookie_accepted(headers) || query_accepted(query)
}

fn cookie_accepted(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(name, value)| name == FLAG && value == "true")
}

fn query_accepted(query: Option<&str>) -> bool {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).any(|(k, v)| k == FLAG && v == "true"))
        .unwrap_or(false)
}
