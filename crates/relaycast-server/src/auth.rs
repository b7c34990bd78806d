//! Channel secret extraction.
//!
//! A single precedence order everywhere: `x-api-key` header, then
//! `Authorization: Bearer`, then the `api_key` query parameter. The query
//! fallback exists because EventSource and browser WebSocket clients cannot
//! set custom headers.

use axum::http::HeaderMap;
use serde::Deserialize;

/// Query-string credential carrier.
#[derive(Debug, Default, Deserialize)]
pub struct AuthQuery {
    /// Channel secret, for clients that cannot set headers.
    pub api_key: Option<String>,
}

/// Extract the presented channel secret, if any.
#[must_use]
pub fn extract_api_key(headers: &HeaderMap, query: &AuthQuery) -> Option<String> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    query.api_key.clone()
}

/// Extract a Bearer token from the Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    auth.strip_prefix("Bearer ").map(|t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_precedence_order() {
        let query = AuthQuery {
            api_key: Some("sk_query".into()),
        };

        // Header wins over everything.
        let all = headers(&[("x-api-key", "sk_header"), ("authorization", "Bearer sk_bearer")]);
        assert_eq!(extract_api_key(&all, &query).as_deref(), Some("sk_header"));

        // Bearer wins over query.
        let bearer = headers(&[("authorization", "Bearer sk_bearer")]);
        assert_eq!(
            extract_api_key(&bearer, &query).as_deref(),
            Some("sk_bearer")
        );

        // Query is the last resort.
        assert_eq!(
            extract_api_key(&HeaderMap::new(), &query).as_deref(),
            Some("sk_query")
        );

        // Nothing presented.
        assert_eq!(extract_api_key(&HeaderMap::new(), &AuthQuery::default()), None);
    }

    #[test]
    fn test_malformed_authorization_ignored() {
        let basic = headers(&[("authorization", "Basic abc123")]);
        assert_eq!(extract_api_key(&basic, &AuthQuery::default()), None);
    }
}
