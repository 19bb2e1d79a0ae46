//! Request and response shapes passed between the edge and its origins.
//!
//! Header names are stored lowercase. The query string is kept raw and the
//! cookies keep their order and duplicates, so both reach the compute unit
//! exactly as the client sent them.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    /// Raw query string without the leading `?`.
    pub query: String,
    /// Cookie pairs in the order the client sent them.
    pub cookies: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl EdgeRequest {
    pub fn get(path: &str) -> Self {
        Self::new("GET", path)
    }

    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = query.trim_start_matches('?').to_string();
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether responses to this request may be served from cache.
    pub fn is_cacheable_method(&self) -> bool {
        self.method == "GET" || self.method == "HEAD"
    }

    /// `key=value` pairs of the query string, sorted, without decoding.
    pub fn sorted_query_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| p.split_once('=').unwrap_or((p, "")))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Path plus query, as it appears in a request line.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }

    /// First value sent for the cookie `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Cookie pairs sorted by name, then value. Only for cache keys.
    pub fn sorted_cookie_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .cookies
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// The cookies as a `Cookie` header value, in arrival order.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Parse a `Cookie` header into name/value pairs, keeping order and
/// repeated names.
pub fn parse_cookie_header(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let (name, value) = part.split_once('=').unwrap_or((part, ""));
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl EdgeResponse {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::new(404, "Not Found").with_header("content-type", "text/plain")
    }

    pub fn bad_gateway(detail: &str) -> Self {
        Self::new(502, format!("Bad Gateway: {detail}")).with_header("content-type", "text/plain")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// 5xx responses count against the version that produced them.
    pub fn is_server_error(&self) -> bool {
        self.status_code >= 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_are_sorted_and_raw() {
        let req = EdgeRequest::get("/search").with_query("?q=a%20b&page=2&flag");
        assert_eq!(
            req.sorted_query_pairs(),
            vec![("flag", ""), ("page", "2"), ("q", "a%20b")]
        );
        assert_eq!(req.path_and_query(), "/search?q=a%20b&page=2&flag");
    }

    #[test]
    fn cookie_header_roundtrip() {
        let cookies = parse_cookie_header("session=abc; theme=dark ;;");
        assert_eq!(cookies.len(), 2);

        let mut req = EdgeRequest::get("/");
        req.cookies = cookies;
        assert_eq!(req.cookie("theme"), Some("dark"));
        assert_eq!(req.cookie_header().unwrap(), "session=abc; theme=dark");
    }

    #[test]
    fn repeated_cookies_keep_order() {
        let mut req = EdgeRequest::get("/");
        req.cookies = parse_cookie_header("a=1; b=2; a=3");
        assert_eq!(req.cookie_header().unwrap(), "a=1; b=2; a=3");
        assert_eq!(req.cookie("a"), Some("1"));
        assert_eq!(
            req.sorted_cookie_pairs(),
            vec![("a", "1"), ("a", "3"), ("b", "2")]
        );
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = EdgeRequest::get("/").with_header("Accept-Language", "en");
        assert_eq!(req.header("accept-language"), Some("en"));
        assert_eq!(req.header("ACCEPT-LANGUAGE"), Some("en"));
    }

    #[test]
    fn only_get_and_head_are_cacheable() {
        assert!(EdgeRequest::get("/").is_cacheable_method());
        assert!(EdgeRequest::new("head", "/").is_cacheable_method());
        assert!(!EdgeRequest::new("POST", "/").is_cacheable_method());
    }
}
