//! Query String Hash (QSH) computation.
//!
//! A QSH binds a Connect JWT to one HTTP request:
//!
//! ```text
//! hex(SHA-256("{METHOD}&{CANONICAL_PATH}&{CANONICAL_QUERY}"))
//! ```
//!
//! The canonical form must match Atlassian's reference algorithm byte for
//! byte. A deviation either rejects legitimate tokens or, worse, lets a token
//! minted for one endpoint authenticate another.

use axum::http::{Method, Uri};
use ring::digest::{digest, SHA256};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Sentinel `qsh` carried by context tokens, which are not bound to a request.
pub const CONTEXT_QSH: &str = "context-qsh";

/// Query parameter that carries the token itself; never part of its own hash.
pub const TOKEN_QUERY_PARAMETER: &str = "jwt";

/// The parts of an HTTP request that a QSH covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: String,
    pub pathname: String,
    /// Decoded query parameters in arrival order. Repeated keys are allowed.
    pub query: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn new(
        method: impl Into<String>,
        pathname: impl Into<String>,
        query: Vec<(String, String)>,
    ) -> Self {
        Self {
            method: method.into(),
            pathname: pathname.into(),
            query,
        }
    }

    /// Build a descriptor from an HTTP method and request URI.
    ///
    /// The query string is form-decoded (`+` becomes a space) the same way
    /// the reference web stack parses `req.query`.
    pub fn from_http(method: &Method, uri: &Uri) -> Self {
        let query = uri
            .query()
            .map(|raw| {
                url::form_urlencoded::parse(raw.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        Self {
            method: method.as_str().to_string(),
            pathname: uri.path().to_string(),
            query,
        }
    }

    /// First value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Computes canonical requests and their hashes.
///
/// When the app is served below a path prefix (its base URL has a path), the
/// prefix is removed from request paths before canonicalization, since
/// Atlassian signs paths relative to the app's base URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCanonicalizer {
    base_path: Option<String>,
}

impl RequestCanonicalizer {
    /// Canonicalizer that strips `base_path` from request paths.
    ///
    /// A root or empty base path disables stripping.
    pub fn with_base_path(base_path: &str) -> Self {
        let trimmed = base_path.trim_end_matches('/');
        Self {
            base_path: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        }
    }

    /// Canonicalizer whose base path is the path component of `app_base_url`.
    pub fn for_base_url(app_base_url: &str) -> Self {
        match url::Url::parse(app_base_url) {
            Ok(parsed) => Self::with_base_path(parsed.path()),
            Err(_) => Self::default(),
        }
    }

    /// Hex-encoded SHA-256 of the canonical request.
    pub fn compute(&self, request: &RequestDescriptor) -> String {
        let canonical = self.canonical_request(request);
        hex::encode(digest(&SHA256, canonical.as_bytes()).as_ref())
    }

    /// `{METHOD}&{CANONICAL_PATH}&{CANONICAL_QUERY}`.
    pub fn canonical_request(&self, request: &RequestDescriptor) -> String {
        format!(
            "{}&{}&{}",
            request.method.to_uppercase(),
            canonical_path(self.strip_base_path(&request.pathname)),
            canonical_query(&request.query)
        )
    }

    fn strip_base_path<'a>(&self, pathname: &'a str) -> &'a str {
        let Some(base) = self.base_path.as_deref() else {
            return pathname;
        };

        match pathname.strip_prefix(base) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => pathname,
        }
    }
}

/// QSH for a request with no base-path stripping.
pub fn compute_qsh(request: &RequestDescriptor) -> String {
    RequestCanonicalizer::default().compute(request)
}

/// Percent-encode per RFC 3986: only `A-Z a-z 0-9 - _ . ~` stay literal.
fn encode_rfc3986(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn canonical_path(pathname: &str) -> String {
    if pathname.is_empty() {
        return "/".to_string();
    }

    let encoded: Vec<String> = pathname
        .split('/')
        .map(|segment| match urlencoding::decode(segment) {
            Ok(decoded) => encode_rfc3986(&decoded),
            // Escapes that do not decode to UTF-8 are re-encoded verbatim
            Err(_) => encode_rfc3986(segment),
        })
        .collect();
    let mut path = encoded.join("/");

    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    path
}

/// Order strings by UTF-16 code units, the order Atlassian's signers sort in.
///
/// Differs from byte order only between supplementary-plane characters and
/// U+E000..=U+FFFF.
fn utf16_order(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut grouped: HashMap<&str, Vec<&str>> = HashMap::new();
    for (key, value) in query {
        if key == TOKEN_QUERY_PARAMETER {
            continue;
        }
        grouped.entry(key.as_str()).or_default().push(value.as_str());
    }

    let mut grouped: Vec<(&str, Vec<&str>)> = grouped.into_iter().collect();
    grouped.sort_unstable_by(|(a, _), (b, _)| utf16_order(a, b));

    grouped
        .into_iter()
        .map(|(key, mut values)| {
            values.sort_unstable_by(|a, b| utf16_order(a, b));
            let joined: Vec<String> = values.into_iter().map(encode_rfc3986).collect();
            format!("{}={}", encode_rfc3986(key), joined.join(","))
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn request(method: &str, path: &str, pairs: &[(&str, &str)]) -> RequestDescriptor {
        RequestDescriptor::new(method, path, params(pairs))
    }

    #[test]
    fn test_known_hash_for_simple_get() {
        let qsh = compute_qsh(&request("GET", "/teams", &[("teamId", "42")]));
        assert_eq!(
            qsh,
            "2ec99d174fbe70ee32ea3a4d726a5b8a87846fb4bab14ab67bf9d1884cabaa4b"
        );
    }

    #[test]
    fn test_known_hash_for_lifecycle_post() {
        let qsh = compute_qsh(&request("POST", "/lifecycleEvents/installed", &[]));
        assert_eq!(
            qsh,
            "b095e9b05cc1429223c4d902edf427c3c5341c453c3d366572cc756832cb205d"
        );
    }

    #[test]
    fn test_known_hash_with_repeated_and_encoded_values() {
        let req = request(
            "get",
            "/rest/api/2/issue/",
            &[("b", "1"), ("a", "z"), ("a", "x y"), ("jwt", "token")],
        );
        assert_eq!(
            RequestCanonicalizer::default().canonical_request(&req),
            "GET&/rest/api/2/issue&a=x%20y,z&b=1"
        );
        assert_eq!(
            compute_qsh(&req),
            "e6f9634c9ad35642f07586b070b8fdeb07ccf4e2e925c08a5987538896614cb2"
        );
    }

    #[test]
    fn test_empty_path_and_root() {
        let canonicalizer = RequestCanonicalizer::default();
        assert_eq!(
            canonicalizer.canonical_request(&request("GET", "", &[])),
            "GET&/&"
        );
        assert_eq!(
            compute_qsh(&request("GET", "/", &[])),
            "c88caad15a1c1a900b8ac08aa9686f4e8184539bea1deda36e2f649430df3239"
        );
    }

    #[test]
    fn test_query_order_independent() {
        let forward = compute_qsh(&request("GET", "/x", &[("a", "1"), ("b", "2")]));
        let reverse = compute_qsh(&request("GET", "/x", &[("b", "2"), ("a", "1")]));
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_query_value_sensitive() {
        let one = compute_qsh(&request("GET", "/x", &[("a", "1"), ("b", "2")]));
        let two = compute_qsh(&request("GET", "/x", &[("a", "2"), ("b", "2")]));
        assert_ne!(one, two);
    }

    #[test]
    fn test_method_and_path_sensitive() {
        let get = compute_qsh(&request("GET", "/teams", &[("teamId", "42")]));
        let delete = compute_qsh(&request("DELETE", "/teams", &[("teamId", "42")]));
        let other_path = compute_qsh(&request("GET", "/projects", &[("teamId", "42")]));
        assert_ne!(get, delete);
        assert_ne!(get, other_path);
    }

    #[test]
    fn test_query_sorted_by_utf16_code_units() {
        // U+1F600 is a surrogate pair (0xD83D ..) and sorts before U+FF21,
        // although its UTF-8 bytes (0xF0 ..) sort after (0xEF ..)
        let query = params(&[
            ("\u{FF21}", "\u{FF21}"),
            ("\u{1F600}", "1"),
            ("\u{1F600}", "\u{FF21}"),
            ("\u{FF21}", "\u{1F600}"),
        ]);
        assert_eq!(
            canonical_query(&query),
            "%F0%9F%98%80=1,%EF%BC%A1&%EF%BC%A1=%F0%9F%98%80,%EF%BC%A1"
        );
    }

    #[test]
    fn test_jwt_parameter_excluded() {
        let with_token = compute_qsh(&request("GET", "/x", &[("a", "1"), ("jwt", "abc")]));
        let without = compute_qsh(&request("GET", "/x", &[("a", "1")]));
        assert_eq!(with_token, without);
    }

    #[test]
    fn test_rfc3986_reserved_characters_encoded() {
        let req = request("GET", "/x", &[("q", "a*b!c'(d)~e")]);
        assert_eq!(
            RequestCanonicalizer::default().canonical_request(&req),
            "GET&/x&q=a%2Ab%21c%27%28d%29~e"
        );
    }

    #[test]
    fn test_path_decoded_then_reencoded() {
        let canonicalizer = RequestCanonicalizer::default();
        let encoded = canonicalizer.canonical_request(&request("GET", "/a%20b/c", &[]));
        let raw = canonicalizer.canonical_request(&request("GET", "/a b/c", &[]));
        assert_eq!(encoded, "GET&/a%20b/c&");
        assert_eq!(encoded, raw);
    }

    #[test]
    fn test_path_ampersand_cannot_fake_query_separator() {
        let canonicalizer = RequestCanonicalizer::default();
        let in_path = canonicalizer.canonical_request(&request("GET", "/project&a=b", &[]));
        let in_query = canonicalizer.canonical_request(&request("GET", "/project", &[("a", "b")]));
        assert_ne!(in_path, in_query);
        assert_eq!(in_path, "GET&/project%26a%3Db&");
    }

    #[test]
    fn test_base_path_stripped() {
        let canonicalizer = RequestCanonicalizer::for_base_url("https://app.example.com/jira/");
        assert_eq!(
            canonicalizer.canonical_request(&request("GET", "/jira/teams", &[])),
            "GET&/teams&"
        );
        // A shared prefix that is not a full segment is left alone
        assert_eq!(
            canonicalizer.canonical_request(&request("GET", "/jiraz/teams", &[])),
            "GET&/jiraz/teams&"
        );
    }

    #[test]
    fn test_root_base_url_disables_stripping() {
        let canonicalizer = RequestCanonicalizer::for_base_url("https://app.example.com");
        assert_eq!(canonicalizer, RequestCanonicalizer::default());
    }

    #[test]
    fn test_from_http_form_decodes_query() {
        let uri: Uri = "/teams?teamId=42&name=a+b&x=%2F&jwt=tok".parse().unwrap();
        let descriptor = RequestDescriptor::from_http(&Method::GET, &uri);

        assert_eq!(descriptor.method, "GET");
        assert_eq!(descriptor.pathname, "/teams");
        assert_eq!(descriptor.query_value("name"), Some("a b"));
        assert_eq!(descriptor.query_value("x"), Some("/"));
        assert_eq!(descriptor.query_value("jwt"), Some("tok"));
        assert_eq!(descriptor.query_value("missing"), None);
    }
}
