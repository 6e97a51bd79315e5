use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Source kind a cache entry is keyed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Url,
    Local,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Url => write!(f, "url"),
            SourceType::Local => write!(f, "local"),
        }
    }
}

/// Resolves `(extractor_name, content_id)` for a URL, if the URL belongs
/// to a source with a pluggable identity extractor (e.g. a yt-dlp style
/// extractor). Concrete extractor wiring is a stage-plugin concern and
/// out of scope here; the default implementation always returns `None`
/// so the cache key function stays total without a real extractor.
pub trait MediaIdentityExtractor: Send + Sync {
    fn extract(&self, url: &str) -> Option<(String, String)>;
}

/// Extractor that never resolves an identity; normalized-URL identity is
/// always used as the fallback.
pub struct NoopExtractor;

impl MediaIdentityExtractor for NoopExtractor {
    fn extract(&self, _url: &str) -> Option<(String, String)> {
        None
    }
}

/// Lowercase scheme/host, force https, drop fragment, sort query params
/// by key (stable, keeping blank values), strip a trailing slash from
/// the path unless the path is exactly `/`.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = url::Url::parse(raw)
        .map_err(|e| CoreError::InvalidSource(format!("unparseable url: {e}")))?;

    let scheme = if url.scheme().eq_ignore_ascii_case("http") {
        "https"
    } else {
        url.scheme()
    };
    let scheme = scheme.to_ascii_lowercase();
    url.set_scheme(&scheme)
        .map_err(|_| CoreError::InvalidSource("cannot set scheme".to_string()))?;

    if let Some(host) = url.host_str() {
        let host = host.to_ascii_lowercase();
        url.set_host(Some(&host))
            .map_err(|e| CoreError::InvalidSource(format!("invalid host: {e}")))?;
    }

    url.set_fragment(None);

    // Sort query params by key, stable, keeping blank values.
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let mut sorted = pairs;
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &sorted {
            serializer.append_pair(k, v);
        }
        url.set_query(Some(&serializer.finish()));
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        url.set_path(trimmed);
    }

    Ok(url.to_string())
}

/// `file:<sha256_hex>` over the entire byte stream.
pub fn compute_file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive the canonical source string and resulting cache key for a URL
/// input, trying the extractor identity first and falling back to the
/// normalized URL. Extractor failure is never fatal.
pub fn compute_url_cache_key(
    raw_url: &str,
    extractor: &dyn MediaIdentityExtractor,
) -> Result<(String, String)> {
    let canonical = match extractor.extract(raw_url) {
        Some((name, id)) => format!("ytdlp:{}:{}", name.to_ascii_lowercase(), id),
        None => format!("url:{}", normalize_url(raw_url)?),
    };
    Ok((canonical.clone(), sha256_hex(&canonical)))
}

/// Derive the canonical source string and cache key for a local input
/// identified by its content hash.
pub fn compute_local_cache_key(file_hash: &str) -> (String, String) {
    let canonical = format!("file:{}", file_hash);
    (canonical.clone(), sha256_hex(&canonical))
}

/// Top-level entry point mirroring the original's dispatch-by-source-type
/// key derivation. Returns `(source_ref, cache_key)`.
pub fn compute_cache_key_from_source(
    source_type: SourceType,
    source_url: Option<&str>,
    file_hash: Option<&str>,
    extractor: &dyn MediaIdentityExtractor,
) -> Result<(String, String)> {
    match source_type {
        SourceType::Url => {
            let url = source_url.ok_or_else(|| {
                CoreError::InvalidSource("url source_type requires source_url".to_string())
            })?;
            let (_, key) = compute_url_cache_key(url, extractor)?;
            Ok((normalize_url(url)?, key))
        }
        SourceType::Local => {
            let hash = file_hash.ok_or_else(|| {
                CoreError::InvalidSource("local source_type requires file_hash".to_string())
            })?;
            let (_, key) = compute_local_cache_key(hash);
            Ok((hash.to_string(), key))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_scheme_and_host() {
        let a = normalize_url("HTTPS://Example.COM/path").unwrap();
        assert_eq!(a, "https://example.com/path");
    }

    #[test]
    fn normalize_rewrites_http_to_https() {
        let a = normalize_url("http://example.com/v").unwrap();
        assert!(a.starts_with("https://"));
    }

    #[test]
    fn normalize_drops_fragment() {
        let a = normalize_url("https://example.com/v#frag").unwrap();
        assert!(!a.contains('#'));
    }

    #[test]
    fn normalize_sorts_query_params() {
        let a = normalize_url("https://example.com/v?b=y&a=x").unwrap();
        let b = normalize_url("https://example.com/v?a=x&b=y").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_keeps_blank_values() {
        let a = normalize_url("https://example.com/v?a=&b=y").unwrap();
        assert!(a.contains("a=") && a.contains("b=y"));
    }

    #[test]
    fn normalize_strips_trailing_slash_except_root() {
        let a = normalize_url("https://example.com/v/").unwrap();
        assert_eq!(a, "https://example.com/v");
        let root = normalize_url("https://example.com/").unwrap();
        assert_eq!(root, "https://example.com/");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_url("HTTP://Example.com/v/?b=y&a=x#f").unwrap();
        let twice = normalize_url(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn cosmetic_url_variants_share_a_cache_key() {
        let extractor = NoopExtractor;
        let (_, k1) =
            compute_url_cache_key("https://EXAMPLE.com/v/?a=x&b=y#f", &extractor).unwrap();
        let (_, k2) = compute_url_cache_key("http://example.com/v?b=y&a=x", &extractor).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn extractor_identity_takes_priority() {
        struct Fixed;
        impl MediaIdentityExtractor for Fixed {
            fn extract(&self, _url: &str) -> Option<(String, String)> {
                Some(("YouTube".to_string(), "abc123".to_string()))
            }
        }
        let (canonical, _) = compute_url_cache_key("https://example.com/v", &Fixed).unwrap();
        assert_eq!(canonical, "ytdlp:youtube:abc123");
    }

    #[test]
    fn local_key_is_content_addressed() {
        let hash_a = compute_file_hash(b"hello world");
        let hash_b = compute_file_hash(b"hello world");
        assert_eq!(hash_a, hash_b);
        let (_, key_a) = compute_local_cache_key(&hash_a);
        let (_, key_b) = compute_local_cache_key(&hash_b);
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn different_bytes_hash_differently() {
        let a = compute_file_hash(b"hello");
        let b = compute_file_hash(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn missing_source_url_is_invalid_source() {
        let err =
            compute_cache_key_from_source(SourceType::Url, None, None, &NoopExtractor).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSource(_)));
    }

    #[test]
    fn missing_file_hash_is_invalid_source() {
        let err = compute_cache_key_from_source(SourceType::Local, None, None, &NoopExtractor)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSource(_)));
    }
}
