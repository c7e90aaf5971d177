use crate::UrlError;
use url::Url;

/// Query parameters that only carry click tracking and never change content
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "msclkid", "_ga"];

/// Canonicalizes a URL so that equivalent spellings share one visited-set key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Accept only `http` and `https` (the scheme itself is kept)
/// 3. Lowercase the host (default ports are dropped by the parser)
/// 4. Normalize the path: remove dot segments, collapse repeated slashes,
///    drop a trailing slash except on the root
/// 5. Remove the fragment
/// 6. Remove tracking query parameters (`utm_*`, `fbclid`, ...)
/// 7. Sort the remaining query parameters; drop an empty query
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::normalize_url;
///
/// let url = normalize_url("http://Example.COM/cars/../used/?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/used");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_parsed(url)
}

/// Same as [`normalize_url`] for an already parsed URL
pub fn normalize_parsed(mut url: Url) -> Result<Url, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();
    if host.is_empty() {
        return Err(UrlError::MissingHost);
    }
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let path = normalize_path(url.path());
    url.set_path(&path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    // Stable sort keeps repeated keys in their original order
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
