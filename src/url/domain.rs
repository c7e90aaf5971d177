use url::Url;

/// Returns the rate-limit key of a URL: its lowercase host, plus the port
/// when one is given explicitly
///
/// Two servers on the same machine but different ports are separate hosts
/// for politeness purposes.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_harvest::url::extract_host;
///
/// let url = Url::parse("https://EXAMPLE.com/path").unwrap();
/// assert_eq!(extract_host(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(extract_host(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Returns the lowercase host name of a URL, without port
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}
