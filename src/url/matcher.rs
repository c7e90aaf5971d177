/// Checks if a domain matches a wildcard pattern
///
/// * `"example.com"` matches only `example.com`
/// * `"*.example.com"` matches `example.com` and any subdomain of it
///
/// Both arguments are expected in lowercase.
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base
            || candidate
                .strip_suffix(base)
                .is_some_and(|prefix| prefix.ends_with('.'))
    } else {
        candidate == pattern
    }
}

/// Returns true if `domain` matches any of the scope patterns
pub fn matches_any(patterns: &[String], domain: &str) -> bool {
    patterns.iter().any(|p| matches_wildcard(p, domain))
}
