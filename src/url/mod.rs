//! URL handling: canonicalization, host keys and crawl scope matching

mod domain;
mod matcher;
mod normalize;

pub use domain::{extract_domain, extract_host};
pub use matcher::{matches_any, matches_wildcard};
pub use normalize::{normalize_parsed, normalize_url};
