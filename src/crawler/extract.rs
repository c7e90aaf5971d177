//! Compiled extraction rules
//!
//! Rules come from configuration as plain strings; compiling them once up
//! front turns every selector mistake into a configuration error instead of
//! a per-page failure.

use crate::config::{ExtractRule, LinksConfig};
use crate::storage::Record;
use crate::url::normalize_parsed;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashSet};
use url::Url;

/// Name of the rule used when no extraction rules are configured
pub const PAGE_RULE: &str = "page";

/// A field selector: `css selector` or `css selector@attribute`
///
/// An empty selector part (`@href`) reads the container element itself.
#[derive(Debug, Clone)]
pub struct FieldSelector {
    selector: Option<Selector>,
    attribute: Option<String>,
}

impl FieldSelector {
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let expr = expr.trim();
        let (css, attribute) = match expr.rsplit_once('@') {
            Some((css, attr)) if is_attribute_name(attr) => (css.trim(), Some(attr.to_string())),
            _ => (expr, None),
        };

        let selector = if css.is_empty() {
            if attribute.is_none() {
                return Err(ConfigError::InvalidSelector(
                    "empty field selector".to_string(),
                ));
            }
            None
        } else {
            Some(compile_selector(css)?)
        };

        Ok(Self {
            selector,
            attribute,
        })
    }

    /// Reads the value below `scope`, if the selector matches
    fn read(&self, scope: ElementRef<'_>, base: &Url) -> Option<String> {
        let element = match &self.selector {
            Some(selector) => scope.select(selector).next()?,
            None => scope,
        };

        match &self.attribute {
            Some(attr) => {
                let value = element.value().attr(attr)?.trim();
                if is_url_attribute(attr) {
                    base.join(value).ok().map(|u| u.to_string())
                } else {
                    Some(value.to_string())
                }
            }
            None => Some(collapse_whitespace(element.text())),
        }
    }
}

fn is_attribute_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
}

fn is_url_attribute(attr: &str) -> bool {
    matches!(attr, "href" | "src")
}

/// Parses a CSS selector, mapping failures to a configuration error
pub fn compile_selector(css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css)
        .map_err(|_| ConfigError::InvalidSelector(format!("cannot parse '{}'", css)))
}

/// Joins text nodes and collapses runs of whitespace into single spaces
pub fn collapse_whitespace<'a>(text: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for word in text.flat_map(str::split_whitespace) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    container: Selector,
    fields: Vec<(String, FieldSelector)>,
    key_fields: Vec<String>,
}

impl CompiledRule {
    fn compile(rule: &ExtractRule) -> Result<Self, ConfigError> {
        if rule.fields.is_empty() {
            return Err(ConfigError::Validation(format!(
                "extract rule '{}' has no fields",
                rule.name
            )));
        }

        let container = compile_selector(&rule.container)?;
        let fields = rule
            .fields
            .iter()
            .map(|(name, expr)| Ok((name.clone(), FieldSelector::parse(expr)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        for key in &rule.key_fields {
            if !rule.fields.contains_key(key) {
                return Err(ConfigError::Validation(format!(
                    "key field '{}' of rule '{}' is not one of its fields",
                    key, rule.name
                )));
            }
        }

        Ok(Self {
            name: rule.name.clone(),
            container,
            fields,
            key_fields: rule.key_fields.clone(),
        })
    }

    fn apply(&self, document: &Html, source_url: &str, base: &Url) -> Vec<Record> {
        document
            .select(&self.container)
            .filter_map(|container| {
                let fields: BTreeMap<String, String> = self
                    .fields
                    .iter()
                    .map(|(name, selector)| {
                        let value = selector.read(container, base).unwrap_or_default();
                        (name.clone(), value)
                    })
                    .collect();

                // A container where nothing matched is layout noise
                if fields.values().all(String::is_empty) {
                    return None;
                }
                Some(Record::new(&self.name, source_url, fields, &self.key_fields))
            })
            .collect()
    }
}

/// Record and link extraction for one crawl
#[derive(Debug, Clone)]
pub struct Extractor {
    rules: Vec<CompiledRule>,
    follow: Vec<FieldSelector>,
}

impl Extractor {
    pub fn new(rules: &[ExtractRule], links: &LinksConfig) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let follow = links
            .follow
            .iter()
            .map(|expr| {
                let mut selector = FieldSelector::parse(expr)?;
                if selector.attribute.is_none() {
                    selector.attribute = Some("href".to_string());
                }
                Ok(selector)
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { rules, follow })
    }

    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Applies every rule to the document
    ///
    /// Without configured rules, emits the single page record (`url`,
    /// `title`, `status_code`) keyed by the source URL.
    pub fn extract_records(
        &self,
        document: &Html,
        source_url: &str,
        base: &Url,
        title: Option<&str>,
        status_code: u16,
    ) -> Vec<Record> {
        if self.rules.is_empty() {
            let mut fields = BTreeMap::new();
            fields.insert("url".to_string(), source_url.to_string());
            fields.insert("title".to_string(), title.unwrap_or_default().to_string());
            fields.insert("status_code".to_string(), status_code.to_string());
            return vec![Record::new(
                PAGE_RULE,
                source_url,
                fields,
                &["url".to_string()],
            )];
        }

        self.rules
            .iter()
            .flat_map(|rule| rule.apply(document, source_url, base))
            .collect()
    }

    /// Collects followable links, resolved against `base` and normalized
    ///
    /// Drops `javascript:`, `mailto:`, `tel:`, `data:`, fragment-only and
    /// `download` links. The result has no duplicates and keeps document
    /// order.
    pub fn extract_links(&self, document: &Html, base: &Url) -> Vec<Url> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        let root = document.root_element();

        for follow in &self.follow {
            let Some(selector) = &follow.selector else {
                continue;
            };
            let attr = follow.attribute.as_deref().unwrap_or("href");

            for element in root.select(selector) {
                if element.value().attr("download").is_some() {
                    continue;
                }
                let Some(raw) = element.value().attr(attr) else {
                    continue;
                };
                if let Some(url) = resolve_link(raw, base) {
                    if seen.insert(url.to_string()) {
                        links.push(url);
                    }
                }
            }
        }

        links
    }
}

/// Resolves an href against the page URL; `None` for links not worth
/// following
pub fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let joined = base.join(href).ok()?;
    normalize_parsed(joined).ok()
}
