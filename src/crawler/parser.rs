//! HTML parser turning fetched pages into records and follow-up tasks
//!
//! Parsing is a pure function of the fetch result: the same input always
//! yields the same records (timestamps aside) and links.

use crate::crawler::extract::{collapse_whitespace, Extractor};
use crate::crawler::fetcher::FetchResult;
use crate::crawler::frontier::UrlTask;
use crate::storage::Record;
use crate::ParseError;
use scraper::{Html, Selector};

/// Extracted information from an HTML page
#[derive(Debug, Clone)]
pub struct ParsedPage {
    /// The page title (from the `<title>` tag)
    pub title: Option<String>,

    /// Records produced by the extraction rules
    pub records: Vec<Record>,

    /// Links to follow, one depth below the parsed page
    pub links: Vec<UrlTask>,
}

/// Parser for fetched pages
#[derive(Debug, Clone)]
pub struct Parser {
    extractor: Extractor,
}

impl Parser {
    pub fn new(extractor: Extractor) -> Self {
        Self { extractor }
    }

    /// Parses a fetched page found at `depth`
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for non-HTML content or an empty body. The
    /// error concerns this URL only.
    pub fn parse(&self, fetched: &FetchResult, depth: u32) -> Result<ParsedPage, ParseError> {
        if !is_html(fetched.content_type.as_deref(), &fetched.body) {
            return Err(ParseError::new(
                fetched.url.as_str(),
                format!(
                    "not an HTML document (content type: {})",
                    fetched.content_type.as_deref().unwrap_or("none")
                ),
            ));
        }

        if fetched.body.trim().is_empty() {
            return Err(ParseError::new(fetched.url.as_str(), "empty body"));
        }

        let document = Html::parse_document(&fetched.body);
        let title = extract_title(&document);

        let records = self.extractor.extract_records(
            &document,
            fetched.url.as_str(),
            &fetched.final_url,
            title.as_deref(),
            fetched.status_code,
        );

        let links = self
            .extractor
            .extract_links(&document, &fetched.final_url)
            .into_iter()
            .filter(|url| *url != fetched.url)
            .map(|url| UrlTask::new(url, depth + 1))
            .collect();

        Ok(ParsedPage {
            title,
            records,
            links,
        })
    }
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| collapse_whitespace(element.text()))
        .filter(|s| !s.is_empty())
}

/// Decides whether a response is HTML
///
/// Trusts the Content-Type header when present; without one, sniffs the
/// first non-blank character of the body.
fn is_html(content_type: Option<&str>, body: &str) -> bool {
    match content_type {
        Some(ct) => {
            let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            mime == "text/html" || mime == "application/xhtml+xml"
        }
        None => body.trim_start().starts_with('<'),
    }
}
