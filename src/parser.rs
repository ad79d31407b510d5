use select::document::Document;
use select::predicate::Name;
use thiserror::Error;

/// Bytes inspected when sniffing for binary content.
const SNIFF_LEN: usize = 1024;

/// Fields pulled out of one HTML page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSummary {
    pub title: String,
    pub h1: String,
    pub h2_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("body is not an HTML document ({0})")]
    NotHtml(String),
}

/// Turns a response body into a [`PageSummary`]. Must not panic on any input.
pub trait PageParser: Send + Sync {
    fn parse(&self, body: &[u8]) -> Result<PageSummary, ParseError>;
}

/// Default parser: first `<title>`, first `<h1>`, and the number of `<h2>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPageParser;

impl PageParser for HtmlPageParser {
    fn parse(&self, body: &[u8]) -> Result<PageSummary, ParseError> {
        let head = &body[..body.len().min(SNIFF_LEN)];
        if head.contains(&0) {
            return Err(ParseError::NotHtml("binary content".to_string()));
        }

        let html = String::from_utf8_lossy(body);
        let document = Document::from(&*html);

        let first_text = |tag: &str| {
            document
                .find(Name(tag))
                .next()
                .map(|node| node.text().trim().to_string())
                .unwrap_or_default()
        };

        Ok(PageSummary {
            title: first_text("title"),
            h1: first_text("h1"),
            h2_count: document.find(Name("h2")).count(),
        })
    }
}
