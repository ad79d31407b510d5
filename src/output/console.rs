use super::ResultSink;
use crate::error::{Error, Result};
use crate::fetcher::FetchResult;
use async_trait::async_trait;
use indicatif::MultiProgress;
use std::sync::Arc;

/// Prints a short block per result. Goes through `MultiProgress` when a
/// progress bar owns the terminal.
pub struct ConsoleSink {
    multi: Option<Arc<MultiProgress>>,
}

impl ConsoleSink {
    pub fn new(multi: Option<Arc<MultiProgress>>) -> Self {
        Self { multi }
    }

    fn emit(&self, line: &str) -> Result<()> {
        match &self.multi {
            Some(multi) => multi
                .println(line)
                .map_err(|e| Error::Export(e.to_string())),
            None => {
                println!("{}", line);
                Ok(())
            }
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new(None)
    }
}

pub fn render(result: &FetchResult) -> Vec<String> {
    match &result.error {
        None => vec![
            format!("✅ {}", result.url),
            format!("   Title:  {}", result.title),
            format!("   H1:     {}", result.h1),
            format!("   H2s:    {}", result.h2_count),
            format!("   Status: {}", result.status_code.unwrap_or(0)),
            format!("   Time:   {}ms", result.duration_ms()),
        ],
        Some(error) => {
            let mut lines = vec![format!("❌ {}", result.url), format!("   Error: {}", error)];
            if let Some(status) = result.status_code {
                lines.push(format!("   Status: {}", status));
            }
            lines.push(format!("   Time:  {}ms", result.duration_ms()));
            lines
        }
    }
}

#[async_trait]
impl ResultSink for ConsoleSink {
    async fn export(&mut self, results: &[FetchResult]) -> Result<()> {
        for result in results {
            for line in render(result) {
                self.emit(&line)?;
            }
        }
        Ok(())
    }
}
