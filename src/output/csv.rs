use super::ResultSink;
use crate::error::{Error, Result};
use crate::fetcher::FetchResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub const HEADER: [&str; 7] = [
    "URL",
    "Title",
    "H1",
    "H2_Count",
    "Status_Code",
    "Duration_ms",
    "Error",
];

/// Writes results as CSV, replacing whatever was at `path`.
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, results: &[FetchResult]) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(HEADER)?;

        for result in results {
            let error = result
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();

            let h2_count = result.h2_count.to_string();
            let status = result.status_code.unwrap_or(0).to_string();
            let duration = result.duration_ms().to_string();

            writer.write_record([
                result.url.as_str(),
                result.title.as_str(),
                result.h1.as_str(),
                h2_count.as_str(),
                status.as_str(),
                duration.as_str(),
                error.as_str(),
            ])?;
        }

        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for CsvSink {
    async fn export(&mut self, results: &[FetchResult]) -> Result<()> {
        self.write_all(results).map_err(|e| {
            Error::Export(format!("{}: {}", self.path.display(), e))
        })?;
        log::info!("Exported {} results to {}", results.len(), self.path.display());
        Ok(())
    }
}
