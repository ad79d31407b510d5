use crate::config::schema::{self, CrawlConfig, OutputConfig};
use crate::crawler::CrawlerEngine;
use crate::error::{Error, Result};
use crate::fetcher::HttpFetcher;
use crate::limiter::{DomainRateLimiter, RateConfig};
use crate::output::{ResultSink, console::ConsoleSink, csv::CsvSink};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<CrawlConfig> {
        let path = path.as_ref();
        let mut visited = HashSet::new();
        Self::load_with_inheritance(path, &mut visited, false)
    }

    fn load_with_inheritance(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        is_parent_load: bool,
    ) -> Result<CrawlConfig> {
        let path = fs::canonicalize(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        if visited.contains(&path) {
            return Err(Error::Config(format!(
                "Circular inheritance detected involving {}",
                path.display()
            )));
        }
        visited.insert(path.clone());

        let config = Self::load_file(&path)?;

        let final_config = if let Some(parent_path_str) = &config.extends {
            let parent_path = path
                .parent()
                .ok_or_else(|| {
                    Error::Config(format!(
                        "Cannot determine parent directory for {}",
                        path.display()
                    ))
                })?
                .join(parent_path_str);

            let parent_config = Self::load_with_inheritance(&parent_path, visited, true)?;
            Self::merge_configs(parent_config, config)
        } else {
            config
        };

        if !is_parent_load {
            Self::validate(&final_config)?;
        }

        Ok(final_config)
    }

    pub fn validate(config: &CrawlConfig) -> Result<()> {
        config.validate()?;
        config.rate.validate()
    }

    fn load_file(path: &Path) -> Result<CrawlConfig> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            Some("toml") => Ok(toml::from_str(&content)?),
            _ => Err(Error::Config(format!(
                "Unsupported file extension: {}",
                path.display()
            ))),
        }
    }

    fn merge_configs(mut parent: CrawlConfig, child: CrawlConfig) -> CrawlConfig {
        if !child.name.is_empty() {
            parent.name = child.name;
        }
        if !child.urls.is_empty() {
            parent.urls = child.urls;
        }
        if child.workers != schema::default_workers() {
            parent.workers = child.workers;
        }
        if child.rate != RateConfig::default() {
            parent.rate = child.rate;
        }
        if child.timeout_ms != schema::default_timeout() {
            parent.timeout_ms = child.timeout_ms;
        }
        if child.queue_capacity != schema::default_queue_capacity() {
            parent.queue_capacity = child.queue_capacity;
        }
        if child.user_agent != schema::default_user_agent() {
            parent.user_agent = child.user_agent;
        }
        if child.fail_on_http_error {
            parent.fail_on_http_error = true;
        }
        if child.output.is_some() {
            parent.output = child.output;
        }

        parent.extends = None;
        parent
    }

    /// Builds a ready-to-run engine. All configuration errors surface here,
    /// before any job is queued.
    pub fn create_engine(config: &CrawlConfig) -> Result<CrawlerEngine> {
        let fetcher = HttpFetcher::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .fail_on_http_error(config.fail_on_http_error)
            .build()?;
        let limiter = DomainRateLimiter::new(config.rate)?;

        CrawlerEngine::new(config.workers, limiter, Arc::new(fetcher))?
            .with_queue_capacity(config.queue_capacity)
    }

    pub fn create_sink(
        config: &CrawlConfig,
        multi: Option<Arc<indicatif::MultiProgress>>,
    ) -> Box<dyn ResultSink> {
        match &config.output {
            Some(OutputConfig::Csv { path }) => Box::new(CsvSink::new(PathBuf::from(path))),
            Some(OutputConfig::Console) | None => Box::new(ConsoleSink::new(multi)),
        }
    }
}
