use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::request::RequestTemplate;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "randpool".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Sizing of a [`RandomCache`](crate::RandomCache).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// The number of batches the cache tries to keep ready.
    pub target_depth: usize,

    /// Number of batches requested in a single fetch.
    ///
    /// `0` disables bulk fetching, every fetch then yields exactly one batch.
    pub bulk_batch_count: usize,

    /// Number of values in one batch.
    pub results_per_batch: usize,

    /// The number of bits the service charges for one batch.
    ///
    /// This is only used to shrink a bulk request when the remaining bit allowance does not
    /// cover the configured bulk size anymore.
    pub single_batch_bit_size: u64,

    /// How long [`get_or_wait`](crate::RandomCache::get_or_wait) sleeps between two attempts
    /// when it was not woken up by a fresh batch.
    #[serde(with = "humantime_serde")]
    pub wait_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            target_depth: 20,
            bulk_batch_count: 0,
            results_per_batch: 1,
            single_batch_bit_size: 0,
            wait_interval: Duration::from_millis(50),
        }
    }
}

impl CacheConfig {
    /// Derives a cache configuration for the given request.
    ///
    /// The cache holds at least 2 batches. Requests that draw values with replacement are
    /// fetched in bulks of half the cache size, all others one batch at a time.
    pub fn for_template(
        template: &RequestTemplate,
        results_per_batch: usize,
        cache_size: usize,
    ) -> Self {
        let target_depth = cache_size.max(2);
        let bulk_batch_count = if template.allows_bulk() {
            target_depth / 2
        } else {
            0
        };

        Self {
            target_depth,
            bulk_batch_count,
            results_per_batch,
            single_batch_bit_size: template.bits_per_batch(results_per_batch),
            ..Default::default()
        }
    }

    /// Whether the cache fetches several batches per request.
    pub fn is_bulk(&self) -> bool {
        self.bulk_batch_count > 0
    }

    /// The number of values requested by a regular, not downsized, fetch.
    pub fn request_count(&self) -> usize {
        if self.is_bulk() {
            self.bulk_batch_count * self.results_per_batch
        } else {
            self.results_per_batch
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// Sizing of the random value cache.
    pub cache: CacheConfig,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
