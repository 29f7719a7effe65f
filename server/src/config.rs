//! Server configuration
//!
//! Configuration is loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory that relative slide paths are resolved against
    pub slides_dir: PathBuf,
    /// Longest side of thumbnails produced by the CLI
    pub thumbnail_size: u32,
    /// Slide cache configuration
    pub cache: CacheConfig,
}

/// Slide cache and label policy configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Idle time after which a slide is released
    pub idle_ttl: Duration,
    /// How often idle slides are swept
    pub sweep_interval: Duration,
    /// Hide label images for every slide
    pub suppress_labels: bool,
    /// Draw a placeholder when a slide has no label
    pub placeholder_labels: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slides_dir: PathBuf::from("./slides"),
            thumbnail_size: 1024,
            cache: CacheConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(3 * 60),
            suppress_labels: false,
            placeholder_labels: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("SLIDES_DIR")
            && !dir.is_empty()
        {
            config.slides_dir = PathBuf::from(dir);
        }
        if let Some(val) = lookup("THUMBNAIL_SIZE")
            && let Ok(size) = val.parse::<u32>()
            && size > 0
        {
            config.thumbnail_size = size;
        }

        // Cache config
        if let Some(val) = lookup("SLIDE_IDLE_TTL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.cache.idle_ttl = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("SLIDE_SWEEP_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
            && secs > 0
        {
            config.cache.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("SUPPRESS_LABELS") {
            config.cache.suppress_labels = parse_flag(&val);
        }
        if let Some(val) = lookup("PLACEHOLDER_LABELS") {
            config.cache.placeholder_labels = parse_flag(&val);
        }

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.slides_dir, PathBuf::from("./slides"));
        assert_eq!(config.thumbnail_size, 1024);
        assert_eq!(config.cache.idle_ttl, Duration::from_secs(300));
        assert_eq!(config.cache.sweep_interval, Duration::from_secs(180));
        assert!(!config.cache.suppress_labels);
        assert!(config.cache.placeholder_labels);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = Config::from_lookup(lookup(&[
            ("SLIDES_DIR", "/data/slides"),
            ("THUMBNAIL_SIZE", "512"),
            ("SLIDE_IDLE_TTL_SECS", "60"),
            ("SLIDE_SWEEP_INTERVAL_SECS", "15"),
            ("SUPPRESS_LABELS", "TRUE"),
            ("PLACEHOLDER_LABELS", "0"),
        ]));
        assert_eq!(config.slides_dir, PathBuf::from("/data/slides"));
        assert_eq!(config.thumbnail_size, 512);
        assert_eq!(config.cache.idle_ttl, Duration::from_secs(60));
        assert_eq!(config.cache.sweep_interval, Duration::from_secs(15));
        assert!(config.cache.suppress_labels);
        assert!(!config.cache.placeholder_labels);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("THUMBNAIL_SIZE", "0"),
            ("SLIDE_IDLE_TTL_SECS", "soon"),
            ("SLIDE_SWEEP_INTERVAL_SECS", "0"),
        ]));
        assert_eq!(config.thumbnail_size, 1024);
        assert_eq!(config.cache.idle_ttl, Duration::from_secs(300));
        assert_eq!(config.cache.sweep_interval, Duration::from_secs(180));
    }
}
