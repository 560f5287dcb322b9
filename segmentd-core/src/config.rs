//! Centralized configuration for segmentd.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

use crate::transcoding::WindowPolicy;

/// Central configuration for all segmentd components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct SegmentdConfig {
    pub coordinator: CoordinatorConfig,
    pub producer: ProducerConfig,
}

/// Segment coordinator configuration.
///
/// Controls read-ahead window sizes, per-request deadlines, and how many
/// segments of one window are produced at once.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Segments scheduled behind a requested index
    pub segment_buffer_min: usize,
    /// Segments scheduled ahead of the window start beyond `segment_buffer_min`;
    /// inputs with at most this many segments are produced whole
    pub segment_buffer_max: usize,
    /// Deadline for one `serve_segment` call (None = wait indefinitely)
    pub segment_timeout: Option<Duration>,
    /// Segments of one window produced concurrently (1 = sequential)
    pub window_concurrency: usize,
    /// Produce the first window during initialization
    pub prime_on_initialize: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            segment_buffer_min: 3,
            segment_buffer_max: 5,
            segment_timeout: Some(Duration::from_secs(60)),
            window_concurrency: 1,
            prime_on_initialize: true,
        }
    }
}

impl CoordinatorConfig {
    /// Window policy derived from the buffer sizes.
    pub fn window_policy(&self) -> WindowPolicy {
        WindowPolicy::new(self.segment_buffer_min, self.segment_buffer_max)
    }

    /// Checks that the configuration can drive a coordinator.
    ///
    /// # Errors
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.segment_buffer_max == 0 {
            return Err("segment_buffer_max must be at least 1".to_string());
        }
        if self.window_concurrency == 0 {
            return Err("window_concurrency must be at least 1".to_string());
        }
        if self.segment_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err("segment_timeout must be non-zero when set".to_string());
        }
        Ok(())
    }
}

/// ffmpeg producer configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// ffmpeg binary, resolved through PATH when relative
    pub ffmpeg_path: PathBuf,
    /// Time limit for one ffmpeg process (None = unlimited)
    pub process_timeout: Option<Duration>,
    /// Arguments inserted before the output path
    pub extra_args: Vec<String>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            process_timeout: Some(Duration::from_secs(300)), // 5 minutes
            extra_args: Vec::new(),
        }
    }
}

impl SegmentdConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(count) = env_parse::<usize>("SEGMENTD_BUFFER_MIN") {
            config.coordinator.segment_buffer_min = count;
        }

        if let Some(count) = env_parse::<usize>("SEGMENTD_BUFFER_MAX") {
            config.coordinator.segment_buffer_max = count;
        }

        if let Some(seconds) = env_parse::<u64>("SEGMENTD_SEGMENT_TIMEOUT_SECS") {
            config.coordinator.segment_timeout = match seconds {
                0 => None,
                seconds => Some(Duration::from_secs(seconds)),
            };
        }

        if let Some(count) = env_parse::<usize>("SEGMENTD_WINDOW_CONCURRENCY") {
            config.coordinator.window_concurrency = count;
        }

        if let Ok(path) = std::env::var("SEGMENTD_FFMPEG_PATH")
            && !path.is_empty()
        {
            config.producer.ffmpeg_path = PathBuf::from(path);
        }

        if let Some(seconds) = env_parse::<u64>("SEGMENTD_PROCESS_TIMEOUT_SECS") {
            config.producer.process_timeout = match seconds {
                0 => None,
                seconds => Some(Duration::from_secs(seconds)),
            };
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = SegmentdConfig::default();

        assert_eq!(config.coordinator.segment_buffer_min, 3);
        assert_eq!(config.coordinator.segment_buffer_max, 5);
        assert_eq!(config.coordinator.window_concurrency, 1);
        assert_eq!(
            config.coordinator.segment_timeout,
            Some(Duration::from_secs(60))
        );
        assert!(config.coordinator.prime_on_initialize);
        assert_eq!(config.producer.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert!(config.coordinator.validate().is_ok());
    }

    #[test]
    fn test_window_policy_from_config() {
        let config = CoordinatorConfig {
            segment_buffer_min: 2,
            segment_buffer_max: 4,
            ..Default::default()
        };

        assert_eq!(config.window_policy(), WindowPolicy::new(2, 4));
    }

    #[test]
    fn test_validate_rejects_degenerate_settings() {
        let no_lookahead = CoordinatorConfig {
            segment_buffer_max: 0,
            ..Default::default()
        };
        assert!(no_lookahead.validate().is_err());

        let no_workers = CoordinatorConfig {
            window_concurrency: 0,
            ..Default::default()
        };
        assert!(no_workers.validate().is_err());

        let zero_timeout = CoordinatorConfig {
            segment_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("SEGMENTD_BUFFER_MIN", "2");
            std::env::set_var("SEGMENTD_BUFFER_MAX", "8");
            std::env::set_var("SEGMENTD_SEGMENT_TIMEOUT_SECS", "0");
            std::env::set_var("SEGMENTD_WINDOW_CONCURRENCY", "not-a-number");
            std::env::set_var("SEGMENTD_FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg");
            std::env::set_var("SEGMENTD_PROCESS_TIMEOUT_SECS", "90");
        }

        let config = SegmentdConfig::from_env();

        assert_eq!(config.coordinator.segment_buffer_min, 2);
        assert_eq!(config.coordinator.segment_buffer_max, 8);
        assert_eq!(config.coordinator.segment_timeout, None);
        assert_eq!(config.coordinator.window_concurrency, 1);
        assert_eq!(
            config.producer.ffmpeg_path,
            PathBuf::from("/opt/ffmpeg/bin/ffmpeg")
        );
        assert_eq!(
            config.producer.process_timeout,
            Some(Duration::from_secs(90))
        );

        // Cleanup
        unsafe {
            std::env::remove_var("SEGMENTD_BUFFER_MIN");
            std::env::remove_var("SEGMENTD_BUFFER_MAX");
            std::env::remove_var("SEGMENTD_SEGMENT_TIMEOUT_SECS");
            std::env::remove_var("SEGMENTD_WINDOW_CONCURRENCY");
            std::env::remove_var("SEGMENTD_FFMPEG_PATH");
            std::env::remove_var("SEGMENTD_PROCESS_TIMEOUT_SECS");
        }
    }
}
