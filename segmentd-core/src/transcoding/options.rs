//! Transcode options handed to the coordinator by the metadata probe
//!
//! Options are immutable once a coordinator is built. The length of
//! `segment_times` is the authoritative segment count for the input.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Upper bound on segments per input; artifact names carry five index digits
const MAX_SEGMENTS: usize = 100_000;

/// Errors raised when transcode options are inconsistent
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptionsError {
    #[error("Segment prefix is invalid: {reason}")]
    InvalidPrefix { reason: String },

    #[error("No segment boundaries provided")]
    NoSegments,

    #[error("Input needs {count} segments, more than the limit of {max}")]
    TooManySegments { count: u64, max: usize },

    #[error("Segment boundary {index} is invalid: {reason}")]
    InvalidBoundary { index: usize, reason: String },

    #[error("Media duration {duration} ends before last segment start {last_start}")]
    DurationTooShort { duration: f64, last_start: f64 },

    #[error("Invalid segment length: {segment_length}")]
    InvalidSegmentLength { segment_length: f64 },

    #[error("Duplicate adaptive profile name: {name}")]
    DuplicateProfile { name: String },
}

/// Video encoding profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProfile {
    /// Encoder name passed to ffmpeg, e.g. "libx264"
    pub codec: String,
    /// Target bitrate in kbit/s
    pub bitrate_kbps: Option<u32>,
    /// Output width in pixels; height follows aspect ratio when unset
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Encoder preset, e.g. "veryfast"
    pub preset: Option<String>,
}

impl Default for VideoProfile {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            bitrate_kbps: None,
            width: None,
            height: None,
            preset: Some("veryfast".to_string()),
        }
    }
}

/// Audio encoding profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioProfile {
    /// Encoder name passed to ffmpeg, e.g. "aac"
    pub codec: String,
    /// Target bitrate in kbit/s
    pub bitrate_kbps: Option<u32>,
    pub channels: Option<u8>,
    pub sample_rate: Option<u32>,
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate_kbps: Some(128),
            channels: Some(2),
            sample_rate: None,
        }
    }
}

/// One rendition of an adaptive-bitrate ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveProfile {
    /// Rendition name, unique within a ladder
    pub name: String,
    /// Advertised bandwidth in bit/s
    pub bandwidth: u64,
    pub video: VideoProfile,
    pub audio: Option<AudioProfile>,
}

/// Time span covered by one segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentBounds {
    /// Start offset into the input, in seconds
    pub start: f64,
    /// Segment length in seconds; `None` runs to end of input
    pub duration: Option<f64>,
}

/// Everything the coordinator needs to know about one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeOptions {
    /// Source media file
    pub input_path: PathBuf,
    /// Directory segment artifacts are written to
    pub output_dir: PathBuf,
    /// Artifact filename prefix
    pub segment_prefix: String,
    /// Seconds added to output timestamps
    #[serde(default)]
    pub segment_offset: f64,
    /// Segment break times in seconds, one per segment
    pub segment_times: Vec<f64>,
    /// Total media duration; bounds the final segment when known
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub video: Option<VideoProfile>,
    #[serde(default)]
    pub audio: Option<AudioProfile>,
    #[serde(default)]
    pub adaptive_profiles: Vec<AdaptiveProfile>,
    /// Copy streams instead of re-encoding
    #[serde(default)]
    pub direct_play: bool,
}

impl TranscodeOptions {
    /// Creates options with explicit segment boundaries and no encoding profiles.
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        segment_prefix: impl Into<String>,
        segment_times: Vec<f64>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_dir: output_dir.into(),
            segment_prefix: segment_prefix.into(),
            segment_offset: 0.0,
            segment_times,
            duration: None,
            video: None,
            audio: None,
            adaptive_profiles: Vec::new(),
            direct_play: false,
        }
    }

    /// Creates options with evenly spaced boundaries covering `duration` seconds.
    ///
    /// # Errors
    /// - `OptionsError::InvalidSegmentLength` - Length is not a positive finite number
    /// - `OptionsError::NoSegments` - Duration is not positive
    /// - `OptionsError::TooManySegments` - More than `MAX_SEGMENTS` segments would be needed
    pub fn with_uniform_segments(
        input_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        segment_prefix: impl Into<String>,
        duration: f64,
        segment_length: f64,
    ) -> Result<Self, OptionsError> {
        if !segment_length.is_finite() || segment_length <= 0.0 {
            return Err(OptionsError::InvalidSegmentLength { segment_length });
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(OptionsError::NoSegments);
        }

        let count = (duration / segment_length).ceil();
        if count > MAX_SEGMENTS as f64 {
            return Err(OptionsError::TooManySegments {
                count: count as u64,
                max: MAX_SEGMENTS,
            });
        }

        let count = count as usize;
        let segment_times = (0..count).map(|i| i as f64 * segment_length).collect();

        let mut options = Self::new(input_path, output_dir, segment_prefix, segment_times);
        options.duration = Some(duration);
        Ok(options)
    }

    /// Number of addressable segments.
    pub fn total_segments(&self) -> usize {
        self.segment_times.len()
    }

    /// Time span of segment `index`, or `None` when out of range.
    pub fn segment_bounds(&self, index: usize) -> Option<SegmentBounds> {
        let start = *self.segment_times.get(index)?;
        let end = self.segment_times.get(index + 1).copied().or(self.duration);

        Some(SegmentBounds {
            start,
            duration: end.map(|end| (end - start).max(0.0)),
        })
    }

    /// Artifact filename for segment `index`.
    pub fn segment_filename(&self, index: usize) -> String {
        segment_filename(&self.segment_prefix, index)
    }

    /// Artifact path for segment `index`.
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(self.segment_filename(index))
    }

    /// Checks that boundaries and profiles are usable.
    ///
    /// # Errors
    /// - `OptionsError::InvalidPrefix` - Prefix is empty or contains a path separator
    /// - `OptionsError::NoSegments` - `segment_times` is empty
    /// - `OptionsError::TooManySegments` - More than `MAX_SEGMENTS` boundaries
    /// - `OptionsError::InvalidBoundary` - A boundary is negative, non-finite, or not increasing
    /// - `OptionsError::DurationTooShort` - `duration` ends before the last boundary
    /// - `OptionsError::DuplicateProfile` - Two adaptive profiles share a name
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.segment_prefix.is_empty() {
            return Err(OptionsError::InvalidPrefix {
                reason: "prefix is empty".to_string(),
            });
        }
        if self.segment_prefix.contains(['/', '\\']) {
            return Err(OptionsError::InvalidPrefix {
                reason: format!("'{}' contains a path separator", self.segment_prefix),
            });
        }

        if self.segment_times.is_empty() {
            return Err(OptionsError::NoSegments);
        }
        if self.segment_times.len() > MAX_SEGMENTS {
            return Err(OptionsError::TooManySegments {
                count: self.segment_times.len() as u64,
                max: MAX_SEGMENTS,
            });
        }

        let mut previous: Option<f64> = None;
        for (index, &time) in self.segment_times.iter().enumerate() {
            if !time.is_finite() || time < 0.0 {
                return Err(OptionsError::InvalidBoundary {
                    index,
                    reason: format!("{time} is not a non-negative time"),
                });
            }
            if let Some(previous) = previous
                && time <= previous
            {
                return Err(OptionsError::InvalidBoundary {
                    index,
                    reason: format!("{time} does not follow {previous}"),
                });
            }
            previous = Some(time);
        }

        if let (Some(duration), Some(last_start)) = (self.duration, previous)
            && duration <= last_start
        {
            return Err(OptionsError::DurationTooShort {
                duration,
                last_start,
            });
        }

        let mut names = std::collections::HashSet::new();
        for profile in &self.adaptive_profiles {
            if !names.insert(profile.name.as_str()) {
                return Err(OptionsError::DuplicateProfile {
                    name: profile.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// On-disk artifact name shared by the store and the producer.
pub fn segment_filename(prefix: &str, index: usize) -> String {
    format!("{prefix}-{index:05}.ts")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_options(times: Vec<f64>) -> TranscodeOptions {
        TranscodeOptions::new("/media/input.mkv", "/tmp/out", "seg", times)
    }

    #[test]
    fn test_segment_filename_zero_padded() {
        assert_eq!(segment_filename("prefix", 0), "prefix-00000.ts");
        assert_eq!(segment_filename("prefix", 42), "prefix-00042.ts");
        assert_eq!(segment_filename("prefix", 123456), "prefix-123456.ts");
    }

    #[test]
    fn test_segment_path_joins_output_dir() {
        let options = create_test_options(vec![0.0, 6.0]);
        assert_eq!(
            options.segment_path(1),
            PathBuf::from("/tmp/out/seg-00001.ts")
        );
    }

    #[test]
    fn test_segment_bounds() {
        let mut options = create_test_options(vec![0.0, 6.0, 11.5]);

        assert_eq!(
            options.segment_bounds(0),
            Some(SegmentBounds {
                start: 0.0,
                duration: Some(6.0)
            })
        );
        assert_eq!(
            options.segment_bounds(2),
            Some(SegmentBounds {
                start: 11.5,
                duration: None
            })
        );
        assert_eq!(options.segment_bounds(3), None);

        options.duration = Some(15.5);
        assert_eq!(options.segment_bounds(2).unwrap().duration, Some(4.0));
    }

    #[test]
    fn test_uniform_segments() {
        let options =
            TranscodeOptions::with_uniform_segments("in.mp4", "out", "seg", 20.0, 6.0).unwrap();

        assert_eq!(options.segment_times, vec![0.0, 6.0, 12.0, 18.0]);
        assert_eq!(options.total_segments(), 4);
        assert_eq!(options.segment_bounds(3).unwrap().duration, Some(2.0));
        assert!(options.validate().is_ok());

        assert!(matches!(
            TranscodeOptions::with_uniform_segments("in.mp4", "out", "seg", 20.0, 0.0),
            Err(OptionsError::InvalidSegmentLength { .. })
        ));
        assert_eq!(
            TranscodeOptions::with_uniform_segments("in.mp4", "out", "seg", 0.0, 6.0),
            Err(OptionsError::NoSegments)
        );
    }

    #[test]
    fn test_uniform_segments_capped() {
        assert!(matches!(
            TranscodeOptions::with_uniform_segments("in.mp4", "out", "seg", 1e12, 0.001),
            Err(OptionsError::TooManySegments {
                count,
                max: MAX_SEGMENTS,
            }) if count >= 999_999_999_999_999
        ));

        let at_limit = TranscodeOptions::with_uniform_segments(
            "in.mp4",
            "out",
            "seg",
            MAX_SEGMENTS as f64,
            1.0,
        )
        .unwrap();
        assert_eq!(at_limit.total_segments(), MAX_SEGMENTS);
        assert!(at_limit.validate().is_ok());

        let mut over_limit = at_limit;
        over_limit.segment_times.push(MAX_SEGMENTS as f64);
        assert!(matches!(
            over_limit.validate(),
            Err(OptionsError::TooManySegments { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_boundaries() {
        assert_eq!(
            create_test_options(vec![]).validate(),
            Err(OptionsError::NoSegments)
        );
        assert!(matches!(
            create_test_options(vec![0.0, 6.0, 6.0]).validate(),
            Err(OptionsError::InvalidBoundary { index: 2, .. })
        ));
        assert!(matches!(
            create_test_options(vec![-1.0]).validate(),
            Err(OptionsError::InvalidBoundary { index: 0, .. })
        ));
        assert!(matches!(
            create_test_options(vec![0.0, f64::NAN]).validate(),
            Err(OptionsError::InvalidBoundary { index: 1, .. })
        ));

        let mut options = create_test_options(vec![0.0, 6.0]);
        options.duration = Some(5.0);
        assert!(matches!(
            options.validate(),
            Err(OptionsError::DurationTooShort { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let mut options = create_test_options(vec![0.0]);
        options.segment_prefix = String::new();
        assert!(matches!(
            options.validate(),
            Err(OptionsError::InvalidPrefix { .. })
        ));

        options.segment_prefix = "../escape".to_string();
        assert!(matches!(
            options.validate(),
            Err(OptionsError::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_profiles() {
        let mut options = create_test_options(vec![0.0]);
        let profile = AdaptiveProfile {
            name: "720p".to_string(),
            bandwidth: 2_500_000,
            video: VideoProfile::default(),
            audio: None,
        };
        options.adaptive_profiles = vec![profile.clone(), profile];

        assert_eq!(
            options.validate(),
            Err(OptionsError::DuplicateProfile {
                name: "720p".to_string()
            })
        );
    }

    #[test]
    fn test_options_deserialize_from_metadata_json() {
        let json = r#"{
            "input_path": "/media/movie.mkv",
            "output_dir": "/var/cache/segments",
            "segment_prefix": "movie",
            "segment_times": [0.0, 4.0, 8.0],
            "video": { "codec": "libx264", "bitrate_kbps": 3000, "width": 1280, "height": null, "preset": null },
            "direct_play": false
        }"#;

        let options: TranscodeOptions = serde_json::from_str(json).unwrap();

        assert_eq!(options.total_segments(), 3);
        assert_eq!(options.segment_offset, 0.0);
        assert_eq!(options.video.as_ref().unwrap().bitrate_kbps, Some(3000));
        assert!(options.audio.is_none());
        assert!(options.adaptive_profiles.is_empty());
    }
}
