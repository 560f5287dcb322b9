//! ffmpeg-backed segment producer
//!
//! Runs one ffmpeg process per segment. Output is written to a `.part` file
//! next to the final artifact and renamed on success, so a partially written
//! segment is never visible under its final name.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use super::producer::{ProducerError, SegmentProducer, SegmentRequest};
use crate::config::ProducerConfig;

/// Bytes of stderr kept in failure reports
const STDERR_TAIL_BYTES: usize = 2048;

/// Segment producer that shells out to ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegSegmentProducer {
    ffmpeg_path: PathBuf,
    process_timeout: Option<Duration>,
    extra_args: Vec<String>,
}

impl FfmpegSegmentProducer {
    pub fn new(config: &ProducerConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            process_timeout: config.process_timeout,
            extra_args: config.extra_args.clone(),
        }
    }

    /// Checks that the configured ffmpeg binary runs.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|status| status.success())
    }

    /// ffmpeg invocation writing segment `request.index` to `output_path`.
    pub fn build_command(&self, request: &SegmentRequest, output_path: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y");

        // Input-side seek lands on the keyframe the boundary was probed from
        if request.bounds.start > 0.0 {
            cmd.arg("-ss").arg(format!("{:.3}", request.bounds.start));
        }
        cmd.arg("-i").arg(&request.input_path);

        if let Some(duration) = request.bounds.duration {
            cmd.arg("-t").arg(format!("{duration:.3}"));
        }

        if request.direct_play {
            cmd.arg("-c").arg("copy");
        } else {
            match &request.video {
                Some(video) => {
                    cmd.arg("-c:v").arg(&video.codec);
                    if let Some(preset) = &video.preset {
                        cmd.arg("-preset").arg(preset);
                    }
                    if let Some(bitrate) = video.bitrate_kbps {
                        cmd.arg("-b:v").arg(format!("{bitrate}k"));
                    }
                    if let Some(scale) = scale_filter(video.width, video.height) {
                        cmd.arg("-vf").arg(scale);
                    }
                }
                None => {
                    cmd.arg("-c:v").arg("copy");
                }
            }

            match &request.audio {
                Some(audio) => {
                    cmd.arg("-c:a").arg(&audio.codec);
                    if let Some(bitrate) = audio.bitrate_kbps {
                        cmd.arg("-b:a").arg(format!("{bitrate}k"));
                    }
                    if let Some(channels) = audio.channels {
                        cmd.arg("-ac").arg(channels.to_string());
                    }
                    if let Some(sample_rate) = audio.sample_rate {
                        cmd.arg("-ar").arg(sample_rate.to_string());
                    }
                }
                None => {
                    cmd.arg("-c:a").arg("copy");
                }
            }
        }

        cmd.arg("-output_ts_offset")
            .arg(format!(
                "{:.3}",
                request.bounds.start + request.timestamp_offset
            ))
            .arg("-f")
            .arg("mpegts")
            .args(&self.extra_args)
            .arg(output_path);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }

    async fn run(
        &self,
        request: &SegmentRequest,
        partial_path: &Path,
    ) -> Result<(), ProducerError> {
        let mut cmd = self.build_command(request, partial_path);
        let child = cmd.spawn().map_err(|e| ProducerError::SpawnFailed {
            reason: format!("{}: {e}", self.ffmpeg_path.display()),
        })?;

        let output = match self.process_timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ProducerError::Timeout {
                    index: request.index,
                    seconds: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(ProducerError::ProcessFailed {
                index: request.index,
                reason: format!(
                    "ffmpeg exited with {}: {}",
                    output.status,
                    stderr_tail(&output.stderr)
                ),
            })
        }
    }
}

#[async_trait]
impl SegmentProducer for FfmpegSegmentProducer {
    async fn produce(&self, request: &SegmentRequest) -> Result<(), ProducerError> {
        let started = Instant::now();
        let partial_path = partial_path(&request.output_path);

        tracing::debug!(
            "Starting ffmpeg for segment {}: {} -> {}",
            request.index,
            request.input_path.display(),
            request.output_path.display()
        );

        if let Err(e) = self.run(request, &partial_path).await {
            discard_partial(&partial_path).await;
            return Err(e);
        }

        if tokio::fs::metadata(&partial_path).await.is_err() {
            return Err(ProducerError::MissingOutput { path: partial_path });
        }
        if let Err(e) = tokio::fs::rename(&partial_path, &request.output_path).await {
            discard_partial(&partial_path).await;
            return Err(e.into());
        }

        tracing::debug!(
            "ffmpeg finished segment {} in {:?}",
            request.index,
            started.elapsed()
        );

        Ok(())
    }
}

/// Scale filter keeping aspect ratio when only one dimension is given.
fn scale_filter(width: Option<u32>, height: Option<u32>) -> Option<String> {
    match (width, height) {
        (Some(width), Some(height)) => Some(format!("scale={width}:{height}")),
        (Some(width), None) => Some(format!("scale={width}:-2")),
        (None, Some(height)) => Some(format!("scale=-2:{height}")),
        (None, None) => None,
    }
}

/// Removes a leftover `.part` file; a missing file is not an error.
async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!("Failed to remove partial output {}: {}", path.display(), e);
        }
    }
}

fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcoding::options::{AudioProfile, SegmentBounds, VideoProfile};

    fn create_test_request() -> SegmentRequest {
        SegmentRequest {
            index: 2,
            input_path: PathBuf::from("/media/input.mkv"),
            output_path: PathBuf::from("/out/seg-00002.ts"),
            bounds: SegmentBounds {
                start: 12.0,
                duration: Some(6.0),
            },
            timestamp_offset: 0.0,
            video: None,
            audio: None,
            direct_play: false,
        }
    }

    fn command_args(
        producer: &FfmpegSegmentProducer,
        request: &SegmentRequest,
        output: &str,
    ) -> Vec<String> {
        producer
            .build_command(request, Path::new(output))
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    fn create_test_producer() -> FfmpegSegmentProducer {
        FfmpegSegmentProducer::new(&ProducerConfig::default())
    }

    #[test]
    fn test_args_seek_and_duration() {
        let producer = create_test_producer();
        let request = create_test_request();

        let args = command_args(&producer, &request, "/out/x.part");

        let seek = args.iter().position(|arg| arg == "-ss").unwrap();
        let input = args.iter().position(|arg| arg == "-i").unwrap();
        assert!(seek < input);
        assert_eq!(args[seek + 1], "12.000");
        assert_eq!(args[input + 1], "/media/input.mkv");

        let duration = args.iter().position(|arg| arg == "-t").unwrap();
        assert_eq!(args[duration + 1], "6.000");
        assert_eq!(args.last().unwrap(), "/out/x.part");
    }

    #[test]
    fn test_args_first_segment_has_no_seek() {
        let producer = create_test_producer();
        let mut request = create_test_request();
        request.bounds = SegmentBounds {
            start: 0.0,
            duration: None,
        };

        let args = command_args(&producer, &request, "out.part");

        assert!(!args.contains(&"-ss".to_string()));
        assert!(!args.contains(&"-t".to_string()));
    }

    #[test]
    fn test_args_direct_play_copies_streams() {
        let producer = create_test_producer();
        let mut request = create_test_request();
        request.direct_play = true;
        request.video = Some(VideoProfile::default());

        let args = command_args(&producer, &request, "out.part");

        let copy = args.iter().position(|arg| arg == "-c").unwrap();
        assert_eq!(args[copy + 1], "copy");
        assert!(!args.contains(&"-c:v".to_string()));
    }

    #[test]
    fn test_args_encoding_profiles() {
        let producer = create_test_producer();
        let mut request = create_test_request();
        request.video = Some(VideoProfile {
            codec: "libx264".to_string(),
            bitrate_kbps: Some(2500),
            width: Some(1280),
            height: None,
            preset: Some("veryfast".to_string()),
        });
        request.audio = Some(AudioProfile::default());
        request.timestamp_offset = 1.5;

        let args = command_args(&producer, &request, "out.part");
        let value_after = |flag: &str| {
            let position = args.iter().position(|arg| arg == flag).unwrap();
            args[position + 1].clone()
        };

        assert_eq!(value_after("-c:v"), "libx264");
        assert_eq!(value_after("-preset"), "veryfast");
        assert_eq!(value_after("-b:v"), "2500k");
        assert_eq!(value_after("-vf"), "scale=1280:-2");
        assert_eq!(value_after("-c:a"), "aac");
        assert_eq!(value_after("-b:a"), "128k");
        assert_eq!(value_after("-ac"), "2");
        assert_eq!(value_after("-output_ts_offset"), "13.500");
        assert_eq!(value_after("-f"), "mpegts");
    }

    #[test]
    fn test_extra_args_precede_output() {
        let config = ProducerConfig {
            extra_args: vec!["-threads".to_string(), "2".to_string()],
            ..ProducerConfig::default()
        };
        let producer = FfmpegSegmentProducer::new(&config);

        let args = command_args(&producer, &create_test_request(), "o");
        let len = args.len();

        assert_eq!(&args[len - 3..], ["-threads", "2", "o"]);
    }

    #[test]
    fn test_scale_filter() {
        assert_eq!(scale_filter(None, None), None);
        assert_eq!(scale_filter(None, Some(720)).unwrap(), "scale=-2:720");
        assert_eq!(scale_filter(Some(640), Some(360)).unwrap(), "scale=640:360");
    }

    #[test]
    fn test_partial_path_suffix() {
        assert_eq!(
            partial_path(Path::new("/out/seg-00001.ts")),
            PathBuf::from("/out/seg-00001.ts.part")
        );
    }

    #[tokio::test]
    async fn test_missing_binary_reports_spawn_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = ProducerConfig {
            ffmpeg_path: temp_dir.path().join("no-such-ffmpeg"),
            ..ProducerConfig::default()
        };
        let producer = FfmpegSegmentProducer::new(&config);
        let mut request = create_test_request();
        request.output_path = temp_dir.path().join("seg-00002.ts");

        let result = producer.produce(&request).await;

        assert!(matches!(result, Err(ProducerError::SpawnFailed { .. })));
        assert!(!producer.is_available().await);
        assert!(!request.output_path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_rename_discards_partial_output() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let stub = temp_dir.path().join("ffmpeg");
        std::fs::write(
            &stub,
            "#!/bin/sh\nfor last; do :; done\nprintf 'ts-data' > \"$last\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = ProducerConfig {
            ffmpeg_path: stub,
            ..ProducerConfig::default()
        };
        let producer = FfmpegSegmentProducer::new(&config);
        let mut request = create_test_request();
        // A non-empty directory cannot be replaced by a file
        request.output_path = temp_dir.path().join("seg-00002.ts");
        std::fs::create_dir(&request.output_path).unwrap();
        std::fs::write(request.output_path.join("occupied"), b"x").unwrap();

        let result = producer.produce(&request).await;

        assert!(matches!(result, Err(ProducerError::Io { .. })));
        assert!(!partial_path(&request.output_path).exists());
    }
}
