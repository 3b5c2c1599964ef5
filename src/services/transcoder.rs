use async_trait::async_trait;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::models::params::MediaOptions;

/// Keep stored diagnostics readable; ffmpeg stderr can be very long.
const MAX_MESSAGE_LEN: usize = 2000;

/// Read size between cancellation checks while archiving.
const ZIP_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub options: MediaOptions,
}

/// What the external tool reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeReport {
    pub success: bool,
    pub message: String,
}

/// The media transformation, treated as a black box by the worker.
///
/// Implementations must stop the underlying work when the returned future is
/// dropped; the worker drops it when its claim is lost.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeReport, TranscodeError>;
}

/// Runs `ffmpeg` for image/audio/video and zips everything else in-process.
pub struct FfmpegTranscoder {
    ffmpeg_bin: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }

    /// ffmpeg argument list for a request, or `None` for the zip fallback.
    pub fn ffmpeg_args(request: &TranscodeRequest) -> Option<Vec<String>> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-i".into(),
            request.input_path.display().to_string(),
        ];

        match &request.options {
            MediaOptions::Image(image) => {
                args.extend(["-q:v".into(), image.qscale().to_string()]);
            }
            MediaOptions::Audio(audio) => {
                if audio.normalize {
                    args.extend(["-af".into(), "loudnorm=I=-16:TP=-1.5:LRA=11".into()]);
                }
                args.extend([
                    "-ac".into(),
                    audio.channels.count().to_string(),
                    "-b:a".into(),
                    audio.bitrate.clone(),
                ]);
            }
            MediaOptions::Video(video) => {
                args.extend([
                    "-c:v".into(),
                    "libx264".into(),
                    "-b:v".into(),
                    video.video_bitrate.clone(),
                    "-c:a".into(),
                    "aac".into(),
                    "-b:a".into(),
                    video.audio_bitrate.clone(),
                    "-vf".into(),
                    format!("scale={}", video.resolution.scale()),
                ]);
            }
            MediaOptions::Archive => return None,
        }

        args.push(request.output_path.display().to_string());
        Some(args)
    }

    async fn run_ffmpeg(&self, args: Vec<String>) -> Result<TranscodeReport, TranscodeError> {
        let output = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(TranscodeError::Spawn)?;

        if output.status.success() {
            return Ok(TranscodeReport {
                success: true,
                message: "Compression finished".to_string(),
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(TranscodeReport {
            success: false,
            message: format!("ffmpeg exited with {}: {}", output.status, tail(stderr.trim())),
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeReport, TranscodeError> {
        tracing::debug!(
            input = %request.input_path.display(),
            output = %request.output_path.display(),
            "Starting transcode"
        );

        match Self::ffmpeg_args(request) {
            Some(args) => self.run_ffmpeg(args).await,
            None => {
                let input = request.input_path.clone();
                let output = request.output_path.clone();
                // Dropping this future cancels the token and stops the
                // blocking task at its next chunk.
                let cancel = CancellationToken::new();
                let _guard = cancel.clone().drop_guard();
                tokio::task::spawn_blocking(move || zip_file(&input, &output, &cancel))
                    .await
                    .map_err(|e| TranscodeError::Aborted(e.to_string()))??;
                Ok(TranscodeReport {
                    success: true,
                    message: "Archived with deflate".to_string(),
                })
            }
        }
    }
}

fn zip_file(input: &Path, output: &Path, cancel: &CancellationToken) -> Result<(), TranscodeError> {
    let mut source = std::fs::File::open(input)?;
    let target = std::fs::File::create(output)?;
    let name = input
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("input");

    let mut writer = zip::ZipWriter::new(target);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    writer.start_file(name, options)?;

    let mut chunk = vec![0u8; ZIP_CHUNK];
    loop {
        if cancel.is_cancelled() {
            drop(writer);
            if let Err(e) = std::fs::remove_file(output) {
                tracing::warn!(path = %output.display(), error = %e, "Failed to remove partial archive");
            }
            return Err(TranscodeError::Aborted("archive cancelled".to_string()));
        }
        let read = source.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        writer.write_all(&chunk[..read])?;
    }

    writer.finish()?;
    Ok(())
}

fn tail(text: &str) -> &str {
    if text.len() <= MAX_MESSAGE_LEN {
        return text;
    }
    let mut start = text.len() - MAX_MESSAGE_LEN;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Failed to launch encoder: {0}")]
    Spawn(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Transcode task aborted: {0}")]
    Aborted(String),
}
