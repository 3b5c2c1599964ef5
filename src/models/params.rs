//! Typed compression options.
//!
//! Params are stored on the job as opaque JSON. They are only interpreted
//! right before the transcoder runs, so a bad payload fails that one job
//! instead of the submission path.

use garde::Validate;
use serde::Deserialize;

use crate::models::media::MediaKind;

#[derive(Debug, Clone, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageOptions {
    #[garde(length(min = 1, max = 32))]
    pub compression_type: String,

    /// 1 = best quality, 9 = smallest file.
    #[garde(range(min = 1, max = 9))]
    pub compression_level: u8,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            compression_type: "jpegoptim".to_string(),
            compression_level: 5,
        }
    }
}

impl ImageOptions {
    /// ffmpeg `-q:v` value, spread over its 2..=31 range.
    pub fn qscale(&self) -> u32 {
        2 + (u32::from(self.compression_level) - 1) * 29 / 8
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Channels {
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(self) -> u8 {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioOptions {
    #[garde(custom(is_bitrate))]
    pub bitrate: String,

    #[garde(skip)]
    pub channels: Channels,

    /// Apply EBU R128 loudness normalisation.
    #[garde(skip)]
    pub normalize: bool,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            bitrate: "192k".to_string(),
            channels: Channels::Stereo,
            normalize: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum Resolution {
    #[serde(rename = "480p")]
    Sd,
    #[serde(rename = "720p")]
    Hd,
    #[serde(rename = "1080p")]
    FullHd,
}

impl Resolution {
    /// ffmpeg `scale=` filter argument.
    pub fn scale(self) -> &'static str {
        match self {
            Resolution::Sd => "854:480",
            Resolution::Hd => "1280:720",
            Resolution::FullHd => "1920:1080",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoOptions {
    #[garde(custom(is_bitrate))]
    pub video_bitrate: String,

    #[garde(custom(is_bitrate))]
    pub audio_bitrate: String,

    #[garde(skip)]
    pub resolution: Resolution,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            video_bitrate: "1000k".to_string(),
            audio_bitrate: "128k".to_string(),
            resolution: Resolution::Hd,
        }
    }
}

/// Options resolved for one job's media family.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaOptions {
    Image(ImageOptions),
    Audio(AudioOptions),
    Video(VideoOptions),
    Archive,
}

impl MediaOptions {
    /// Interpret a job's params for the given family. `null` means defaults.
    pub fn parse(kind: MediaKind, params: &serde_json::Value) -> Result<Self, ParamsError> {
        let params = if params.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            params.clone()
        };

        Ok(match kind {
            MediaKind::Image => MediaOptions::Image(decode(params)?),
            MediaKind::Audio => MediaOptions::Audio(decode(params)?),
            MediaKind::Video => MediaOptions::Video(decode(params)?),
            MediaKind::Archive => MediaOptions::Archive,
        })
    }
}

fn decode<T>(params: serde_json::Value) -> Result<T, ParamsError>
where
    T: for<'de> Deserialize<'de> + Validate<Context = ()>,
{
    let options: T = serde_json::from_value(params)?;
    options.validate()?;
    Ok(options)
}

/// Accepts ffmpeg bitrates such as `128k`, `1M` or `96000`.
fn is_bitrate(value: &str, _ctx: &()) -> garde::Result {
    let digits = value.trim_end_matches(['k', 'K', 'm', 'M']);
    let suffix_len = value.len() - digits.len();
    if digits.is_empty() || suffix_len > 1 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(garde::Error::new(format!("invalid bitrate {value:?}")));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("Malformed compression params: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid compression params: {0}")]
    Invalid(#[from] garde::Report),
}
