use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Transformation family a file is routed to, decided by its extension.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    /// Anything unrecognised is zipped.
    Archive,
}

impl MediaKind {
    /// Route a lowercased extension (with or without the leading dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.') {
            "jpg" | "jpeg" | "png" | "bmp" | "webp" => MediaKind::Image,
            "mp3" | "wav" | "ogg" | "flac" => MediaKind::Audio,
            "mp4" | "avi" | "mov" | "flv" => MediaKind::Video,
            _ => MediaKind::Archive,
        }
    }

    /// Media-type tag recorded on the finished job.
    pub fn media_type(self, ext: &str) -> String {
        match self {
            MediaKind::Image => format!("image/{}", ext.trim_start_matches('.')),
            MediaKind::Audio => "audio/mpeg".to_string(),
            MediaKind::Video => "video/mp4".to_string(),
            MediaKind::Archive => "application/zip".to_string(),
        }
    }

    /// Extension of the produced file; archives always end in `.zip`.
    pub fn output_extension(self, ext: &str) -> String {
        match self {
            MediaKind::Archive => ".zip".to_string(),
            _ => ext.to_string(),
        }
    }
}
