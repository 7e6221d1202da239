use std::path::Path;

use crate::models::media::MediaKind;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "mkv", "webm", "avi", "wmv", "flv", "mpg", "mpeg", "3gp", "ts", "m2ts",
];
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff", "heic", "heif", "avif",
];
const GIF_EXTENSIONS: &[&str] = &["gif"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: MediaKind,
    /// Lowercase, without the leading dot.
    pub ext: String,
}

/// Maps a path's extension to a media kind. `None` means "not media, skip it".
pub fn classify(path: &Path) -> Option<Classification> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let kind = if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Video
    } else if GIF_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Gif
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Image
    } else {
        return None;
    };
    Some(Classification { kind, ext })
}
