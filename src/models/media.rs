use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Gif,
}

impl MediaKind {
    /// Queue priority for analysis work. Video probing is the most user-visible latency.
    pub fn analyze_priority(self) -> i64 {
        match self {
            Self::Video => 10,
            Self::Image | Self::Gif => 5,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Image => write!(f, "image"),
            Self::Gif => write!(f, "gif"),
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(Self::Video),
            "image" => Ok(Self::Image),
            "gif" => Ok(Self::Gif),
            _ => Err(format!("unknown media kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: String,
    pub kind: MediaKind,
    pub path: String,
    pub filename: String,
    pub ext: String,
    pub size: i64,
    pub mtime_ms: i64,
    pub added_at_ms: i64,
    pub duration_ms: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub thumb_path: Option<String>,
    pub content_hash: Option<String>,
    pub phash: Option<String>,
    pub transcoded_path: Option<String>,
    pub loudness_peak_ms: Option<i64>,
    pub analyze_error: bool,
}

impl MediaRecord {
    /// Copies every derived field from `previous`, keeping them as provisional values until
    /// the next analysis overwrites them.
    pub fn carry_derived_from(&mut self, previous: &MediaRecord) {
        self.duration_ms = previous.duration_ms;
        self.width = previous.width;
        self.height = previous.height;
        self.thumb_path = previous.thumb_path.clone();
        self.content_hash = previous.content_hash.clone();
        self.phash = previous.phash.clone();
        self.transcoded_path = previous.transcoded_path.clone();
        self.loudness_peak_ms = previous.loudness_peak_ms;
    }
}

/// Partial write-back from an analysis handler. `None` leaves the stored column alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFields {
    pub duration_ms: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub thumb_path: Option<String>,
    pub content_hash: Option<String>,
    pub phash: Option<String>,
    pub transcoded_path: Option<String>,
    pub loudness_peak_ms: Option<i64>,
}

impl DerivedFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total: usize,
    pub videos: usize,
    pub images: usize,
    pub gifs: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_its_tag() {
        for kind in [MediaKind::Video, MediaKind::Image, MediaKind::Gif] {
            assert_eq!(kind.to_string().parse::<MediaKind>(), Ok(kind));
        }
        assert!("audio".parse::<MediaKind>().is_err());
    }

    #[test]
    fn video_outranks_stills() {
        assert!(MediaKind::Video.analyze_priority() > MediaKind::Image.analyze_priority());
        assert_eq!(
            MediaKind::Image.analyze_priority(),
            MediaKind::Gif.analyze_priority()
        );
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(DerivedFields::default().is_empty());
        let patch = DerivedFields {
            width: Some(640),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
