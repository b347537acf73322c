//! Media variants and the policy used to pick one of them.
//!
//! A [`MediaVariant`] is one downloadable rendition of a video. Vimeo reports renditions in
//! several places (`download`, `files`, nested picture sizes, ...), all of which share roughly
//! the same loosely-typed shape, so variants are parsed leniently with [`MediaVariant::from_json`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The height the [`QualityPolicy::MidTier`] policy aims for.
const TARGET_HEIGHT: u32 = 720;

/// One downloadable rendition of a video.
///
/// Serializes with Vimeo's field names so debug output matches what the API returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaVariant {
    pub quality: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "link")]
    pub url: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
}

impl MediaVariant {
    /// Parses a variant out of an arbitrary JSON node.
    ///
    /// Missing fields fall back to `"unknown"` quality, `video/mp4`, zero dimensions and zero
    /// size. Returns `None` for non-objects and for entries without a usable link, since such
    /// an entry can never be downloaded.
    pub fn from_json(entry: &Value) -> Option<Self> {
        let entry = entry.as_object()?;
        let url = entry.get("link")?.as_str()?.trim();
        if url.is_empty() {
            return None;
        }

        Some(Self {
            quality: entry
                .get("quality")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            mime_type: entry
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("video/mp4")
                .to_string(),
            width: entry.get("width").and_then(dimension).unwrap_or(0),
            height: entry.get("height").and_then(dimension).unwrap_or(0),
            url: url.to_string(),
            size_bytes: entry.get("size").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    /// A variant is valid when it has a link and both of its dimensions are known.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.url.is_empty()
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// The file extension implied by the mime type (`video/mp4` -> `mp4`).
    pub fn extension(&self) -> &str {
        let essence = self.mime_type.split(';').next().unwrap_or_default();
        match essence.rsplit('/').next().map(str::trim) {
            Some(subtype) if !subtype.is_empty() => subtype,
            _ => "mp4",
        }
    }
}

/// Reads a positive pixel dimension, accepting both integers and floats.
pub(crate) fn dimension(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f <= f64::from(u32::MAX) {
        Some(f as u32)
    } else {
        None
    }
}

/// Which rendition to prefer when several are available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QualityPolicy {
    /// The rendition whose height is closest to 720p.
    #[default]
    MidTier,
    /// The rendition with the largest pixel area.
    Highest,
}

impl QualityPolicy {
    pub fn from_highest_quality_flag(highest_quality: bool) -> Self {
        if highest_quality {
            Self::Highest
        } else {
            Self::MidTier
        }
    }
}

/// Picks one variant according to `policy`.
///
/// Ties always go to the variant that appears first. With [`QualityPolicy::MidTier`], variants
/// of unknown height are ignored; if no variant has a known height the largest one is returned
/// instead.
pub fn select(variants: &[MediaVariant], policy: QualityPolicy) -> Option<&MediaVariant> {
    match policy {
        QualityPolicy::Highest => highest(variants),
        QualityPolicy::MidTier => variants
            .iter()
            .filter(|v| v.height > 0)
            // min_by_key keeps the first of several equal minimums
            .min_by_key(|v| v.height.abs_diff(TARGET_HEIGHT))
            .or_else(|| highest(variants)),
    }
}

fn highest(variants: &[MediaVariant]) -> Option<&MediaVariant> {
    // max_by_key would keep the *last* of several equal maximums
    variants.iter().fold(None, |best, v| match best {
        Some(b) if b.area() >= v.area() => Some(b),
        _ => Some(v),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn variant(width: u32, height: u32, url: &str) -> MediaVariant {
        MediaVariant {
            quality: "hd".to_string(),
            mime_type: "video/mp4".to_string(),
            width,
            height,
            url: url.to_string(),
            size_bytes: 0,
        }
    }

    #[test]
    fn empty_input_selects_nothing() {
        assert_eq!(select(&[], QualityPolicy::Highest), None);
        assert_eq!(select(&[], QualityPolicy::MidTier), None);
    }

    #[test]
    fn highest_picks_largest_area() {
        let variants = [
            variant(640, 360, "a"),
            variant(1920, 1080, "b"),
            variant(1280, 720, "c"),
        ];
        assert_eq!(select(&variants, QualityPolicy::Highest).unwrap().url, "b");
    }

    #[test]
    fn highest_breaks_ties_by_first_occurrence() {
        let variants = [
            variant(640, 360, "a"),
            variant(1280, 720, "b"),
            variant(720, 1280, "c"),
            variant(1280, 720, "d"),
        ];
        assert_eq!(select(&variants, QualityPolicy::Highest).unwrap().url, "b");
    }

    #[test]
    fn mid_tier_prefers_closest_to_720() {
        let variants = [
            variant(3840, 2160, "4k"),
            variant(1920, 1080, "1080"),
            variant(960, 540, "540"),
            variant(1280, 720, "720"),
        ];
        assert_eq!(select(&variants, QualityPolicy::MidTier).unwrap().url, "720");
    }

    #[test]
    fn mid_tier_breaks_ties_by_first_occurrence() {
        // 640 and 800 are both 80 away from 720
        let variants = [
            variant(1000, 640, "low"),
            variant(1000, 800, "high"),
            variant(1000, 640, "low-again"),
        ];
        assert_eq!(select(&variants, QualityPolicy::MidTier).unwrap().url, "low");
    }

    #[test]
    fn mid_tier_ignores_unknown_heights() {
        let variants = [variant(1280, 0, "unknown"), variant(426, 240, "240")];
        assert_eq!(select(&variants, QualityPolicy::MidTier).unwrap().url, "240");
    }

    #[test]
    fn mid_tier_falls_back_to_highest_without_heights() {
        let variants = [variant(0, 0, "a"), variant(1280, 0, "b"), variant(0, 0, "c")];
        // all areas are zero, so the first one wins
        assert_eq!(select(&variants, QualityPolicy::MidTier).unwrap().url, "a");
    }

    #[test]
    fn parse_lenient_entries() {
        let parsed = MediaVariant::from_json(&json!({
            "quality": "sd",
            "type": "video/webm",
            "width": 640.0,
            "height": 360,
            "link": "https://player.vimeo.com/x",
            "size": 1234,
            "expires": "2030-01-01T00:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(
            parsed,
            MediaVariant {
                quality: "sd".to_string(),
                mime_type: "video/webm".to_string(),
                width: 640,
                height: 360,
                url: "https://player.vimeo.com/x".to_string(),
                size_bytes: 1234,
            }
        );
        assert_eq!(parsed.extension(), "webm");

        let defaulted = MediaVariant::from_json(&json!({ "link": "https://x" })).unwrap();
        assert_eq!(defaulted.quality, "unknown");
        assert_eq!(defaulted.mime_type, "video/mp4");
        assert!(!defaulted.is_valid());
    }

    #[test]
    fn parse_rejects_linkless_entries() {
        assert_eq!(MediaVariant::from_json(&json!({ "width": 1, "height": 1 })), None);
        assert_eq!(MediaVariant::from_json(&json!({ "link": "" })), None);
        assert_eq!(MediaVariant::from_json(&json!({ "link": 42 })), None);
        assert_eq!(MediaVariant::from_json(&json!("https://x")), None);
    }

    #[test]
    fn extension_from_mime_type() {
        let mut v = variant(1, 1, "x");
        v.mime_type = "video/mp4; codecs=avc1".to_string();
        assert_eq!(v.extension(), "mp4");
        v.mime_type = "source".to_string();
        assert_eq!(v.extension(), "source");
        v.mime_type = "video/".to_string();
        assert_eq!(v.extension(), "mp4");
    }
}
