//! Finding a downloadable link for a video.
//!
//! Vimeo does not expose download links consistently. Depending on the account plan, the video's
//! privacy settings and how far along transcoding is, the links may be inlined in the video
//! resource, hidden in some nested structure, only available from a dedicated endpoint, or only
//! reachable through a `fields` filter. [`discover`] tries each [`Strategy`] in a fixed order and
//! stops at the first one that produces any candidates, then lets [`select`] pick among them.

use crate::selection::{MediaVariant, QualityPolicy, dimension, select};
use crate::vimeo_api::{VimeoApi, Video};
use eyre::Context;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Reverse;
use tracing::instrument;

/// Hosts that serve Vimeo media. Subdomains count too.
const MEDIA_DOMAINS: &[&str] = &["vimeo.com", "vimeocdn.com"];

/// Host that serves thumbnails (and other images).
const IMAGE_CDN_DOMAIN: &str = "vimeocdn.com";

/// Path prefix of thumbnail URLs, and what it is rewritten to for the guessed video URL.
const THUMBNAIL_PREFIX: &str = "i.vimeocdn.com/video";
const PLAYER_PREFIX: &str = "player.vimeo.com/video";

/// Replaces the `_<size>` suffix of a thumbnail URL in the guessed video URL.
const VIDEO_FILE_SUFFIX: &str = "/video.mp4";

/// One way of finding candidate variants for a video, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The `download` list inlined in the video resource.
    DirectField,
    /// Video URLs guessed from the thumbnail URLs in `pictures.sizes`.
    ThumbnailDerived,
    /// Any `{width, height, link}` object anywhere in the video resource.
    StructuralScan,
    /// `GET /videos/{id}/download`.
    DownloadEndpoint,
    /// `GET /videos/{id}?fields=download`.
    DownloadField,
    /// `GET /videos/{id}?fields=files`.
    FilesField,
}

impl Strategy {
    pub const CASCADE: [Strategy; 6] = [
        Strategy::DirectField,
        Strategy::ThumbnailDerived,
        Strategy::StructuralScan,
        Strategy::DownloadEndpoint,
        Strategy::DownloadField,
        Strategy::FilesField,
    ];

    fn banner(self) -> &'static str {
        match self {
            Strategy::DirectField => "DOWNLOAD LINKS",
            Strategy::ThumbnailDerived => "THUMBNAIL LINKS",
            Strategy::StructuralScan => "DIRECT LINKS",
            Strategy::DownloadEndpoint => "DOWNLOAD ENDPOINT LINKS",
            Strategy::DownloadField => "EXPLICIT DOWNLOAD LINKS",
            Strategy::FilesField => "FILE LINKS",
        }
    }

    /// Collects this strategy's candidates for `video`.
    ///
    /// Errors only come from the strategies that talk to the API.
    async fn harvest<A: VimeoApi>(self, video: &Video, api: &A) -> eyre::Result<Vec<MediaVariant>> {
        let remote_id = || {
            let id = video.id();
            if id.is_none() {
                tracing::debug!(strategy = ?self, "video has no id, cannot query the API for it");
            }
            id
        };

        Ok(match self {
            Strategy::DirectField => video
                .field("download")
                .map(variants_from_list)
                .unwrap_or_default(),
            Strategy::ThumbnailDerived => thumbnail_candidates(video.as_json()),
            Strategy::StructuralScan => scan_for_variants(video.as_json()),
            Strategy::DownloadEndpoint => {
                let Some(id) = remote_id() else {
                    return Ok(Vec::new());
                };
                let body = fetch_ok(api, &format!("/videos/{id}/download"), &[]).await?;
                variants_from_list(&body)
            }
            Strategy::DownloadField => {
                let Some(id) = remote_id() else {
                    return Ok(Vec::new());
                };
                let body =
                    fetch_ok(api, &format!("/videos/{id}"), &[("fields", "download")]).await?;
                body.get("download")
                    .map(variants_from_list)
                    .unwrap_or_default()
            }
            Strategy::FilesField => {
                let Some(id) = remote_id() else {
                    return Ok(Vec::new());
                };
                let body = fetch_ok(api, &format!("/videos/{id}"), &[("fields", "files")]).await?;
                body.get("files").map(variants_from_files).unwrap_or_default()
            }
        })
    }
}

/// Finds the best downloadable variant of `video` under `policy`.
///
/// Returns `None` when no strategy turns up anything; that means the video simply has no
/// downloadable link (no permission, downloads disabled, still transcoding) and is not an error.
/// Failing API calls only end the strategy that made them.
///
/// With `debug` set, the raw video and every non-empty harvest are printed to stdout.
#[instrument(skip_all, fields(video_id = video.id().unwrap_or("?")))]
pub async fn discover<A: VimeoApi>(
    video: &Video,
    api: &A,
    policy: QualityPolicy,
    debug: bool,
) -> Option<MediaVariant> {
    if debug {
        print_debug("VIDEO JSON", video.as_json());
    }

    for strategy in Strategy::CASCADE {
        let variants = match strategy.harvest(video, api).await {
            Ok(variants) => variants,
            Err(e) => {
                tracing::warn!(?strategy, error = %format!("{e:#}"), "link discovery strategy failed");
                continue;
            }
        };

        if variants.is_empty() {
            tracing::debug!(?strategy, "no candidate links");
            continue;
        }

        tracing::info!(
            ?strategy,
            candidates = variants.len(),
            "found candidate links for {}",
            video.name()
        );
        if debug {
            print_debug(strategy.banner(), &variants);
        }
        return select(&variants, policy).cloned();
    }

    None
}

/// `GET`s `path` and returns the body, treating any status other than 200 as an error.
async fn fetch_ok<A: VimeoApi>(api: &A, path: &str, params: &[(&str, &str)]) -> eyre::Result<Value> {
    let response = api
        .get(path, params)
        .await
        .with_context(|| format!("request {path}"))?;
    if !response.is_ok() {
        eyre::bail!("{path} answered with status {}", response.status);
    }
    Ok(response.body)
}

/// Parses every linkable entry of a JSON list. Anything but a list yields nothing.
fn variants_from_list(list: &Value) -> Vec<MediaVariant> {
    list.as_array()
        .map(|entries| entries.iter().filter_map(MediaVariant::from_json).collect())
        .unwrap_or_default()
}

/// Parses the `files` field of a video.
///
/// When the entries are not the expected objects, only those explicitly marked `hd` are
/// considered. Only complete variants (link and both dimensions) are kept.
fn variants_from_files(files: &Value) -> Vec<MediaVariant> {
    let Some(entries) = files.as_array() else {
        return Vec::new();
    };
    let Some(first) = entries.first() else {
        return Vec::new();
    };

    let entries: Vec<&Value> = if first.is_object() {
        entries.iter().collect()
    } else {
        tracing::warn!("video files have an unexpected structure, only looking at hd entries");
        entries
            .iter()
            .filter(|entry| entry.get("quality").and_then(Value::as_str) == Some("hd"))
            .collect()
    };

    entries
        .into_iter()
        .filter_map(MediaVariant::from_json)
        .filter(MediaVariant::is_valid)
        .collect()
}

/// A candidate we found ourselves rather than one the API described as a download.
fn guessed_variant(width: u32, height: u32, url: impl Into<String>) -> MediaVariant {
    MediaVariant {
        quality: "hd".to_string(),
        mime_type: "video/mp4".to_string(),
        width,
        height,
        url: url.into(),
        size_bytes: 0,
    }
}

/// Best-effort candidates derived from the video's thumbnails.
///
/// Every thumbnail on the image CDN contributes itself plus a guessed player URL (see
/// [`rewrite_thumbnail_url`]), largest thumbnails first. None of these are checked; a guess that
/// turns out not to be a video fails later like any other broken download.
pub fn thumbnail_candidates(video: &Value) -> Vec<MediaVariant> {
    let Some(sizes) = video.pointer("/pictures/sizes").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut sizes: Vec<(u32, u32, &str)> = sizes
        .iter()
        .filter_map(|size| {
            let width = size.get("width").and_then(dimension).unwrap_or(0);
            let height = size.get("height").and_then(dimension).unwrap_or(0);
            let link = size.get("link")?.as_str()?;
            Some((width, height, link))
        })
        .collect();
    // stable, so equally sized thumbnails keep their order
    sizes.sort_by_key(|&(width, height, _)| Reverse(u64::from(width) * u64::from(height)));

    let mut candidates = Vec::new();
    for (width, height, link) in sizes {
        if width == 0 || height == 0 || !link.contains(IMAGE_CDN_DOMAIN) {
            continue;
        }
        candidates.push(guessed_variant(width, height, link));
        match rewrite_thumbnail_url(link) {
            Some(guess) => candidates.push(guessed_variant(width, height, guess)),
            None => tracing::debug!(link, "thumbnail link does not look like a video thumbnail"),
        }
    }
    candidates
}

/// Guesses a player URL from a thumbnail URL.
///
/// `https://i.vimeocdn.com/video/1916303757-26de…-d_1280x720` becomes
/// `https://player.vimeo.com/video/1916303757-26de…-d/video.mp4`. Returns `None` if the URL has
/// no `/video/<id>` part to work from.
pub fn rewrite_thumbnail_url(link: &str) -> Option<String> {
    let (_, rest) = link.split_once("/video/")?;
    if rest.split('-').next().is_none_or(str::is_empty) {
        return None;
    }

    let rewritten = link.replace(THUMBNAIL_PREFIX, PLAYER_PREFIX);
    let stem = match rewritten.rsplit_once('_') {
        Some((stem, _size)) => stem,
        None => &rewritten,
    };
    Some(format!("{stem}{VIDEO_FILE_SUFFIX}"))
}

/// Collects every `{width, height, link}` object anywhere in `root` that points at Vimeo media.
///
/// The walk is depth-first in document order and uses an explicit stack, so arbitrarily deep
/// documents are fine. Nodes that don't fit the shape are skipped.
pub fn scan_for_variants(root: &Value) -> Vec<MediaVariant> {
    let mut found = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match node {
            Value::Object(map) => {
                if let Some(variant) = sized_link(map) {
                    found.push(variant);
                }
                stack.extend(map.values().rev());
            }
            Value::Array(items) => stack.extend(items.iter().rev()),
            _ => {}
        }
    }
    found
}

fn sized_link(map: &Map<String, Value>) -> Option<MediaVariant> {
    let width = dimension(map.get("width")?)?;
    let height = dimension(map.get("height")?)?;
    let link = map.get("link")?.as_str()?;
    if width == 0 || height == 0 || !is_media_link(link) {
        return None;
    }
    Some(guessed_variant(width, height, link))
}

fn is_media_link(link: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(link) else {
        return false;
    };
    url.host_str().is_some_and(|host| {
        MEDIA_DOMAINS.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain)
                    .is_some_and(|sub| sub.ends_with('.'))
        })
    })
}

fn print_debug(label: &str, value: &impl Serialize) {
    let rendered = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("<cannot render as JSON: {e}>"));
    println!("\n=== {label} ===\n{rendered}\n=== END {label} ===\n");
}
