//! Downloading a user's videos to disk.
//!
//! Videos are handled one at a time. Anything that goes wrong with a single video (no link, a
//! failed request, a broken stream) is logged and the run moves on to the next one. Only failing
//! to get the list of videos at all ends the run early.

use crate::discovery::discover;
use crate::selection::{MediaVariant, QualityPolicy};
use crate::vimeo_api::{Video, VimeoApi, fetch_video, list_videos};
use eyre::Context;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_stream::StreamExt;

/// Size of the buffer file writes go through.
const WRITE_BUFFER: usize = 1024 * 1024;

/// Video ids to leave out of a download run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipSet(HashSet<String>);

impl SkipSet {
    /// Parses a comma-separated list of ids. Blank entries are ignored.
    pub fn parse(list: &str) -> Self {
        list.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.0.contains(video_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for SkipSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Download only this video instead of the whole account.
    pub video_id: Option<String>,
    /// Download at most this many videos. Zero means no limit.
    pub count: Option<usize>,
    pub debug: bool,
    pub policy: QualityPolicy,
    pub skip: SkipSet,
    pub download_dir: PathBuf,
    pub show_progress: bool,
}

impl DownloadOptions {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            video_id: None,
            count: None,
            debug: false,
            policy: QualityPolicy::default(),
            skip: SkipSet::default(),
            download_dir: download_dir.into(),
            show_progress: true,
        }
    }
}

/// What a download run did, video by video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    /// Skipped on request, or because no downloadable link was found.
    pub skipped: usize,
    /// Already present on disk.
    pub existing: usize,
    pub failed: usize,
}

impl std::fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} downloaded, {} already present, {} skipped, {} failed",
            self.downloaded, self.existing, self.skipped, self.failed
        )
    }
}

/// Downloads the selected videos into `options.download_dir`.
///
/// API calls go through `api`; the media files themselves are fetched with `media`, which should
/// not carry the API credentials.
pub async fn download<A: VimeoApi>(
    api: &A,
    media: &reqwest::Client,
    options: &DownloadOptions,
) -> eyre::Result<DownloadSummary> {
    let limit = options.count.filter(|&n| n > 0);
    let videos = match &options.video_id {
        Some(id) => vec![fetch_video(api, id).await?],
        None => list_videos(api, limit).await?,
    };
    if let Some(limit) = limit {
        println!("Limiting download to {limit} videos");
    }

    tokio::fs::create_dir_all(&options.download_dir)
        .await
        .with_context(|| format!("create {}", options.download_dir.display()))?;

    let mut summary = DownloadSummary::default();
    let total = videos.len();
    for (i, video) in videos.iter().enumerate() {
        let Some(id) = video.id() else {
            tracing::warn!(name = video.name(), "video has no id, skipping");
            summary.skipped += 1;
            continue;
        };
        if options.skip.contains(id) {
            println!("\nSkipping video: {} (ID: {id}) as requested", video.name());
            summary.skipped += 1;
            continue;
        }

        println!("\n[{}/{total}] Processing video: {} (ID: {id})", i + 1, video.name());
        let Some(variant) = discover(video, api, options.policy, options.debug).await else {
            tracing::warn!(
                video_id = id,
                "no downloadable link; the token may lack download permission, \
                 the owner may have disabled downloads, or the video may still be processing"
            );
            summary.skipped += 1;
            continue;
        };

        let path = options.download_dir.join(file_name(video, id, &variant));
        if already_downloaded(&path).await {
            println!("File already exists: {}. Skipping.", path.display());
            summary.existing += 1;
            continue;
        }

        println!(
            "Downloading {} ({}x{}, {:.2} MB)...",
            video.name(),
            variant.width,
            variant.height,
            variant.size_bytes as f64 / (1024.0 * 1024.0)
        );
        if options.debug {
            println!("\n=== DOWNLOAD URL ===\n{}\n=== END DOWNLOAD URL ===\n", variant.url);
        }

        match fetch_to_file(media, &variant.url, &path, options.show_progress).await {
            Ok(bytes) => {
                tracing::info!(video_id = id, bytes, path = %path.display(), "downloaded");
                println!("Downloaded: {}", path.display());
                summary.downloaded += 1;
            }
            Err(e) => {
                tracing::warn!(video_id = id, error = %format!("{e:#}"), "download failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// `{sanitized title}_{id}.{ext}`
pub fn file_name(video: &Video, video_id: &str, variant: &MediaVariant) -> String {
    format!(
        "{}_{video_id}.{}",
        sanitize_filename(video.name()),
        variant.extension()
    )
}

/// Replaces every character other than alphanumerics, space, `.`, `_` and `-` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Whether `path` is known to exist. If that can't be determined the download is attempted,
/// and a real problem with the path then surfaces as a failed download.
async fn already_downloaded(path: &Path) -> bool {
    match tokio::fs::try_exists(path).await {
        Ok(exists) => exists,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "cannot tell whether file exists");
            false
        }
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

/// Streams `url` to `path`, going through a `.part` file so that `path` only ever exists complete.
async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    show_progress: bool,
) -> eyre::Result<u64> {
    let part = part_path(path);
    match stream_to(client, url, &part, show_progress).await {
        Ok(written) => {
            tokio::fs::rename(&part, path)
                .await
                .with_context(|| format!("move {} into place", part.display()))?;
            Ok(written)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&part).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %part.display(), error = %rm, "could not remove partial download");
                }
            }
            Err(e)
        }
    }
}

async fn stream_to(
    client: &reqwest::Client,
    url: &str,
    part: &Path,
    show_progress: bool,
) -> eyre::Result<u64> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("request {url}"))?;
    if response.status() != reqwest::StatusCode::OK {
        eyre::bail!("download failed with status {}", response.status());
    }

    let progress = if show_progress {
        progress_bar(response.content_length())
    } else {
        ProgressBar::hidden()
    };

    let file = tokio::fs::File::create(part)
        .await
        .with_context(|| format!("create {}", part.display()))?;
    let mut out = BufWriter::with_capacity(WRITE_BUFFER, file);
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("read download stream")?;
        out.write_all(&chunk)
            .await
            .with_context(|| format!("write {}", part.display()))?;
        written += chunk.len() as u64;
        progress.set_position(written);
    }
    out.flush()
        .await
        .with_context(|| format!("write {}", part.display()))?;

    progress.finish();
    Ok(written)
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    let Some(total) = total else {
        return ProgressBar::new_spinner();
    };
    let bar = ProgressBar::new(total);
    match ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
    ) {
        Ok(style) => bar.set_style(style.progress_chars("█▓░")),
        Err(e) => tracing::debug!(error = %e, "bad progress bar template"),
    }
    bar
}
