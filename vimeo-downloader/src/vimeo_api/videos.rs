//! Vimeo video resources and the endpoints that return them.

use crate::vimeo_api::client::VimeoApi;
use crate::vimeo_api::types::PagedStream;
use eyre::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio_stream::{Stream, StreamExt};
use tracing::instrument;

/// Number of videos requested per page when listing.
const PAGE_SIZE: &str = "100";

/// A Vimeo `video` resource.
///
/// The representation varies a lot between accounts and endpoints, so the resource is kept as
/// the raw JSON tree it arrived as. The accessors below pull out the handful of fields the tool
/// relies on and tolerate them being missing.
///
/// See: <https://developer.vimeo.com/api/reference/response/video>
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Video(Value);

impl Video {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    /// The video's numeric id, taken from the last segment of its `uri` (`/videos/12345`).
    pub fn id(&self) -> Option<&str> {
        let uri = self.0.get("uri")?.as_str()?;
        uri.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
    }

    pub fn name(&self) -> &str {
        self.0
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("untitled")
    }

    /// Duration in seconds.
    pub fn duration(&self) -> Option<u64> {
        self.0.get("duration").and_then(Value::as_u64)
    }

    pub fn created_time(&self) -> Option<jiff::Timestamp> {
        self.0.get("created_time")?.as_str()?.parse().ok()
    }

    /// Looks up a top-level field of the resource.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

/// Returns a paginated stream of all videos owned by the authenticated user.
///
/// Uses `GET /me/videos` and follows the `paging.next` cursor of each page. A failure on the
/// first page is yielded as an error. A non-200 response on a later page only ends the listing:
/// the videos gathered so far are still good, so the stream just stops there.
///
/// # API Reference
///
/// <https://developer.vimeo.com/api/reference/videos#get_videos>
pub fn list_my_videos<A: VimeoApi>(
    api: &A,
) -> impl Stream<Item = eyre::Result<Video>> + use<'_, A> {
    PagedStream::new(move |cursor: Option<String>| fetch_video_page(api, cursor))
}

/// Collects the authenticated user's videos, at most `limit` of them if set.
///
/// Stops fetching pages once `limit` videos are in hand. An account without videos is an error,
/// since there is nothing any command could do with it.
pub async fn list_videos<A: VimeoApi>(api: &A, limit: Option<usize>) -> eyre::Result<Vec<Video>> {
    let videos = list_my_videos(api)
        .take(limit.unwrap_or(usize::MAX))
        .collect::<eyre::Result<Vec<Video>>>()
        .await
        .context("list videos")?;
    if videos.is_empty() {
        eyre::bail!("no videos found in this account");
    }
    Ok(videos)
}

/// Fetches one page of `GET /me/videos`, starting from `cursor` if set.
async fn fetch_video_page<A: VimeoApi>(
    api: &A,
    cursor: Option<String>,
) -> eyre::Result<(VecDeque<Video>, Option<String>)> {
    let response = match cursor.as_deref() {
        None => api
            .get("/me/videos", &[("per_page", PAGE_SIZE)])
            .await
            .context("fetch first page of videos")?,
        Some(next) => match api.get(next, &[]).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(page = next, error = %e, "failed to fetch next page of videos, stopping");
                return Ok((VecDeque::new(), None));
            }
        },
    };

    if !response.is_ok() {
        if cursor.is_none() {
            eyre::bail!(
                "listing videos failed with status {}: {}",
                response.status,
                response.body
            );
        }
        tracing::warn!(
            status = %response.status,
            "next page of videos unavailable, stopping with what we have"
        );
        return Ok((VecDeque::new(), None));
    }

    Ok(parse_video_page(response.body))
}

/// Splits one page of `GET /me/videos` into its videos and the next-page cursor.
fn parse_video_page(mut body: Value) -> (VecDeque<Video>, Option<String>) {
    let next = body
        .pointer("/paging/next")
        .and_then(Value::as_str)
        .filter(|next| !next.is_empty())
        .map(str::to_string);
    let videos = match body.get_mut("data").map(Value::take) {
        Some(Value::Array(data)) => data.into_iter().map(Video::new).collect(),
        _ => VecDeque::new(),
    };
    (videos, next)
}

/// Fetches a single video with `GET /videos/{id}`.
#[instrument(skip(api))]
pub async fn fetch_video<A: VimeoApi>(api: &A, video_id: &str) -> eyre::Result<Video> {
    let response = api
        .get(&format!("/videos/{video_id}"), &[])
        .await
        .with_context(|| format!("fetch video {video_id}"))?;
    if !response.is_ok() {
        eyre::bail!(
            "fetching video {video_id} failed with status {}: {}",
            response.status,
            response.body
        );
    }
    Ok(Video::new(response.body))
}
