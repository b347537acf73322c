//! Vimeo REST API client library.
//!
//! Only the small slice of the API needed to list and download a user's own videos is covered.
//! All requests go through the [`VimeoApi`] trait, which reduces the API to an authenticated
//! `GET(path, params) -> (status, json)`. Responses are deliberately left as untyped JSON: a
//! video resource looks different depending on the account's plan, the video's privacy settings
//! and the `fields` filter, and the download code has to cope with all of those shapes.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use vimeo_downloader::vimeo_api::{VimeoClient, list_my_videos};
//! use tokio_stream::StreamExt;
//!
//! # async fn example() -> eyre::Result<()> {
//! let client = VimeoClient::new("access-token", reqwest::Client::new());
//!
//! let mut videos = std::pin::pin!(list_my_videos(&client));
//! while let Some(video) = videos.next().await {
//!     let video = video?;
//!     println!("{}: {}", video.id().unwrap_or("?"), video.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod types;
pub mod videos;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{VimeoApi, VimeoClient};
pub use types::{ApiResponse, PagedStream};
pub use videos::{Video, fetch_video, list_my_videos, list_videos};
