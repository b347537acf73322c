//! Download the videos of your own Vimeo account.
//!
//! The pieces, from the bottom up:
//!
//! - [`selection`] picks one of several renditions of a video under a [`QualityPolicy`].
//! - [`discovery`] hunts for those renditions across the many places Vimeo may put them.
//! - [`callback`] and [`oauth`] get an access token through the browser.
//! - [`vimeo_api`] talks to the REST API with that token.
//! - [`download`] ties it together and writes files to disk.
//!
//! [`QualityPolicy`]: selection::QualityPolicy

pub mod callback;
pub mod config;
pub mod discovery;
pub mod download;
pub mod oauth;
pub mod selection;
pub mod token;
pub mod vimeo_api;

#[cfg(test)]
pub(crate) mod test_server;
