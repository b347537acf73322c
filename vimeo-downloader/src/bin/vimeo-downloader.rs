use clap::{Parser, Subcommand};
use eyre::Context;
use std::io::IsTerminal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vimeo_downloader::config::Config;
use vimeo_downloader::download::{DownloadOptions, SkipSet, download};
use vimeo_downloader::oauth::{OAuthManager, open_in_browser};
use vimeo_downloader::selection::QualityPolicy;
use vimeo_downloader::token::TokenStore;
use vimeo_downloader::vimeo_api::{Video, VimeoClient, list_videos};

/// Connect to Vimeo, list and download your videos.
#[derive(Debug, Parser)]
#[command(name = "vimeo-downloader", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Authenticate with Vimeo using OAuth2.
    Auth,
    /// List all videos in your Vimeo account.
    List {
        /// Limit the number of videos to list.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Download videos from your Vimeo account.
    Download {
        /// Download a specific video by ID.
        #[arg(long)]
        video_id: Option<String>,
        /// Limit the number of videos to download.
        #[arg(long)]
        count: Option<usize>,
        /// Print the raw API data used to find download links.
        #[arg(long)]
        debug: bool,
        /// Download the highest available quality instead of 720p.
        #[arg(long)]
        highest_quality: bool,
        /// Comma-separated list of video IDs to skip (e.g. '123456,789012').
        #[arg(long, value_parser = parse_skip)]
        skip: Option<SkipSet>,
    },
}

fn parse_skip(list: &str) -> Result<SkipSet, std::convert::Infallible> {
    Ok(SkipSet::parse(list))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Auth => {
            let manager = OAuthManager::from_config(&config)?;
            manager
                .authenticate(open_in_browser)
                .await
                .context("authenticate with Vimeo")?;
            println!("Authentication successful!");
        }
        Command::List { limit } => {
            let client = api_client(&config)?;
            let videos = list_videos(&client, limit.filter(|&n| n > 0)).await?;
            println!("Found {} videos:", videos.len());
            for (i, video) in videos.iter().enumerate() {
                println!("{}", listing_line(i + 1, video));
            }
        }
        Command::Download {
            video_id,
            count,
            debug,
            highest_quality,
            skip,
        } => {
            let client = api_client(&config)?;
            let options = DownloadOptions {
                video_id,
                count,
                debug,
                policy: QualityPolicy::from_highest_quality_flag(highest_quality),
                skip: skip.unwrap_or_default(),
                show_progress: std::io::stderr().is_terminal(),
                ..DownloadOptions::new(&config.download_dir)
            };
            let media = reqwest::Client::new();
            let summary = download(&client, &media, &options)
                .await
                .context("download videos")?;
            println!("\nDownload complete! {summary}");
        }
    }

    Ok(())
}

fn api_client(config: &Config) -> eyre::Result<VimeoClient> {
    let token = TokenStore::new(&config.token_file).load()?;
    Ok(VimeoClient::new(token.access_token, reqwest::Client::new()))
}

/// `N. [id] name (duration seconds, YYYY-mm-dd HH:MM:SS)`
fn listing_line(n: usize, video: &Video) -> String {
    let duration = video
        .duration()
        .map_or_else(|| "?".to_string(), |d| d.to_string());
    let created = video
        .created_time()
        .map_or_else(|| "unknown".to_string(), |t| t.strftime("%Y-%m-%d %H:%M:%S").to_string());
    format!(
        "{n}. [{}] {} ({duration} seconds, {created})",
        video.id().unwrap_or("?"),
        video.name()
    )
}
