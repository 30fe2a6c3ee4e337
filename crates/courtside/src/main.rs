//! Courtside: command-line client for the Courtside API
//!
//! Subcommands:
//! - `feed`: page through the global feed
//! - `user`: page through a user's posts
//! - `hashtag`: page through a hashtag's posts
//! - `like`: toggle the like on a feed post
//! - `notifications`: list notifications, optionally following the live feed

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use courtside_cache::{ApiClient, ClientConfig, PostCache, ViewKey};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::Output;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "courtside")]
#[command(about = "Command-line client for the Courtside API", long_about = None)]
struct Cli {
    /// API base URL
    #[arg(long, env = "COURTSIDE_API_URL", global = true, default_value = "http://localhost:8000/api")]
    api_url: String,

    /// Notification socket URL (ws:// or wss://)
    #[arg(long, env = "COURTSIDE_SOCKET_URL", global = true)]
    socket_url: Option<String>,

    /// Access token
    #[arg(long, env = "COURTSIDE_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Posts per page
    #[arg(long, global = true, default_value = "10")]
    page_size: u32,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Show the global feed
    Feed {
        /// Number of pages to load
        #[arg(long, default_value = "1")]
        pages: u32,
    },

    /// Show a user's posts
    User {
        /// User ID
        user_id: String,

        /// Post category
        #[arg(long = "type", default_value = "post")]
        category: String,

        /// Number of pages to load
        #[arg(long, default_value = "1")]
        pages: u32,
    },

    /// Show posts tagged with a hashtag
    Hashtag {
        /// Hashtag, without the leading '#'
        hashtag: String,

        /// Post category
        #[arg(long = "type", default_value = "post")]
        category: String,

        /// Number of pages to load
        #[arg(long, default_value = "1")]
        pages: u32,
    },

    /// Toggle the like on a post from the feed
    Like {
        /// Post ID
        post_id: String,

        /// Feed pages to search for the post
        #[arg(long, default_value = "5")]
        max_pages: u32,
    },

    /// List notifications
    Notifications {
        /// User whose notification channel to join
        #[arg(long, env = "COURTSIDE_USER_ID")]
        user_id: String,

        /// Keep running and print pushed notifications until interrupted
        #[arg(long)]
        follow: bool,
    },
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.api_url)
            .with_page_size(self.page_size)
            .with_timeouts(CONNECT_TIMEOUT, Duration::from_secs(self.timeout));
        if let Some(url) = &self.socket_url {
            config = config.with_socket_url(url);
        }
        config
    }

    fn output(&self) -> Output {
        if self.json { Output::Json } else { Output::Text }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "courtside=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let output = cli.output();

    let client = match &cli.token {
        Some(token) => ApiClient::with_token(cli.client_config(), token.clone()),
        None => ApiClient::new(cli.client_config()),
    }
    .map_err(|e| miette::miette!("failed to create API client: {}", e))?;
    let client = Arc::new(client);
    tracing::debug!(api = client.base_url(), "client ready");
    let cache = PostCache::new(Arc::clone(&client));

    match cli.command {
        Commands::Feed { pages } => commands::list(&cache, &ViewKey::Feed, pages, output).await,
        Commands::User {
            user_id,
            category,
            pages,
        } => commands::list(&cache, &ViewKey::user(user_id, category), pages, output).await,
        Commands::Hashtag {
            hashtag,
            category,
            pages,
        } => {
            let hashtag = hashtag.trim_start_matches('#').to_string();
            commands::list(&cache, &ViewKey::hashtag(hashtag, category), pages, output).await
        }
        Commands::Like { post_id, max_pages } => commands::like(&cache, &post_id, max_pages).await,
        Commands::Notifications { user_id, follow } => {
            commands::notifications(client, &user_id, follow, output).await
        }
    }
}
