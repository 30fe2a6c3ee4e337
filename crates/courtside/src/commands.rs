//! Subcommand implementations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use courtside_cache::{
    ApiClient, LikeAction, Notification, NotificationCache, PageOutcome, Post, PostCache, ViewKey,
};
use miette::Result;
use tracing::{debug, info, warn};

/// Output format for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Output {
    #[default]
    Text,
    Json,
}

/// Load up to `pages` pages of a view and print its posts.
pub async fn list(cache: &PostCache, key: &ViewKey, pages: u32, output: Output) -> Result<()> {
    load_pages(cache, key, pages).await?;
    print_posts(&cache.posts_for(key), output)
}

/// Find a post in the feed and toggle its like.
///
/// Feed pages are loaded until the post shows up or `max_pages` is reached.
pub async fn like(cache: &PostCache, post_id: &str, max_pages: u32) -> Result<()> {
    let mut loaded = 0;
    while cache.post(post_id).is_none() && loaded < max_pages {
        match cache
            .fetch_feed_page()
            .await
            .map_err(|e| miette::miette!("failed to load feed: {}", e))?
        {
            PageOutcome::Loaded { .. } => loaded += 1,
            PageOutcome::Exhausted => break,
        }
    }

    if cache.post(post_id).is_none() {
        return Err(miette::miette!(
            "post {} not found in the first {} feed page(s)",
            post_id,
            loaded
        ));
    }

    let action = cache
        .toggle_like(post_id)
        .await
        .map_err(|e| miette::miette!("failed to toggle like: {}", e))?;

    let post = cache
        .post(post_id)
        .ok_or_else(|| miette::miette!("post {} vanished from the cache", post_id))?;
    let verb = match action {
        LikeAction::Like => "liked",
        LikeAction::Unlike => "unliked",
    };
    println!("{} {} ({} likes)", verb, post.id, post.likes_count);
    Ok(())
}

/// Print the notification list, then optionally follow pushed updates
/// until interrupted.
pub async fn notifications(
    client: Arc<ApiClient>,
    user_id: &str,
    follow: bool,
    output: Output,
) -> Result<()> {
    let cache = NotificationCache::new(client, user_id);
    let subscription = cache
        .subscribe()
        .await
        .map_err(|e| miette::miette!("failed to load notifications: {}", e))?;

    let mut updates = cache.updates();
    for notification in cache.entries().await {
        print_notification(&notification, output)?;
    }
    info!(unread = cache.unread_count().await, "notifications loaded");

    if !follow {
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, closing notification feed");
                break;
            }
            received = updates.recv() => match received {
                Ok(notification) => print_notification(&notification, output)?,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification output lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    drop(subscription);
    Ok(())
}

async fn load_pages(cache: &PostCache, key: &ViewKey, pages: u32) -> Result<()> {
    for _ in 0..pages {
        match cache
            .fetch_next(key)
            .await
            .map_err(|e| miette::miette!("failed to load {}: {}", key, e))?
        {
            PageOutcome::Loaded { appended, has_more } => {
                debug!(view = %key, appended, has_more, "page loaded");
                if !has_more {
                    break;
                }
            }
            PageOutcome::Exhausted => break,
        }
    }
    Ok(())
}

fn print_posts(posts: &[Post], output: Output) -> Result<()> {
    match output {
        Output::Json => {
            let json = serde_json::to_string_pretty(posts)
                .map_err(|e| miette::miette!("failed to encode posts: {}", e))?;
            println!("{}", json);
        }
        Output::Text => {
            let now = Utc::now();
            for post in posts {
                println!("{}", format_post(post, now));
            }
        }
    }
    Ok(())
}

fn print_notification(notification: &Notification, output: Output) -> Result<()> {
    match output {
        Output::Json => {
            let json = serde_json::to_string(notification)
                .map_err(|e| miette::miette!("failed to encode notification: {}", e))?;
            println!("{}", json);
        }
        Output::Text => println!("{}", format_notification(notification)),
    }
    Ok(())
}

/// One-line rendering of a post.
pub fn format_post(post: &Post, now: DateTime<Utc>) -> String {
    let author = post.posted_by.name.as_deref().unwrap_or(&post.posted_by.id);
    let liked = if post.is_liked { "*" } else { "" };
    let mut line = format!(
        "[{}] {} ({}): {} | likes {}{} | comments {}",
        post.id,
        author,
        relative_time(post.created_at, now),
        post.caption,
        post.likes_count,
        liked,
        post.comments_count,
    );
    if post.is_poll() {
        let tallies: Vec<String> = post
            .poll_options
            .iter()
            .flatten()
            .map(|o| format!("{}={}", o.option, o.votes))
            .collect();
        line.push_str(&format!(" | poll {}", tallies.join(", ")));
    }
    line
}

/// One-line rendering of a notification.
pub fn format_notification(notification: &Notification) -> String {
    let marker = if notification.is_read { " " } else { "•" };
    let kind = notification.kind.as_deref().unwrap_or("notification");
    let message = notification.message.as_deref().unwrap_or("");
    format!("{} {}: {}", marker, kind, message)
}

/// Coarse age of a timestamp, e.g. "5m ago".
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(then);
    if age.num_seconds() < 60 {
        "just now".to_string()
    } else if age.num_minutes() < 60 {
        format!("{}m ago", age.num_minutes())
    } else if age.num_hours() < 24 {
        format!("{}h ago", age.num_hours())
    } else {
        format!("{}d ago", age.num_days())
    }
}
