//! Client-side post cache for the Courtside API.
//!
//! This crate keeps one normalized copy of every post the app has seen and
//! lets several paginated views share it.
//!
//! ## Features
//!
//! - **HTTP Client**: page adapters for the feed, user and hashtag views plus
//!   the like, comment, vote and delete endpoints
//! - **Store**: normalized post table with field-level merge
//! - **Views**: cursor pagination windows holding post IDs only
//! - **Mutations**: optimistic updates with rollback on failure
//! - **Notifications**: fetched list kept live over a WebSocket push feed

mod cache;
mod client;
mod error;
pub mod mutations;
pub mod notifications;
pub mod pagination;
mod socket;
pub mod store;
mod types;
pub mod views;

pub use cache::PostCache;
pub use client::{ApiClient, ClientConfig, DEFAULT_PAGE_SIZE};
pub use error::CacheError;
pub use mutations::{LikeAction, like_transition, vote_transition};
pub use notifications::{NotificationCache, NotificationSubscription, insert_if_new};
pub use pagination::PageOutcome;
pub use socket::{JOIN_EVENT, NEW_NOTIFICATION_EVENT};
pub use store::{PostStore, StoreUpdate};
pub use types::*;
pub use views::{ViewIndex, ViewKey, ViewPage, ViewState};
