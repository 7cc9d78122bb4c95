//! Configuration Module
//!
//! Environment-driven configuration for the quote feed.

mod settings;

pub use settings::{
    CacheSettings, ConfigError, FeedConfig, FetchSettings, KiteSettings, PollSettings,
    ServerSettings, StreamSettings, SyntheticSettings,
};
