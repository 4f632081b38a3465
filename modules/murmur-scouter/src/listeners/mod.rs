//! Platform listeners: thin mapping layers between the HTTP clients and the
//! capability seam. All retry and rate-limit policy lives in the clients.

pub mod bluesky;
pub mod mastodon;

pub use bluesky::BlueskyListener;
pub use mastodon::MastodonListener;
