//! Discord adapter: REST client, Gateway session and wire formats

pub mod api;
pub mod channel;
pub mod events;

pub use channel::DiscordNotifier;
