//! Gmail to Discord notifier
//!
//! Polls a Gmail inbox for unread mail and delivers each new message as a
//! Discord direct message to a single recipient, who can mark it read from
//! the notification.
//!
//! # Overview
//!
//! - **Bootstrap**: client credentials and the Gmail authorization are taken
//!   from the local store, migrated from legacy files, or requested from the
//!   recipient over Discord (file upload, then an authorization code)
//! - **Polling**: a fixed-cadence scheduler drives delivery cycles
//! - **Delivery**: one notification per new unread message, a single delayed
//!   retry on failure, and a persisted record of what was delivered
//! - **Acknowledgement**: the "Mark as read" button marks the mail read in Gmail
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_notifier::{app, config::Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_with_env("config.toml".as_ref()).await?;
//!     app::run(config, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`acknowledge`] - "Mark as read" button handling
//! - [`app`] - Process wiring and maintenance commands
//! - [`auth`] - Google OAuth plumbing and the `OAuthProvider` seam
//! - [`bootstrap`] - Credential bootstrap state machine
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`credentials`] - Persisted settings (client credentials, user token)
//! - [`database`] - SQLite connection and schema
//! - [`dedup`] - Persisted set of delivered message ids
//! - [`discord`] - Discord REST and Gateway adapter
//! - [`error`] - Error types and result aliases
//! - [`formatter`] - Notification and prompt layouts
//! - [`gmail`] - Gmail API adapter
//! - [`mail`] - `MailProvider` seam
//! - [`models`] - Core data structures
//! - [`notifier`] - `Notifier` seam and chat-channel types
//! - [`pipeline`] - Delivery cycle with retry
//! - [`scheduler`] - Fixed-cadence polling

pub mod acknowledge;
pub mod app;
pub mod auth;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod database;
pub mod dedup;
pub mod discord;
pub mod error;
pub mod formatter;
pub mod gmail;
pub mod mail;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod scheduler;

// Re-export commonly used types for convenience
pub use error::{NotifierError, Result};

// Core data models
pub use models::{ClientCredentials, MailItem, TokenResponse, UserToken};

// Config types
pub use config::Config;

// Seams to external systems
pub use auth::{GoogleOAuthProvider, OAuthProvider};
pub use mail::MailProvider;
pub use notifier::{ChannelEvent, Interaction, MessagePayload, Notifier};

// Stores
pub use credentials::CredentialStore;
pub use database::Database;
pub use dedup::DedupStore;

// Orchestration
pub use acknowledge::AcknowledgeHandler;
pub use bootstrap::{AuthPhase, Bootstrapper, PendingAuth, Session};
pub use pipeline::{CycleReport, DeliveryOptions, DeliveryPipeline};
pub use scheduler::PollingScheduler;

// Adapters
pub use discord::DiscordNotifier;
pub use gmail::GmailMailProvider;

// CLI types (for binary usage)
pub use cli::{Cli, Commands};
