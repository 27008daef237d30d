//! Mailbucket Rust Client
//!
//! An async client for the Mailbucket temporary email backend, plus the inbox
//! orchestrator that keeps one temporary address alive: it restores it across
//! sessions, polls it for mail and replaces it once the backend reports it
//! expired.
//!
//! # Example
//! ```no_run
//! use mailbucket_client::{AddressCreate, Client, ListQuery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mailbucket_client::Error> {
//!     let client = Client::new()?;
//!     let address = client.create_address(&AddressCreate::default()).await?;
//!     println!("Created: {}", address.email);
//!
//!     let page = client.list_emails(&address.token, &ListQuery::default()).await?;
//!     for msg in page.emails {
//!         println!("From: {}, Subject: {:?}", msg.from_address, msg.subject);
//!     }
//!     Ok(())
//! }
//! ```

mod client;
pub mod config;
mod error;
pub mod inbox;
mod models;
pub mod state;
mod storage;
pub mod view;

pub use client::{Client, ClientBuilder};
pub use config::Config;
pub use error::Error;
pub use inbox::{AutoRefresh, Inbox, InboxOptions, Notice};
pub use models::{
    Address, AddressCreate, AttachmentInfo, EmailDetail, EmailList, EmailSummary, ListQuery,
    Verdict,
};
pub use state::{InboxState, InboxStatus, ViewMode};
pub use storage::{AddressStore, FileStore, MemoryStore, STORAGE_KEY};

/// Result type alias for Mailbucket operations.
///
/// This is equivalent to `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
