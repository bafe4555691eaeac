//! Dropbox remote store for PhotoPush.
//!
//! This module provides the production backend:
//! - Bearer-token authentication
//! - Paginated folder listings
//! - Single-request and session uploads
//! - Error mapping onto the common transient/terminal kinds

pub mod client;
pub mod provider;

pub use client::DropboxClient;
pub use provider::{DropboxConfig, DropboxStore, DEFAULT_CLIENT_IDENTIFIER};
