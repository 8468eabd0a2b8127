//! Repository media API client.
//!
//! Fetches voxel spacing for a media id. Implements
//! [`speclink_linkage::MediaClient`] over blocking HTTP, plus API key
//! storage for the CLI.

pub mod auth;
pub mod client;
pub mod response;

pub use auth::{
    credentials_path, delete_credentials, load_credentials, resolve_api_key, save_credentials,
    CredentialError, Credentials, KeySource, API_KEY_ENV,
};
pub use client::{classify_status, HttpMediaClient};
pub use response::extract_voxel_spacing;
