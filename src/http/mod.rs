//! HTTP client module
//!
//! Talks to the upload proxy and the test image servers.

mod client;

pub use client::{HttpClient, HttpError};
