//! # Feedcaster Feeds
//!
//! Fetches external feeds and normalizes their entries into strict
//! [`Candidate`](feedcaster_core::types::Candidate) records, and screens
//! out the ones not worth a post.

pub mod filter;
pub mod http;
pub mod ingest;

pub use filter::{CandidateFilter, Screened};
pub use http::HttpFeedSource;
pub use ingest::{IngestBatch, Ingestor};
