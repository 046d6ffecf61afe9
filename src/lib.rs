//! Video Downloader Core Library
//!
//! Detects video resources on web pages, acquires them through whichever
//! channel works, and tracks every download from creation to a terminal
//! state.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`classifier`] - URL classification: direct file or protected resource
//! - [`tracker`] - download lifecycle state machine, persistence and events
//! - [`acquisition`] - ordered fallback strategies for protected resources
//! - [`manager`] - download manager boundary and the local HTTP manager
//! - [`messaging`] - request routing between UI, page scripts and tracker
//! - [`reconciler`] - client-side merge of pushed and polled progress
//! - [`scan`] - per-tab candidate storage and page scan handshake
//! - [`store`] - durable key-value storage
//! - [`bus`] - broadcast of lifecycle events
//! - [`filename`] - collision-resistant filename generation
//! - [`config`] - config file loading

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acquisition;
pub mod bus;
pub mod classifier;
pub mod config;
pub mod filename;
pub mod http;
pub mod manager;
pub mod messaging;
pub mod reconciler;
pub mod record;
pub mod scan;
pub mod store;
pub mod tracker;

// Re-export commonly used types
pub use acquisition::{AcquireError, Acquisition, AcquisitionChain, build_default_chain};
pub use bus::{Broadcaster, Event, EventBus, ProgressSnapshot};
pub use classifier::{Classification, ResourceKind, UrlAnalysis, analyze, classify};
pub use filename::generate_filename;
pub use manager::{DownloadManager, LocalDownloadManager, ManagerError};
pub use messaging::{BackgroundService, DownloadResponse, Request, Response};
pub use reconciler::{ProgressView, ViewEntry};
pub use record::{DetectedVideo, DownloadRecord, DownloadStatus, VideoType};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use tracker::{DownloadTracker, Outcome, PendingMeta, TrackerError};
