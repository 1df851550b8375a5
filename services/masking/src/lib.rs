//! Masking Service
//!
//! Two-stage background-removal pipeline driven by object storage
//! notifications. Uploads trigger mask generation; the correlation record
//! written alongside the masks triggers compositing of the final outputs.
//!
//! ## Features
//!
//! - **Mask Requests**: Invoke the background-removal endpoint for each
//!   upload and persist full-size and thumbnail masks
//! - **Naming-Convention Handoff**: Correlation records are keyed from the
//!   source key, so the second stage filters on a suffix alone
//! - **Alpha Compositing**: Bilinear mask resampling, exact alpha scaling and
//!   Lanczos thumbnails, written as RGBA PNGs
//! - **At-Least-Once Safe**: Every write lands on a derived key, so
//!   redelivered notifications overwrite with identical bytes
//!
//! ## Architecture
//!
//! ```text
//! Upload Bucket             Mask Bucket                   Output Bucket
//! ┌──────────────┐         ┌────────────────────┐        ┌──────────────┐
//! │ <key>        │         │ masks/<key>.png    │        │ processed/   │
//! └──────────────┘         │ thumbnail-masks/   │        │ thumbnails/  │
//!        │                 │ masks/<key>.json   │        └──────────────┘
//!        ▼                 └────────────────────┘               ▲
//! ┌──────────────┐                ▲      │                      │
//! │ Mask Request │────────────────┘      ▼                      │
//! │ Handler      │               ┌────────────────┐             │
//! └──────────────┘               │ Mask Apply     │─────────────┘
//!        │                       │ Handler        │
//!        ▼                       └────────────────┘
//! ┌──────────────┐                       │
//! │ Inference    │                       ▼
//! │ Gateway      │               ┌────────────────┐
//! └──────────────┘               │ Compositor     │
//!                                └────────────────┘
//! ```

pub mod api;
pub mod artifacts;
pub mod compositor;
pub mod config;
pub mod error;
pub mod events;
pub mod inference;
pub mod kafka_consumer;
pub mod keys;
pub mod mask_apply;
pub mod mask_request;
pub mod object_store;
pub mod record;
pub mod wiring;

pub use api::AppState;
pub use config::Config;
pub use error::{PipelineError, Result};
pub use events::{BatchReport, NotificationHandler, S3Event};
pub use inference::{InferenceGateway, MaskSet, SageMakerInference};
pub use keys::KeyLayout;
pub use mask_apply::MaskApplicationHandler;
pub use mask_request::MaskRequestHandler;
pub use object_store::{InMemoryObjectStore, ObjectStore, S3ObjectStore};
pub use record::CorrelationRecord;
