//! `coapps`: deploy local files as attachments onto a CouchDB document.
//!
//! This crate provides the upload pipeline: content-type classification,
//! revision tracking, the bounded-concurrency upload queue and the batch
//! driver that feeds it from a deployment manifest.

pub mod classify;
pub mod config;
pub mod deploy;
pub mod error;
pub mod manifest;
pub mod queue;
pub mod revision;
pub mod store;
pub mod worker;
