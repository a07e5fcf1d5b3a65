//! Photo upload-and-association pipeline for the adventure app.
//!
//! Photos are streamed to S3 under collision-free keys and then linked to an
//! adventure, review or experience (and the uploading user) in Postgres.
//! [`batch::BatchOrchestrator`] runs that pair for every photo of a request
//! and reports a per-photo outcome.

pub mod aws_clients;
pub mod batch;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod startup;
pub mod storage;
pub mod upload;

use crate::{batch::BatchOrchestrator, domain::AssociationRepository};
use std::sync::Arc;

/// AppState holds shared resources for the web server.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: BatchOrchestrator,
    pub repo: Arc<dyn AssociationRepository>,
}
