//! # star-predictor
//!
//! Collects GitHub repository metadata, trains regressors that predict star
//! counts from it, and serves predictions over HTTP.
//!
//! ## Architecture
//!
//! Offline stages write files that the next stage reads; the online path
//! hands batches to workers through an in-process broker:
//!
//! ```text
//!   ┌───────────┐    ┌────────────────┐    ┌──────────┐
//!   │  collect  │───▶│ build-features │───▶│  train   │
//!   │ raw pages │    │ feature table  │    │ artifact │
//!   └───────────┘    └────────────────┘    └────┬─────┘
//!                                               │ loaded once
//!                                               ▼
//!   ┌──────────────┐  submit   ┌────────┐  claim  ┌──────────────┐
//!   │ POST /predict│──────────▶│ Broker │────────▶│   Workers    │
//!   │  (5 repos)   │◀──────────│ queue +│◀────────│ local pool / │
//!   └──────────────┘  results  │ results│ complete│ remote HTTP  │
//!                              └────────┘         └──────────────┘
//!
//!   GET /predict_random_repos: search → sample 5 → fetch → random-set model
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration shared by every subcommand
//! - [`models`] - Shared data types: raw repositories, form inputs, ranked results
//! - [`github`] - Authenticated GitHub REST client (search, repository, commits)
//! - [`collector`] - Persists raw search pages to disk
//! - [`features`] - Derived features, feature sets and the persisted feature table
//! - [`model`] - Preprocessing, crate-backed regressors, training and model artifacts
//! - [`broker`] - Task queue and result backend with timeouts and cancellation
//! - [`worker`] - In-process worker pool and the remote HTTP worker
//! - [`api`] - Axum HTTP handlers for the form, random sampling and broker endpoints
//! - [`state`] - Shared application state

pub mod api;
pub mod broker;
pub mod collector;
pub mod config;
pub mod features;
pub mod github;
pub mod model;
pub mod models;
pub mod state;
pub mod worker;
