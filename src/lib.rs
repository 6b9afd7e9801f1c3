//! Lead Scoring Engine Library
//!
//! Normalizes uploaded lead batches, enriches every lead against five public
//! registries (FSSP, Fedresurs, Rosreestr, courts, tax authority) and scores
//! the result with a fixed rule table.
//!
//! # Modules
//!
//! - `core`: Domain namespace (models, scoring, normalization).
//! - `integrations`: Upstream namespace (adapters, fetch client, proxies).
//! - `circuit_breaker`: Per-source circuit breakers.
//! - `clock`: Injectable clock for date-window rules.
//! - `config`: Configuration management.
//! - `enrichment`: Enrichment orchestrator.
//! - `errors`: Error handling types.
//! - `export`: Delimited output of scored leads and errors.
//! - `fetch_client`: Resilient HTTP client (retries, backoff, proxy rotation).
//! - `ingest`: Reading delimited upload files.
//! - `model`: Probability model used for score blending.
//! - `models`: Core data models.
//! - `normalization`: Field normalization and deduplication.
//! - `pipeline`: End-to-end scoring run.
//! - `proxy_pool`: Proxy pool with quarantine.
//! - `scoring`: Rule-based scoring engine.
//! - `sources`: The five registry adapters.

pub mod core;
pub mod integrations;

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod export;
pub mod fetch_client;
pub mod ingest;
pub mod model;
pub mod models;
pub mod normalization;
pub mod pipeline;
pub mod proxy_pool;
pub mod scoring;
pub mod sources;
