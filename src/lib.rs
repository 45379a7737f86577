//! # Autodidact
//!
//! A self-directed learning service. It asks a generative model for
//! syllabi, explanations, concepts, and exercises, and persists the result
//! as a navigable topic hierarchy that grows incrementally and tracks
//! progress.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Generation │──▶│   Payload    │──▶│    Tree      │──▶│  SQLite  │
//! │  Gemini /  │   │ normalization│   │ synchronizer │   │  (WAL)   │
//! │   mock     │   └──────────────┘   └──────────────┘   └────┬─────┘
//! └────────────┘                                              │
//!       ▲                                   ┌─────────────────┤
//! ┌────────────┐                            ▼                 ▼
//! │  Ingest    │                       ┌──────────┐     ┌──────────┐
//! │ PDF / URL  │                       │   CLI    │     │   HTTP   │
//! └────────────┘                       └──────────┘     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! autodidact init
//! autodidact generate "Linear algebra"
//! autodidact show <topic-id>
//! autodidact serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | Connection pool and schema |
//! | [`store`] | Write gate, row mapping, single-entity inserts |
//! | [`synchronizer`] | Payload to hierarchy reconciliation |
//! | [`query`] | Read-only listings and lookups |
//! | [`generation`] | Generative backends and the [`generation::Generator`] facade |
//! | [`ingest`] | PDF and web page text extraction |
//! | [`server`] | HTTP API |
//! | [`error`] | Error taxonomy and HTTP mapping |
//!
//! Data shapes, payload normalization, and order-index arithmetic live in
//! the `autodidact-core` crate and are re-exported here.

pub mod config;
pub mod db;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod prompts;
pub mod query;
pub mod server;
pub mod store;
pub mod synchronizer;

pub use autodidact_core::{models, ordering, payload};
