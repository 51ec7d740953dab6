//! # Doc Harvester
//!
//! A local-first document harvesting and retrieval pipeline.
//!
//! Doc Harvester ingests documents from connectors (filesystem trees, HTTP
//! pages), extracts plain text from binary formats (PDF, Office), splits the
//! text into retrieval chunks that respect structural boundaries, optionally
//! embeds them, and serves keyword/semantic/hybrid search from SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────────┐   ┌───────────┐
//! │ Connectors  │──▶│   Pipeline    │──▶│  SQLite   │
//! │  FS / HTTP  │   │ Extract+Chunk │   │ FTS5+Vec  │
//! └─────────────┘   │    +Embed     │   └────┬──────┘
//!                   └───────────────┘        │
//!                          ┌─────────────────┤
//!                          ▼                 ▼
//!                     ┌──────────┐     ┌──────────┐
//!                     │   CLI    │     │   HTTP   │
//!                     │  (harv)  │     │  (JSON)  │
//!                     └──────────┘     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harv init                          # create database
//! harv harvest filesystem            # ingest local files
//! harv embed pending                 # generate embeddings
//! harv search "overlap rules" --mode hybrid
//! harv qa                            # validate the stored index
//! harv serve http                    # start JSON API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with per-format chunking profiles |
//! | [`models`] | Core data types |
//! | [`connector_fs`] | Filesystem harvester |
//! | [`connector_http`] | HTTP page harvester |
//! | [`extract`] | Binary-format text extraction |
//! | [`chunk`] | Boundary-aware text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`qa`] | Index validation |
//! | [`server`] | JSON HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod connector_http;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod export;
pub mod extract;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod qa;
pub mod search;
pub mod server;
pub mod sources;
pub mod stats;
