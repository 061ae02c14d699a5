//! Galaxy ETL: parallel import of a galaxy dump into SQLite
//!
//! This crate turns a newline-delimited galaxy dump (one system per line, with its
//! factions, stations and markets nested inside) into a normalized SQLite store whose
//! keys stay stable across imports:
//!
//! 1. **Maintenance Pass** (on request) -- Index every system, faction and station name
//!    in the dump and extend the durable name-to-id registry; refresh the commodity and
//!    module catalog
//! 2. **Transform Pass** -- Split the dump into N stripes and transform each in its own
//!    worker process (or thread), writing per-worker intermediate record files
//! 3. **Merge Pass** -- Combine the worker files into one file per entity kind, keeping
//!    the first record seen for every faction id
//! 4. **Load Pass** -- Upsert the merged files into the store in foreign-key order, one
//!    transaction per entity kind
//!
//! # Architecture
//!
//! - **Stable ids** -- Names map to ids through JSON files that only ever grow; new names
//!   fill gaps below the current maximum before extending it
//! - **Striped partitioning** -- Worker `k` of `N` owns every line whose index is `k mod N`,
//!   so workers never coordinate while transforming
//! - **Process isolation** -- Workers are child processes supervised with tokio; a single
//!   failure fails the run before anything is loaded
//! - **Stub factions** -- A controlling faction missing from its system's faction list gets
//!   a placeholder record so foreign keys always resolve
//! - **Idempotent loads** -- Every row is an `INSERT ... ON CONFLICT` upsert, so loading the
//!   same files twice leaves the store unchanged
//!
//! # Key Modules
//!
//! - [`pipeline`] -- Orchestrator: maintenance, fan-out, barrier, merge, load, cleanup
//! - [`registry`] -- Durable name-to-id maps with gap-filling allocation
//! - [`index`] -- Single pass over the dump collecting names and catalog entries
//! - [`cache`] -- Dump index persistence keyed by dump size and mtime
//! - [`partition`] -- Work units and striped line reading
//! - [`parser`] -- Dump line decoding into typed system documents
//! - [`transform`] -- System documents to relational records
//! - [`extract`] -- One worker: read a stripe, transform, write partial results
//! - [`writer`] -- Intermediate JSON array files
//! - [`merge`] -- Worker file merging with faction deduplication
//! - [`import`] -- Ordered, transactional loading of merged files
//! - [`store`] -- SQLite schema, reference data and helpers
//! - [`lookup`] -- Reference name-to-id tables used while transforming
//! - [`catalog`] -- Commodity and module definitions
//! - [`overrides`] -- Hand-maintained faction corrections applied after each load
//! - [`report`] -- Per-worker completion reports
//! - [`stats`] -- Atomic counters for transform metrics
//! - [`config`] -- Constants and defaults
//!
//! # Example Usage
//!
//! ```bash
//! # First import: build the registry and catalog, then load everything
//! galaxy-etl -v import -i galaxy.json --ids --caches --market -y
//!
//! # Later imports reuse the registry
//! galaxy-etl import -i galaxy.json -j 12 -y
//!
//! # Only refresh the registry
//! galaxy-etl import -i galaxy.json --ids --skip
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod import;
pub mod index;
pub mod lookup;
pub mod merge;
pub mod models;
pub mod overrides;
pub mod parser;
pub mod partition;
pub mod pipeline;
pub mod preload;
pub mod registry;
pub mod report;
pub mod stats;
pub mod store;
pub mod transform;
pub mod writer;
