//! # custodiadb
//!
//! A replicated, persistent key-value store. A single-node storage
//! engine (in-memory memtable, immutable on-disk SSTables, background
//! flush and compaction) is fronted by a replication coordinator that
//! fans client requests out to a small static cluster with quorum
//! (`ack`/`from`) semantics.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Coordinator                            │
//! │   hash(key) → replica set   quorum assembly   proxying      │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ local call                 peer HTTP
//!                             ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │  ┌────────────┐  ┌──────────────┐  ┌─────────────────────┐ │
//! │  │  Active     │  │   Flushing   │  │     SSTables        │ │
//! │  │  Memtable   │  │   Memtables  │  │    (on disk)         │ │
//! │  └─────┬───────┘  └──────┬───────┘  └──────────┬───────────┘ │
//! │        │   freeze        │   flush             │ compact     │
//! │        └─────────►       └────────►            │ (merge-all) │
//! │                                                 ▼             │
//! │                                   one new SSTable per run     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, scan, flush, compact |
//! | [`memtable`] | In-memory write buffer, one cell per key |
//! | [`sstable`] | Immutable, sorted, on-disk tables (mmap read, atomic write) |
//! | [`tableset`] | Immutable snapshot of engine state and its transitions |
//! | [`merge`] | N-way merge of cell sources, newest-wins |
//! | [`cell`] | The per-key storage unit and the logical clock |
//! | [`config`] | Engine tuning and cluster topology configuration |
//! | [`error`] | Error taxonomy shared across the engine and coordinator |
//! | [`replication`] | Quorum-based replication coordinator and peer client |
//! | [`http`] | HTTP API: status, single-entity, and ranged-entities routes |
//!
//! ## Key Features
//!
//! - **LSM storage** — writes land in an in-memory memtable and are
//!   flushed to immutable, memory-mapped SSTables in the background.
//! - **Single-cell-per-key** — no multi-version buffering; the latest
//!   write for a key always wins, with tombstones for deletes.
//! - **TTL-as-tombstone** — a value may carry an expiration instant;
//!   reads treat an expired cell exactly like a tombstone.
//! - **Quorum replication** — client requests fan out to `from` replicas
//!   chosen by a rendezvous hash, with `ack` acknowledgements required.
//! - **Chunked range scans** — range reads stream as HTTP chunked
//!   responses rather than buffering the whole result.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use custodiadb::engine::{Engine};
//! use custodiadb::config::EngineConfig;
//!
//! let engine = Engine::open("/tmp/custodiadb-data", EngineConfig::default()).unwrap();
//!
//! engine.upsert(b"hello".to_vec(), b"world".to_vec(), None).unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), b"world".to_vec());
//!
//! engine.remove(b"hello".to_vec()).unwrap();
//! assert!(engine.get(b"hello").is_err());
//!
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod cell;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod memtable;
pub mod merge;
pub mod replication;
pub mod sstable;
pub mod tableset;
