//! # RAG Harness
//!
//! Index lifecycle, document enrichment and search-index reconciliation for
//! a retrieval-augmented-generation gateway.
//!
//! Callers define named indexes and upsert documents into them. The
//! relational store is the system of record; a remote search/vector service
//! holds a derived replica that is brought back in line by reconciliation
//! passes running off the request path.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌────────────────┐   ┌───────────────┐
//! │ TaskDispatcher │──▶│   TaskQueue    │──▶│ Background    │
//! └────────────────┘   └────────────────┘   │ Worker        │
//!                                           └───────┬───────┘
//!                 ┌─────────────────────────────────┤
//!                 ▼                                 ▼
//!        ┌─────────────────┐              ┌─────────────────┐
//!        │ RagOrchestrator │              │ SyncReconciler  │
//!        └───┬─────────┬───┘              └───┬─────────┬───┘
//!            │         │                      │         │
//!            ▼         ▼                      │         ▼
//!     ┌────────────┐ ┌──────────────────┐     │   ┌────────────┐
//!     │ Completion │ │ Catalog + Store  │◀────┘   │  Search    │
//!     │  Gateway   │ │ system of record │         │  Gateway   │
//!     └────────────┘ └──────────────────┘         └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag init                      # create database
//! rag indexes                   # list indexes
//! rag sync Orders               # reconcile one index now
//! rag backfill Orders           # queue metadata generation and drain it
//! rag worker                    # run the background worker until Ctrl-C
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection and transient-fault retry |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Typed orchestration errors |
//! | [`models`] | Index definitions and documents |
//! | [`validation`] | Index name and request validation |
//! | [`store`] | Catalog and document store backends |
//! | [`gateway`] | Remote search service backends |
//! | [`completion`] | Completion client for metadata generation |
//! | [`orchestrator`] | Index lifecycle and document upsert |
//! | [`reconcile`] | Search replica reconciliation |
//! | [`queue`] | Task queues and the background worker |
//! | [`tasks`] | Background task messages and dispatch |

pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod reconcile;
pub mod store;
pub mod tasks;
pub mod validation;
