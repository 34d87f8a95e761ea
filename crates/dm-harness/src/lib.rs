//! # DM Harness
//!
//! A local-first Dungeon Master assistant core: it indexes the Standard
//! Reference Document (SRD) rules corpus into a hierarchical chunk forest,
//! serves auto-merged and reranked context to a language model through a
//! query engine, and wraps the whole thing in a rules-aware chat agent.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────────┐
//! │  Loader  │──▶│   Chunker     │──▶│ ChunkStore + Vec  │
//! │ SRD JSON │   │ coarse→fine   │   │ Index  [cache]    │
//! └──────────┘   └───────────────┘   └────────┬─────────┘
//!                                             │
//!                        ┌────────────────────┤
//!                        ▼                    ▼
//!                  ┌──────────┐        ┌──────────────┐
//!                  │ QueryEng │◀──────▶│  DM Agent    │
//!                  │ merge+rr │        │  (chat, CLI) │
//!                  └──────────┘        └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`loader`] | SRD directory scan and JSON flattening |
//! | [`persist`] | Index cache probe, save, and load |
//! | [`lifecycle`] | Build-or-load state machine around the query engine |
//! | [`providers`] | HTTP capability providers and config-driven selection |
//! | [`chat`] | Roles, transcript state, and prompt rendering |
//! | [`agent`] | Tool routing and the DM turn pipeline |

pub mod agent;
pub mod chat;
pub mod config;
pub mod lifecycle;
pub mod loader;
pub mod persist;
pub mod providers;
