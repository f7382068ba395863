//! Citation gateway for Quarto.
//!
//! This crate lets an external process ask a citation engine for formatted
//! citation clusters and bibliographies. The gateway itself does no CSL
//! processing; it
//!
//! - resolves `[<library>_]<key>` item keys to internal item ids ([`key`]),
//! - builds an engine for a requested style and locale ([`session`]),
//! - answers the engine's item and locale callbacks, including items the
//!   caller registered locally before saving them ([`system`]),
//! - and returns results as 7-bit-escaped JSON ([`escape`]).
//!
//! # Architecture
//!
//! ```text
//!  external process ──JSON lines──▶ bridge ──▶ Session ──▶ CitationEngine
//!                                                 │              │
//!                                                 ▼              ▼ callbacks
//!                                               Host ◀──── LocalItemSystem
//! ```
//!
//! [`host::Host`] and [`engine::EngineFactory`] are the two seams:
//! [`library::JsonLibrary`] is a file-backed host, and
//! [`engine::process::ProcessEngineFactory`] runs the engine as a child
//! process.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod escape;
pub mod host;
pub mod key;
pub mod library;
pub mod session;
pub mod system;

pub use config::GatewayConfig;
pub use engine::{CitationEngine, ClusterResult, EngineFactory, OutputFormat, StyleClass};
pub use error::{Error, Result};
pub use escape::{decode, encode};
pub use host::{Host, SearchCondition, SearchField, SearchOperator};
pub use key::{ItemId, ItemKey, LibraryId};
pub use library::JsonLibrary;
pub use session::{FuzzyMatch, FuzzyQuery, Session};
pub use system::{EngineSystem, LocalItemSystem, LocalItems};
