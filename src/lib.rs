//! # Keyword Highlighting Engine
//!
//! ## Overview
//! This library implements a reactive keyword-matching and annotation engine
//! for live, continuously-mutating documents: it scans candidate elements for
//! text matching a user-defined keyword set, tags matching elements, and
//! flags elements whose distinct-keyword match count crosses a threshold as
//! highly relevant.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `dom`: In-memory document tree with selectors and a mutation feed
//! - `pattern`: Safe compilation of keyword lists into literal alternations,
//!   and distinct-keyword matching over element text
//! - `annotate`: Idempotent, fully reversible annotation layer
//! - `scanner`: Scan cycle orchestration, configuration gate, message acks
//! - `watch`: Debounced, mutation-driven rescan scheduling
//! - `store`: Persisted setting groups with an active-setting pointer
//! - `config`: Configuration management and settings
//! - `errors`: Centralized error handling and types
//!
//! ## Input/Output Specification
//! - **Input**: Keyword configuration events, document mutations
//! - **Output**: Document annotations (tags, markers, banners), per-message
//!   acknowledgements
//! - **Guarantees**: Idempotent rescans, full reversibility via clear-all,
//!   no crash on any configuration input
//!
//! ## Usage
//! ```rust
//! use keyword_highlighter::{Document, EngineConfig, HighlightEngine};
//!
//! let doc = Document::new();
//! let engine = HighlightEngine::new(doc.clone(), &EngineConfig::default()).unwrap();
//! let ack = engine.handle_raw(
//!     r#"{"type":"activeSettingUpdated","setting":{"keywords":["Rust"],"highlightThreshold":1}}"#,
//! );
//! assert!(ack.success);
//! ```

// Core modules
pub mod annotate;
pub mod config;
pub mod dom;
pub mod errors;
pub mod pattern;
pub mod scanner;
pub mod store;
pub mod watch;

// Utilities
pub mod utils;

// Re-exports for convenience
pub use config::EngineConfig;
pub use dom::{Document, Mutation, NodeId, Selector};
pub use errors::{EngineError, Result};
pub use pattern::{KeywordMatcher, MatchResult};
pub use scanner::{Ack, EngineMessage, HighlightEngine, SettingPayload};
pub use store::{SettingsStore, SledSettingsStore, StoredSetting};
pub use watch::MutationWatcher;
