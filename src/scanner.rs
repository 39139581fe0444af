//! # Scan Engine Module
//!
//! ## Purpose
//! Orchestrates the clear-then-rescan-then-reannotate cycle over all
//! candidate elements and gates configuration replacement: keyword set,
//! threshold and compiled matcher are swapped atomically as one snapshot.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration events (replace, clear), scan triggers,
//!   bootstrap reads from the settings store
//! - **Output**: Document annotations, per-message acknowledgements
//! - **Ordering**: A cycle always observes the most recently committed
//!   snapshot, never a partial update
//!
//! ## Key Features
//! - Idempotent cycles: full clear before every re-annotation pass
//! - Fresh candidate selection every cycle, no caching across cycles
//! - Serialized cycle execution behind a single lock
//! - Per-message error capture into `{success, error}` acknowledgements

use crate::annotate;
use crate::config::EngineConfig;
use crate::dom::{Document, Selector};
use crate::errors::Result;
use crate::pattern::KeywordMatcher;
use crate::store::{SettingsStore, StoredSetting};
use crate::utils::Timer;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One immutable configuration snapshot. Replaced wholesale on every
/// configuration event; a scan cycle holds one snapshot for its whole run.
#[derive(Debug, Default)]
pub struct EngineState {
    /// Active keywords, display casing preserved
    pub keywords: Vec<String>,
    /// Minimum distinct-keyword count for the highlight marker
    pub threshold: u32,
    /// Compiled matcher; `None` iff the keyword set is empty
    pub matcher: Option<KeywordMatcher>,
}

/// Inbound configuration events from the external transport
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum EngineMessage {
    /// Replace the active keyword configuration and rescan
    #[serde(rename = "activeSettingUpdated")]
    ActiveSettingUpdated { setting: SettingPayload },
    /// Drop the configuration and remove every annotation
    #[serde(rename = "clearAllTags")]
    ClearAllTags,
}

/// Setting payload carried by `activeSettingUpdated`
#[derive(Debug, Clone, Deserialize)]
pub struct SettingPayload {
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Accepted as any JSON value; non-numeric input falls back to the
    /// engine default rather than failing the message
    #[serde(rename = "highlightThreshold", default)]
    pub highlight_threshold: Option<serde_json::Value>,
}

/// Acknowledgement returned for every inbound message
#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// The keyword highlighting engine
pub struct HighlightEngine {
    doc: Document,
    item_selectors: Vec<Selector>,
    banner_anchor: Selector,
    default_threshold: u32,
    state: RwLock<Arc<EngineState>>,
    // Serializes scan cycles; two trigger sources funnel into run_cycle
    cycle_lock: Mutex<()>,
    cycles_run: AtomicU64,
}

impl HighlightEngine {
    /// Build an engine over a document. Registers annotation styles once.
    pub fn new(doc: Document, config: &EngineConfig) -> Result<Arc<Self>> {
        let item_selectors = config.item_selectors()?;
        let banner_anchor = config.banner_anchor()?;
        annotate::inject_styles(&doc);

        Ok(Arc::new(Self {
            doc,
            item_selectors,
            banner_anchor,
            default_threshold: config.scan.default_threshold,
            state: RwLock::new(Arc::new(EngineState {
                threshold: config.scan.default_threshold,
                ..EngineState::default()
            })),
            cycle_lock: Mutex::new(()),
            cycles_run: AtomicU64::new(0),
        }))
    }

    /// The document this engine annotates
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Current configuration snapshot
    pub fn snapshot(&self) -> Arc<EngineState> {
        self.state.read().clone()
    }

    /// Replace the configuration from a transport payload and rescan
    pub fn apply_setting(&self, payload: &SettingPayload) -> Result<()> {
        let threshold =
            coerce_threshold(payload.highlight_threshold.as_ref(), self.default_threshold);
        self.replace_state(payload.keywords.clone(), threshold)
    }

    /// Replace the configuration from a stored setting group and rescan
    pub fn apply_stored(&self, setting: &StoredSetting) -> Result<()> {
        self.replace_state(setting.keywords.clone(), setting.highlight_threshold.max(1))
    }

    fn replace_state(&self, keywords: Vec<String>, threshold: u32) -> Result<()> {
        // Compile first: a failed compile aborts the update and leaves the
        // previous snapshot in place
        let matcher = KeywordMatcher::compile(&keywords)?;
        // Normalized list: matcher is absent exactly when this is empty
        let keywords = matcher
            .as_ref()
            .map(|m| m.keywords().to_vec())
            .unwrap_or_default();
        let preview = crate::utils::truncate(&keywords.join(", "), 80);

        *self.state.write() = Arc::new(EngineState {
            keywords,
            threshold,
            matcher,
        });

        tracing::info!(
            "Configuration replaced: keywords [{}], threshold {}",
            preview,
            threshold
        );
        self.run_cycle();
        Ok(())
    }

    /// Drop the configuration and remove every annotation without scanning
    pub fn clear(&self) {
        *self.state.write() = Arc::new(EngineState {
            threshold: self.default_threshold,
            ..EngineState::default()
        });
        let _guard = self.cycle_lock.lock();
        annotate::clear_all(&self.doc);
        tracing::info!("Configuration cleared, annotations removed");
    }

    /// One complete scan cycle: clear everything, then re-annotate from the
    /// current snapshot. Running twice with an unchanged document yields the
    /// same final annotation state as running once.
    pub fn run_cycle(&self) {
        let _guard = self.cycle_lock.lock();
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        let timer = Timer::new("scan_cycle");
        let state = self.snapshot();

        annotate::clear_all(&self.doc);

        let Some(matcher) = state.matcher.as_ref() else {
            // No keywords configured: the engine is fully inert
            return;
        };

        // Candidates are re-selected from the live document every cycle
        let candidates = self.doc.query_all_any(&self.item_selectors);
        let mut tagged = 0usize;
        let mut highlighted = 0usize;

        for element in candidates {
            if !self.doc.is_connected(element) {
                // Disconnected between selection and processing
                continue;
            }

            let text = self.doc.inner_text(element);
            let result = matcher.match_text(&text);
            let display = matcher.display_keywords(&result);
            let crossed = result.count >= state.threshold as usize;

            if !display.is_empty() {
                tagged += 1;
            }
            if crossed {
                highlighted += 1;
            }
            annotate::annotate(&self.doc, element, &display, crossed, &self.banner_anchor);
        }

        tracing::debug!(
            "Scan cycle: {} tagged, {} highlighted in {}ms",
            tagged,
            highlighted,
            timer.elapsed_ms()
        );
    }

    /// Number of scan cycles executed since startup
    pub fn cycles_run(&self) -> u64 {
        self.cycles_run.load(Ordering::Relaxed)
    }

    /// Whether an inserted node should trigger a rescan: the node is, sits
    /// inside, or contains a candidate element
    pub fn is_relevant_mutation(&self, node: crate::dom::NodeId) -> bool {
        self.item_selectors.iter().any(|sel| {
            self.doc.closest_matches(node, sel) || self.doc.contains_match(node, sel)
        })
    }

    /// Apply whatever the store currently marks active. Called at process
    /// start and whenever the store signals an out-of-band change.
    pub async fn bootstrap(&self, store: &dyn SettingsStore) -> Result<()> {
        match store.load_active().await {
            Ok(Some(setting)) => {
                tracing::info!("Bootstrapping from active setting '{}'", setting.name);
                self.apply_stored(&setting)
            }
            Ok(None) => {
                tracing::info!("No active setting, engine inert");
                self.clear();
                Ok(())
            }
            Err(e) => {
                // Store failure: keep the in-memory state we already have
                tracing::error!("Failed to read active setting: {}", e);
                Err(e)
            }
        }
    }

    /// Handle one inbound message, converting any failure into the ack
    pub fn handle_message(&self, message: EngineMessage) -> Ack {
        let outcome = match message {
            EngineMessage::ActiveSettingUpdated { setting } => self.apply_setting(&setting),
            EngineMessage::ClearAllTags => {
                self.clear();
                Ok(())
            }
        };

        match outcome {
            Ok(()) => Ack::ok(),
            Err(e) => {
                tracing::error!("Error handling message: {}", e);
                Ack::failure(e)
            }
        }
    }

    /// Handle one raw JSON message line
    pub fn handle_raw(&self, raw: &str) -> Ack {
        match serde_json::from_str::<EngineMessage>(raw) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                tracing::warn!("Malformed message: {}", e);
                Ack::failure(format!("Invalid message: {}", e))
            }
        }
    }
}

/// Coerce a JSON threshold value to a positive integer, falling back to the
/// default for anything non-numeric or below 1.
fn coerce_threshold(value: Option<&serde_json::Value>, default: u32) -> u32 {
    value
        .and_then(|v| v.as_u64())
        .filter(|&n| n >= 1)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{BANNER_CLASS, HIGHLIGHTED_ITEM_CLASS, KEYWORD_TAGS_CLASS};
    use crate::dom::NodeId;
    use serde_json::json;

    fn engine() -> Arc<HighlightEngine> {
        HighlightEngine::new(Document::new(), &EngineConfig::default()).unwrap()
    }

    fn add_item(doc: &Document, text: &str) -> NodeId {
        let el = doc.create_element("div");
        doc.add_class(el, "job-list-item");
        doc.set_text(el, text);
        doc.append_child(doc.root(), el);
        el
    }

    fn payload(keywords: &[&str], threshold: serde_json::Value) -> SettingPayload {
        SettingPayload {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            highlight_threshold: Some(threshold),
        }
    }

    fn tag_texts(doc: &Document, container: NodeId) -> Vec<String> {
        doc.children(container)
            .into_iter()
            .map(|span| doc.inner_text(span))
            .collect()
    }

    #[test]
    fn test_python_cpp_scenario() {
        let engine = engine();
        let doc = engine.document().clone();
        let el = add_item(&doc, "We need a Python and C++ engineer.");

        engine.apply_setting(&payload(&["Python", "C++"], json!(1))).unwrap();

        let tags = doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string()));
        assert_eq!(tags.len(), 1);
        assert_eq!(tag_texts(&doc, tags[0]), vec!["Python", "C++"]);
        assert!(doc.has_class(el, HIGHLIGHTED_ITEM_CLASS));
        assert_eq!(doc.query_all(&Selector::Class(BANNER_CLASS.to_string())).len(), 1);
    }

    #[test]
    fn test_distinct_count_below_threshold_not_highlighted() {
        let engine = engine();
        let doc = engine.document().clone();
        let el = add_item(&doc, "Rust developer wanted, Rust experience a plus.");

        engine.apply_setting(&payload(&["Rust"], json!(2))).unwrap();

        // One distinct keyword: tagged but not highlighted
        assert_eq!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).len(), 1);
        assert!(!doc.has_class(el, HIGHLIGHTED_ITEM_CLASS));
        assert!(doc.query_all(&Selector::Class(BANNER_CLASS.to_string())).is_empty());
    }

    #[test]
    fn test_empty_keyword_set_is_inert() {
        let engine = engine();
        let doc = engine.document().clone();
        add_item(&doc, "Rust everywhere");

        engine.apply_setting(&payload(&[], json!(1))).unwrap();

        assert!(engine.snapshot().matcher.is_none());
        assert!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).is_empty());
    }

    #[test]
    fn test_double_run_is_idempotent() {
        let engine = engine();
        let doc = engine.document().clone();
        add_item(&doc, "Senior Rust engineer");
        engine.apply_setting(&payload(&["Rust"], json!(1))).unwrap();

        engine.run_cycle();
        engine.run_cycle();

        assert_eq!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).len(), 1);
        assert_eq!(doc.query_all(&Selector::Class(BANNER_CLASS.to_string())).len(), 1);
    }

    #[test]
    fn test_repeated_cycles_do_not_grow_document() {
        let engine = engine();
        let doc = engine.document().clone();
        add_item(&doc, "Rust and Python engineer");
        engine.apply_setting(&payload(&["Rust", "Python"], json!(1))).unwrap();

        // Each cycle detaches the previous annotations and creates fresh
        // ones; the arena must reuse the released slots
        engine.run_cycle();
        let arena = doc.arena_len();
        for _ in 0..100 {
            engine.run_cycle();
        }

        assert_eq!(doc.arena_len(), arena);
        assert_eq!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).len(), 1);
        assert_eq!(doc.query_all(&Selector::Class(BANNER_CLASS.to_string())).len(), 1);
    }

    #[test]
    fn test_zero_match_element_receives_nothing() {
        let engine = engine();
        let doc = engine.document().clone();
        let el = add_item(&doc, "We are hiring a barista.");

        engine.apply_setting(&payload(&["Rust"], json!(1))).unwrap();
        engine.run_cycle();

        assert!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).is_empty());
        assert!(!doc.has_class(el, HIGHLIGHTED_ITEM_CLASS));
    }

    #[test]
    fn test_clear_removes_all_annotations_and_state() {
        let engine = engine();
        let doc = engine.document().clone();
        add_item(&doc, "Rust and Python");
        engine.apply_setting(&payload(&["Rust", "Python"], json!(1))).unwrap();

        let ack = engine.handle_message(EngineMessage::ClearAllTags);
        assert!(ack.success);

        assert!(engine.snapshot().matcher.is_none());
        assert!(engine.snapshot().keywords.is_empty());
        assert!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).is_empty());
        assert!(doc.query_all(&Selector::Class(BANNER_CLASS.to_string())).is_empty());
    }

    #[test]
    fn test_rescan_after_document_growth() {
        let engine = engine();
        let doc = engine.document().clone();
        engine.apply_setting(&payload(&["Rust"], json!(1))).unwrap();

        add_item(&doc, "Rust core team");
        engine.run_cycle();

        assert_eq!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).len(), 1);
    }

    #[test]
    fn test_detached_candidate_skipped() {
        let engine = engine();
        let doc = engine.document().clone();
        let el = add_item(&doc, "Rust engineer");
        doc.detach(el);

        engine.apply_setting(&payload(&["Rust"], json!(1))).unwrap();

        assert!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).is_empty());
    }

    #[test]
    fn test_malformed_threshold_falls_back_to_default() {
        assert_eq!(coerce_threshold(Some(&json!("three")), 1), 1);
        assert_eq!(coerce_threshold(Some(&json!(null)), 2), 2);
        assert_eq!(coerce_threshold(Some(&json!(0)), 1), 1);
        assert_eq!(coerce_threshold(Some(&json!(-4)), 1), 1);
        assert_eq!(coerce_threshold(None, 1), 1);
        assert_eq!(coerce_threshold(Some(&json!(3)), 1), 3);
    }

    #[test]
    fn test_message_round_trip_from_json() {
        let engine = engine();
        let doc = engine.document().clone();
        add_item(&doc, "Looking for C# developers");

        let ack = engine.handle_raw(
            r#"{"type":"activeSettingUpdated","setting":{"keywords":["C#"],"highlightThreshold":1}}"#,
        );
        assert!(ack.success);
        assert_eq!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).len(), 1);

        let ack = engine.handle_raw(r#"{"type":"clearAllTags"}"#);
        assert!(ack.success);
        assert!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).is_empty());
    }

    #[test]
    fn test_malformed_message_yields_error_ack() {
        let engine = engine();
        let ack = engine.handle_raw("{not json");
        assert!(!ack.success);
        assert!(ack.error.is_some());

        let ack = engine.handle_raw(r#"{"type":"unknownMessage"}"#);
        assert!(!ack.success);
    }

    #[tokio::test]
    async fn test_bootstrap_from_store() {
        use crate::store::{SettingsStore, SledSettingsStore, StoredSetting};
        let dir = tempfile::TempDir::new().unwrap();
        let store = SledSettingsStore::open(dir.path().join("db")).unwrap();

        let engine = engine();
        let doc = engine.document().clone();
        add_item(&doc, "Rust shop");

        // No active setting: inert
        engine.bootstrap(&store).await.unwrap();
        assert!(engine.snapshot().matcher.is_none());

        let setting = StoredSetting::new("s", vec!["Rust".to_string()], 1);
        let id = setting.id;
        store.save(setting).await.unwrap();
        store.set_active(id).await.unwrap();

        engine.bootstrap(&store).await.unwrap();
        assert_eq!(engine.snapshot().keywords, vec!["Rust".to_string()]);
        assert_eq!(doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).len(), 1);
    }
}
