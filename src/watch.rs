//! # Change Feed Module
//!
//! ## Purpose
//! Observes structural document mutations, filters them to changes touching
//! candidate elements, debounces, and triggers exactly one scan cycle per
//! quiet period.
//!
//! ## Input/Output Specification
//! - **Input**: Mutation events from the document's broadcast feed
//! - **Output**: Debounced `run_cycle` invocations on the engine
//! - **Guarantee**: Unrelated document churn never triggers a rescan
//!
//! ## Key Features
//! - Cancellable single-shot debounce deadline, restarted per relevant event
//! - Self-disables when the observation source goes away
//! - Shutdown cancels any pending timer before the task exits

use crate::scanner::HighlightEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handle to the spawned mutation watcher task
pub struct MutationWatcher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MutationWatcher {
    /// Spawn a watcher over the engine's document
    pub fn spawn(engine: Arc<HighlightEngine>, debounce: Duration) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(watch_loop(engine, debounce, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Stop observing and cancel any pending rescan timer
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

async fn watch_loop(
    engine: Arc<HighlightEngine>,
    debounce: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut mutations = engine.document().subscribe();
    // Pending rescan deadline; None while the document is quiet
    let mut deadline: Option<Instant> = None;

    tracing::debug!("Mutation watcher started, debounce {:?}", debounce);

    loop {
        let sleep_target = deadline.unwrap_or_else(Instant::now);
        tokio::select! {
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    tracing::debug!("Mutation watcher shutting down");
                    break;
                }
            }
            event = mutations.recv() => match event {
                Ok(mutation) => {
                    if engine.is_relevant_mutation(mutation.added) {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Missed events may have been relevant; rescan once settled
                    tracing::warn!("Mutation feed lagged by {} events", missed);
                    deadline = Some(Instant::now() + debounce);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Observation root is gone: stop observing
                    tracing::debug!("Mutation feed closed, watcher stopping");
                    break;
                }
            },
            _ = tokio::time::sleep_until(sleep_target), if deadline.is_some() => {
                deadline = None;
                engine.run_cycle();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::KEYWORD_TAGS_CLASS;
    use crate::config::EngineConfig;
    use crate::dom::{Document, NodeId, Selector};
    use crate::scanner::{EngineMessage, SettingPayload};
    use serde_json::json;

    const DEBOUNCE: Duration = Duration::from_millis(300);

    fn engine_with_keywords(keywords: &[&str]) -> Arc<HighlightEngine> {
        let engine = HighlightEngine::new(Document::new(), &EngineConfig::default()).unwrap();
        let ack = engine.handle_message(EngineMessage::ActiveSettingUpdated {
            setting: SettingPayload {
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                highlight_threshold: Some(json!(1)),
            },
        });
        assert!(ack.success);
        engine
    }

    fn add_item(doc: &Document, text: &str) -> NodeId {
        let el = doc.create_element("div");
        doc.add_class(el, "job-list-item");
        doc.set_text(el, text);
        doc.append_child(doc.root(), el);
        el
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_relevant_mutation_triggers_one_rescan_after_quiet_period() {
        let engine = engine_with_keywords(&["Rust"]);
        let doc = engine.document().clone();
        let watcher = MutationWatcher::spawn(engine.clone(), DEBOUNCE);
        settle().await;
        let baseline = engine.cycles_run();

        add_item(&doc, "Rust engineer");
        settle().await;

        // Within the debounce window: no rescan yet
        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(engine.cycles_run(), baseline);

        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(engine.cycles_run(), baseline + 1);
        assert_eq!(
            doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).len(),
            1
        );

        watcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_mutations_restarts_debounce() {
        let engine = engine_with_keywords(&["Rust"]);
        let doc = engine.document().clone();
        let watcher = MutationWatcher::spawn(engine.clone(), DEBOUNCE);
        settle().await;
        let baseline = engine.cycles_run();

        add_item(&doc, "Rust one");
        settle().await;
        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;

        // Second mutation before the window elapsed restarts the timer
        add_item(&doc, "Rust two");
        settle().await;
        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(engine.cycles_run(), baseline);

        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(engine.cycles_run(), baseline + 1);
        assert_eq!(
            doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())).len(),
            2
        );

        watcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_mutation_does_not_trigger_rescan() {
        let engine = engine_with_keywords(&["Rust"]);
        let doc = engine.document().clone();
        let watcher = MutationWatcher::spawn(engine.clone(), DEBOUNCE);
        settle().await;
        let baseline = engine.cycles_run();

        let unrelated = doc.create_element("div");
        doc.add_class(unrelated, "sidebar-ad");
        doc.append_child(doc.root(), unrelated);
        settle().await;

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(engine.cycles_run(), baseline);

        watcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_candidate_insertion_is_relevant() {
        let engine = engine_with_keywords(&["Rust"]);
        let doc = engine.document().clone();
        let watcher = MutationWatcher::spawn(engine.clone(), DEBOUNCE);
        settle().await;
        let baseline = engine.cycles_run();

        // A wrapper that contains a candidate element
        let wrapper = doc.create_element("section");
        let item = doc.create_element("div");
        doc.add_class(item, "job-list-item");
        doc.set_text(item, "Rust job");
        doc.append_child(wrapper, item);
        doc.append_child(doc.root(), wrapper);
        settle().await;

        tokio::time::advance(Duration::from_millis(350)).await;
        settle().await;
        assert_eq!(engine.cycles_run(), baseline + 1);

        watcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_timer() {
        let engine = engine_with_keywords(&["Rust"]);
        let doc = engine.document().clone();
        let watcher = MutationWatcher::spawn(engine.clone(), DEBOUNCE);
        settle().await;
        let baseline = engine.cycles_run();

        add_item(&doc, "Rust engineer");
        settle().await;

        watcher.shutdown().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(engine.cycles_run(), baseline);
    }
}
