//! # Utilities Module
//!
//! ## Purpose
//! Small helpers shared across the engine: operation timing for scan-cycle
//! logging and text truncation for log previews.

use std::time::Instant;

/// Performance timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Start a new timer with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("Timer '{}' completed in {}ms", self.name, elapsed);
        elapsed
    }
}

/// Truncate text to specified length with ellipsis, for log previews
pub fn truncate(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_length.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Hello world", 20), "Hello world");
        assert_eq!(truncate("This is a very long text", 10), "This is...");
    }

    #[test]
    fn test_truncate_multibyte() {
        // Must cut on character boundaries
        assert_eq!(truncate("héllo wörld", 20), "héllo wörld");
        assert_eq!(truncate("日本語のテキストです", 6), "日本語...");
    }

    #[test]
    fn test_timer_elapsed() {
        let timer = Timer::new("test");
        assert!(timer.elapsed_ms() < 1000);
        timer.stop();
    }
}
