//! Time-paced text reveal
//!
//! [`StreamingRenderer`] turns a fully known reply text into a lazy stream of
//! growing prefixes so the presentation layer can show it incrementally.
//! Character and segment pacing are the same machine with different unit
//! sizes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::Stream;

/// Unit of reveal pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealGranularity {
    /// One character per tick (typing effect)
    Character,
    /// The whole segment in one tick
    Segment,
}

/// Cancels an in-progress reveal
///
/// Cancellation is idempotent: the stream stops emitting and the last
/// emitted prefix stands.
#[derive(Debug, Clone)]
pub struct RevealHandle {
    cancelled: Arc<AtomicBool>,
}

impl RevealHandle {
    /// Stop the reveal; further emissions are suppressed
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the reveal was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Produces paced reveal streams
#[derive(Debug, Clone, Copy)]
pub struct StreamingRenderer {
    granularity: RevealGranularity,
    pace: Duration,
}

impl StreamingRenderer {
    /// Create a renderer with the given granularity and per-unit pace
    #[must_use]
    pub const fn new(granularity: RevealGranularity, pace: Duration) -> Self {
        Self { granularity, pace }
    }

    /// Begin a reveal of `text`
    ///
    /// Returns a cancellation handle and a lazy stream of prefixes; the final
    /// emission is the full text. Each call is an independent stream; an
    /// in-progress stream cannot be restarted, only cancelled.
    #[must_use]
    pub fn stream(
        &self,
        text: impl Into<String>,
    ) -> (RevealHandle, impl Stream<Item = String> + Send) {
        let text = text.into();
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = RevealHandle {
            cancelled: Arc::clone(&cancelled),
        };
        let pace = self.pace;

        let units: Vec<String> = match self.granularity {
            RevealGranularity::Character => text.chars().map(|c| c.to_string()).collect(),
            RevealGranularity::Segment => {
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![text]
                }
            }
        };

        let stream = futures::stream::unfold(
            (String::new(), units.into_iter(), cancelled),
            move |(mut revealed, mut units, cancelled)| async move {
                if cancelled.load(Ordering::SeqCst) {
                    return None;
                }
                let unit = units.next()?;
                tokio::time::sleep(pace).await;
                if cancelled.load(Ordering::SeqCst) {
                    return None;
                }
                revealed.push_str(&unit);
                Some((revealed.clone(), (revealed, units, cancelled)))
            },
        );

        (handle, stream)
    }
}
