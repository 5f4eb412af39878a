//! Latest-value handoff between independently clocked stages.
//!
//! Every stage publishes into a `tokio::sync::watch` channel carrying a
//! [`StreamUpdate`]: consumers always see the most recent value and stale
//! values are overwritten, never queued. [`LatestJoin`] is the
//! combine-latest rule used to pair the audio and spatial streams.

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::PipelineError;

/// State of a latest-value stream
#[derive(Debug)]
pub enum StreamUpdate<T> {
    /// Nothing produced yet
    Pending,
    Value(Arc<T>),
    /// Closed with a failure; stays until the producer is restarted
    Terminated(PipelineError),
}

// Manual impl: cloning only bumps the Arc, so `T` need not be Clone
impl<T> Clone for StreamUpdate<T> {
    fn clone(&self) -> Self {
        match self {
            StreamUpdate::Pending => StreamUpdate::Pending,
            StreamUpdate::Value(v) => StreamUpdate::Value(Arc::clone(v)),
            StreamUpdate::Terminated(e) => StreamUpdate::Terminated(e.clone()),
        }
    }
}

impl<T> Default for StreamUpdate<T> {
    fn default() -> Self {
        StreamUpdate::Pending
    }
}

impl<T> StreamUpdate<T> {
    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            StreamUpdate::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            StreamUpdate::Terminated(e) => Some(e),
            _ => None,
        }
    }
}

/// Create a latest-value channel starting in [`StreamUpdate::Pending`]
pub fn latest<T>() -> (
    watch::Sender<StreamUpdate<T>>,
    watch::Receiver<StreamUpdate<T>>,
) {
    watch::channel(StreamUpdate::Pending)
}

/// Combine-latest over two streams
///
/// Emits a pair once both sides have produced a value, then on every new
/// value from either side, reusing the other side's last value.
#[derive(Debug)]
pub struct LatestJoin<A, B> {
    left: Option<Arc<A>>,
    right: Option<Arc<B>>,
}

impl<A, B> Default for LatestJoin<A, B> {
    fn default() -> Self {
        Self {
            left: None,
            right: None,
        }
    }
}

impl<A, B> LatestJoin<A, B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_left(&mut self, value: Arc<A>) -> Option<(Arc<A>, Arc<B>)> {
        self.left = Some(value);
        self.pair()
    }

    pub fn push_right(&mut self, value: Arc<B>) -> Option<(Arc<A>, Arc<B>)> {
        self.right = Some(value);
        self.pair()
    }

    /// Forget the left value; nothing fires until it is produced again
    pub fn clear_left(&mut self) {
        self.left = None;
    }

    pub fn clear_right(&mut self) {
        self.right = None;
    }

    pub fn is_ready(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    fn pair(&self) -> Option<(Arc<A>, Arc<B>)> {
        match (&self.left, &self.right) {
            (Some(a), Some(b)) => Some((a.clone(), b.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_waits_for_both_sides() {
        let mut join: LatestJoin<u32, &str> = LatestJoin::new();

        assert!(join.push_left(Arc::new(1)).is_none());
        assert!(join.push_left(Arc::new(2)).is_none());
        assert!(!join.is_ready());

        let (a, b) = join.push_right(Arc::new("first")).unwrap();
        assert_eq!((*a, *b), (2, "first"));
    }

    #[test]
    fn test_join_reuses_other_side() {
        let mut join: LatestJoin<u32, &str> = LatestJoin::new();
        join.push_right(Arc::new("camera"));
        join.push_left(Arc::new(1));

        let (a, b) = join.push_left(Arc::new(7)).unwrap();
        assert_eq!((*a, *b), (7, "camera"));

        let (a, b) = join.push_right(Arc::new("moved")).unwrap();
        assert_eq!((*a, *b), (7, "moved"));
    }

    #[test]
    fn test_cleared_side_blocks_until_refilled() {
        let mut join: LatestJoin<u32, &str> = LatestJoin::new();
        join.push_left(Arc::new(1));
        join.push_right(Arc::new("camera"));

        join.clear_left();
        assert!(join.push_right(Arc::new("again")).is_none());
        assert!(join.push_left(Arc::new(3)).is_some());
    }

    #[test]
    fn test_update_accessors() {
        let pending: StreamUpdate<u8> = StreamUpdate::default();
        assert!(pending.value().is_none());

        let value = StreamUpdate::Value(Arc::new(5u8));
        assert_eq!(value.value().map(|v| **v), Some(5));

        let failed: StreamUpdate<u8> =
            StreamUpdate::Terminated(PipelineError::StreamTerminated("gone".into()));
        assert!(failed.error().is_some());
        assert!(failed.value().is_none());
    }
}
