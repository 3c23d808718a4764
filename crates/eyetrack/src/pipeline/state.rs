//! Shared result staging between the producer and any number of readers.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::FeatureRecord;

#[derive(Debug, Default)]
struct Slots {
    latest: Option<Arc<FeatureRecord>>,
    last_good: Option<Arc<FeatureRecord>>,
    generation: u64,
}

/// Most recent record and most recent complete record.
///
/// Records are built outside the lock and published by swapping `Arc`s, so
/// readers never observe a partially written record. Clones share the same
/// slots.
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    inner: Arc<RwLock<Slots>>,
}

impl ResultCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave the slots half-updated, so poisoning is
    // ignored.
    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `record` as the latest result; complete records also become
    /// `last_good`. Returns the new generation.
    pub fn publish(&self, record: impl Into<Arc<FeatureRecord>>) -> u64 {
        let record = record.into();
        let complete = record.is_complete();
        let mut slots = self.write();
        if complete {
            slots.last_good = Some(Arc::clone(&record));
        }
        slots.latest = Some(record);
        slots.generation += 1;
        slots.generation
    }

    /// Latest published record, including degraded ones.
    pub fn latest(&self) -> Option<Arc<FeatureRecord>> {
        self.read().latest.clone()
    }

    /// Latest complete record.
    pub fn last_good(&self) -> Option<Arc<FeatureRecord>> {
        self.read().last_good.clone()
    }

    /// Number of records published so far.
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Latest record if newer than `seen`, with its generation.
    pub fn latest_since(&self, seen: u64) -> Option<(u64, Arc<FeatureRecord>)> {
        let slots = self.read();
        if slots.generation <= seen {
            return None;
        }
        slots.latest.clone().map(|r| (slots.generation, r))
    }

    /// Drop both records. The generation counter keeps counting.
    pub fn clear(&self) {
        let mut slots = self.write();
        slots.latest = None;
        slots.last_good = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Diagnostics;

    fn record(ts: f64, complete: bool) -> FeatureRecord {
        FeatureRecord {
            pupil_position: Some([1.0, 1.0]),
            cr_position: complete.then_some([2.0, 2.0]),
            pupil_radius: Some(3.0),
            cr_radius: complete.then_some(1.0),
            im_shape: [10, 10],
            timestamp: ts,
            frame_number: None,
            pupil_position_stage1: None,
            cr_position_stage1: None,
            downsample_factor: 1,
            gradient_mean: None,
            diagnostics: Diagnostics::default(),
        }
    }

    #[test]
    fn starts_empty() {
        let cache = ResultCache::new();
        assert!(cache.latest().is_none());
        assert!(cache.last_good().is_none());
        assert_eq!(cache.generation(), 0);
        assert!(cache.latest_since(0).is_none());
    }

    #[test]
    fn degraded_records_do_not_replace_last_good() {
        let cache = ResultCache::new();
        cache.publish(record(1.0, true));
        let g = cache.publish(record(2.0, false));
        assert_eq!(g, 2);
        assert_eq!(cache.latest().unwrap().timestamp, 2.0);
        assert_eq!(cache.last_good().unwrap().timestamp, 1.0);
        assert!(cache.latest_since(2).is_none());
        assert_eq!(cache.latest_since(1).unwrap().0, 2);
    }

    #[test]
    fn clones_share_slots_across_threads() {
        let cache = ResultCache::new();
        let writer = cache.clone();
        std::thread::spawn(move || {
            for i in 0..50 {
                writer.publish(record(i as f64, i % 2 == 0));
            }
        })
        .join()
        .unwrap();
        assert_eq!(cache.generation(), 50);
        assert_eq!(cache.latest().unwrap().timestamp, 49.0);
        assert_eq!(cache.last_good().unwrap().timestamp, 48.0);
        cache.clear();
        assert!(cache.latest().is_none());
        assert_eq!(cache.generation(), 50);
    }
}
