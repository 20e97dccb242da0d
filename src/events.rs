//! Event stream (spec.md §6 "Event stream (produced)") and read-set
//! tracking for cache invalidation, supplemented from
//! `examples/original_source/`'s `test_read_set.py`: the kernel emits
//! enough information (`path`, `revision`) for subscribers to diff against
//! a previously recorded read-set. The core only produces events and
//! defines the consumed `ReadSetTracker` trait; sinks are pluggable.

use nexus_rebac::ZoneId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeEventType {
    Write,
    Delete,
    Rename,
    Mkdir,
    Rmdir,
}

#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub event_id: u64,
    pub zone_id: ZoneId,
    pub revision: u64,
    pub path: String,
    pub event_type: ChangeEventType,
    pub actor: String,
    pub timestamp: u64,
}

/// Pluggable sink for committed-mutation events (spec.md §6). At-most-once
/// publish per commit; implementors should not block the caller for long.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ChangeEvent);
}

/// Consumed by the kernel so subscribers can diff a previously recorded
/// read-set against newly committed revisions (supplemented feature,
/// `test_read_set.py`). The core calls `record`; invalidation logic lives
/// with the implementor.
pub trait ReadSetTracker: Send + Sync {
    fn record(&self, zone_id: &ZoneId, path: &str, revision: u64);
}

/// Minimal in-memory sink used by tests and as a reference implementation.
#[derive(Default)]
pub struct InMemoryEventSink {
    events: parking_lot::Mutex<Vec<ChangeEvent>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for InMemoryEventSink {
    fn publish(&self, mut event: ChangeEvent) {
        event.event_id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.events.lock().push(event);
    }
}

#[derive(Default)]
pub struct InMemoryReadSetTracker {
    reads: parking_lot::Mutex<Vec<(String, String, u64)>>,
}

impl InMemoryReadSetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> Vec<(String, String, u64)> {
        self.reads.lock().clone()
    }
}

impl ReadSetTracker for InMemoryReadSetTracker {
    fn record(&self, zone_id: &ZoneId, path: &str, revision: u64) {
        self.reads.lock().push((zone_id.0.clone(), path.to_owned(), revision));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_assigns_monotone_event_ids() {
        let sink = InMemoryEventSink::new();
        sink.publish(ChangeEvent {
            event_id: 0,
            zone_id: ZoneId::from("root"),
            revision: 1,
            path: "/a".to_owned(),
            event_type: ChangeEventType::Write,
            actor: "alice".to_owned(),
            timestamp: 0,
        });
        sink.publish(ChangeEvent {
            event_id: 0,
            zone_id: ZoneId::from("root"),
            revision: 2,
            path: "/b".to_owned(),
            event_type: ChangeEventType::Write,
            actor: "alice".to_owned(),
            timestamp: 0,
        });
        let events = sink.events();
        assert_eq!(events[0].event_id, 0);
        assert_eq!(events[1].event_id, 1);
    }

    #[test]
    fn read_set_tracker_records_reads() {
        let tracker = InMemoryReadSetTracker::new();
        tracker.record(&ZoneId::from("root"), "/a", 3);
        assert_eq!(tracker.reads(), vec![("root".to_owned(), "/a".to_owned(), 3)]);
    }
}
