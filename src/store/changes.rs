use crate::model::{RecordId, SurveyRecord};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: RecordId,
    /// Current fields, or the last observed ones for `Removed`.
    pub record: SurveyRecord,
}

impl ChangeEvent {
    pub fn added(record: SurveyRecord) -> Self {
        Self {
            kind: ChangeKind::Added,
            id: record.id.clone(),
            record,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub events: Vec<ChangeEvent>,
}

impl ChangeBatch {
    pub fn new(events: Vec<ChangeEvent>) -> Self {
        Self { events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Records entering the predicate, in delivery order.
    pub fn added(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.events.iter().filter(|e| e.kind == ChangeKind::Added)
    }
}

/// Turns successive full snapshots of a query into change batches.
#[derive(Debug, Default)]
pub struct SnapshotTracker {
    seen: HashMap<RecordId, SurveyRecord>,
}

impl SnapshotTracker {
    pub fn observe(&mut self, snapshot: Vec<SurveyRecord>) -> ChangeBatch {
        let mut events = Vec::new();
        let current: HashSet<RecordId> = snapshot.iter().map(|r| r.id.clone()).collect();

        for record in snapshot {
            match self.seen.get(&record.id) {
                None => events.push(ChangeEvent::added(record.clone())),
                Some(previous) if previous != &record => events.push(ChangeEvent {
                    kind: ChangeKind::Modified,
                    id: record.id.clone(),
                    record: record.clone(),
                }),
                Some(_) => {}
            }
            self.seen.insert(record.id.clone(), record);
        }

        let mut gone: Vec<RecordId> = self
            .seen
            .keys()
            .filter(|id| !current.contains(*id))
            .cloned()
            .collect();
        gone.sort();
        for id in gone {
            if let Some(record) = self.seen.remove(&id) {
                events.push(ChangeEvent {
                    kind: ChangeKind::Removed,
                    id,
                    record,
                });
            }
        }

        ChangeBatch::new(events)
    }
}
