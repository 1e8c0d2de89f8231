//! The keyed record collection: add/update/remove/get, group operations,
//! merge, change notification, and the content `signature()` used to
//! detect whether two lists hold the same records regardless of order.
//!
//! No direct teacher precedent covers this module's observer/merge
//! machinery (the teacher's own `src/diff.rs` solves a different problem,
//! CRDT-style remote/local reconciliation for its Matrix sync feature) but
//! its "hash each record, compare against a prior snapshot" pattern is the
//! grounding for [`RecordList::signature`] below.
use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::record::{normalize_group, Record, RecordId};
use crate::uuid::Uuid128;

/// The kind of change a [`FileEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    RecordAdded,
    RecordUpdated,
    RecordRemoved,
    ListCleared,
    ListUpdated,
    ListSaved,
    ContentAltered,
    TargetAltered,
    PassphraseAltered,
}

/// One change notification. `record` carries the affected record's id for
/// the per-record event kinds; list-wide events leave it `None`.
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub source: Uuid128,
    pub kind: FileEventKind,
    pub record_id: Option<RecordId>,
}

/// A synchronous change listener. Boxed closures are the idiom this crate
/// uses throughout for small injectable behaviors (see
/// [`crate::primitives::CryptoRandom`] for the adapter-trait counterpart);
/// a plain `FnMut` is enough here since listeners don't need to be swapped
/// out or compared, only invoked.
pub type Listener = Box<dyn FnMut(&FileEvent) + Send>;

/// Bits selecting which criteria let an incoming record win a merge
/// conflict (§4.8). `PLAIN` (zero bits) always excludes on conflict;
/// `INCLUDE` always includes regardless of any other bit.
pub mod merge_modus {
    pub const PLAIN: u8 = 0;
    pub const MODIFIED: u8 = 1;
    pub const PASSACCESSED: u8 = 2;
    pub const PASSMODIFIED: u8 = 4;
    pub const EXPIRY: u8 = 8;
    pub const INCLUDE: u8 = 16;
}

/// Per-incoming-record outcome of a [`RecordList::merge`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    /// Added with no conflicting id already present.
    Imported,
    /// A conflicting id was present and the incoming record won.
    ImportedConflict,
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub imported: Vec<(RecordId, ImportStatus)>,
    /// Conflicting incoming records that lost (or were invalid and
    /// `allow_invalids` was false).
    pub failed: Vec<Record>,
}

/// A keyed collection of [`Record`]s, naturally ordered by [`RecordId`]
/// (a [`Uuid128`]), with add/update/remove/get, group queries, merge, and
/// synchronous change events.
pub struct RecordList {
    id: Uuid128,
    records: BTreeMap<RecordId, Record>,
    modified: bool,
    listeners: Vec<Listener>,
    paused: bool,
    pending_during_pause: bool,
}

impl RecordList {
    pub fn new() -> Self {
        RecordList {
            id: Uuid128::new_random(),
            records: BTreeMap::new(),
            modified: false,
            listeners: Vec::new(),
            paused: false,
            pending_during_pause: false,
        }
    }

    pub fn id(&self) -> Uuid128 {
        self.id
    }

    pub fn set_id(&mut self, id: Uuid128) {
        self.id = id;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&FileEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn fire(&mut self, kind: FileEventKind, record_id: Option<RecordId>) {
        if self.paused {
            self.pending_during_pause = true;
            return;
        }
        let event = FileEvent { source: self.id, kind, record_id };
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    /// Batches mutations: while paused, per-record events are swallowed and
    /// a single `ListUpdated` fires on the transition back to unpaused, if
    /// anything changed in between (§4.8).
    pub fn set_event_pause(&mut self, paused: bool) {
        if self.paused == paused {
            return;
        }
        self.paused = paused;
        if !paused && self.pending_during_pause {
            self.pending_during_pause = false;
            self.fire(FileEventKind::ListUpdated, None);
        }
    }

    /// Adds a deep copy of `record`. Fails with `Duplicate` if its id is
    /// already present.
    pub fn add(&mut self, record: &Record) -> crate::error::Result<()> {
        if self.records.contains_key(&record.id) {
            return Err(crate::error::Error::Duplicate);
        }
        self.records.insert(record.id, record.clone());
        self.modified = true;
        self.fire(FileEventKind::RecordAdded, Some(record.id));
        self.fire(FileEventKind::ContentAltered, Some(record.id));
        Ok(())
    }

    /// Replaces the record with `record.id`'s contents. Fails with
    /// `NoSuchRecord` if no record with that id exists. Only fires
    /// `RecordUpdated` when the stored signature actually differs.
    pub fn update(&mut self, record: &Record) -> crate::error::Result<()> {
        let Some(existing) = self.records.get(&record.id) else {
            return Err(crate::error::Error::NoSuchRecord);
        };
        let changed = existing.signature() != record.signature();
        self.records.insert(record.id, record.clone());
        if changed {
            self.modified = true;
            self.fire(FileEventKind::RecordUpdated, Some(record.id));
            self.fire(FileEventKind::ContentAltered, Some(record.id));
        }
        Ok(())
    }

    /// Removes the record with the given id, if present.
    pub fn remove(&mut self, id: RecordId) -> bool {
        let removed = self.records.remove(&id).is_some();
        if removed {
            self.modified = true;
            self.fire(FileEventKind::RecordRemoved, Some(id));
            self.fire(FileEventKind::ContentAltered, Some(id));
        }
        removed
    }

    /// A deep copy of the record with the given id, if present.
    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.records.get(&id).cloned()
    }

    /// A snapshot of the ids present at call time, in UUID order.
    pub fn iterator(&self) -> Vec<RecordId> {
        self.records.keys().copied().collect()
    }

    /// Deep copies of every record, in UUID order.
    pub fn all_records(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        if self.records.is_empty() {
            return;
        }
        self.records.clear();
        self.modified = true;
        self.fire(FileEventKind::ListCleared, None);
        self.fire(FileEventKind::ContentAltered, None);
    }

    /// Records whose group matches `prefix`. `exact=true` requires
    /// `group == prefix` or `group` to start with `prefix + "."`; an empty
    /// prefix matches everything.
    pub fn grouped(&self, prefix: &str, exact: bool) -> Vec<Record> {
        if prefix.is_empty() {
            return self.all_records();
        }
        self.records
            .values()
            .filter(|r| group_matches(&r.group, prefix, exact))
            .cloned()
            .collect()
    }

    /// Replaces the leading `from` segment of every matching record's group
    /// with `to`.
    pub fn rename_group(&mut self, from: &str, to: &str) {
        let ids: Vec<RecordId> = self
            .records
            .iter()
            .filter(|(_, r)| group_matches(&r.group, from, true))
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            if let Some(record) = self.records.get_mut(&id) {
                let suffix = record.group.strip_prefix(from).unwrap_or("");
                let suffix = suffix.strip_prefix('.').unwrap_or(suffix);
                let new_group = if suffix.is_empty() {
                    to.to_string()
                } else {
                    format!("{to}.{suffix}")
                };
                record.set_group(&new_group);
                self.modified = true;
                self.fire(FileEventKind::RecordUpdated, Some(id));
            }
        }
        self.fire(FileEventKind::ContentAltered, None);
    }

    /// Removes every record grouped under `group` (and its subgroups).
    pub fn remove_group(&mut self, group: &str) {
        let ids: Vec<RecordId> = self
            .records
            .iter()
            .filter(|(_, r)| group_matches(&r.group, group, true))
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.remove(id);
        }
    }

    /// SHA-256 over each record's own [`Record::signature`], in UUID order,
    /// so two lists with identical content produce the same digest
    /// regardless of insertion order (§4.8, property 9).
    pub fn signature(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for record in self.records.values() {
            hasher.update(record.signature());
        }
        hasher.finalize().into()
    }

    /// Merges `other` into `self` per §4.8. `modus` is a bitset over
    /// [`merge_modus`]; `allow_invalids` controls whether structurally
    /// invalid incoming records (here: both title and username empty) are
    /// merged at all rather than silently dropped.
    pub fn merge(&mut self, other: &RecordList, modus: u8, allow_invalids: bool) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for incoming in other.records.values() {
            if !allow_invalids && !is_valid(incoming) {
                debug!(id = ?incoming.id, "excluding invalid record from merge");
                outcome.failed.push(incoming.clone());
                continue;
            }

            match self.records.get(&incoming.id) {
                None => {
                    self.records.insert(incoming.id, incoming.clone());
                    outcome.imported.push((incoming.id, ImportStatus::Imported));
                }
                Some(existing) => {
                    if prefers_incoming(existing, incoming, modus) {
                        self.records.insert(incoming.id, incoming.clone());
                        outcome.imported.push((incoming.id, ImportStatus::ImportedConflict));
                        self.fire(FileEventKind::RecordUpdated, Some(incoming.id));
                    } else {
                        outcome.failed.push(incoming.clone());
                    }
                }
            }
        }

        if !outcome.imported.is_empty() {
            self.modified = true;
            self.fire(FileEventKind::ContentAltered, None);
        }
        outcome
    }
}

impl Default for RecordList {
    fn default() -> Self {
        RecordList::new()
    }
}

fn group_matches(group: &str, prefix: &str, exact: bool) -> bool {
    if !exact {
        return group.starts_with(prefix);
    }
    group == prefix || group.starts_with(&format!("{prefix}."))
}

/// A record is considered invalid for merge purposes when it carries
/// neither a title nor a username — Password Safe's own UI refuses to save
/// such an entry, so treat it the same way on import.
fn is_valid(record: &Record) -> bool {
    !(record.title.is_empty() && record.username.is_empty())
}

/// Whether `incoming` strictly wins a merge conflict against `existing`
/// under `modus`. `PLAIN` (no bits) always loses; `INCLUDE` always wins;
/// otherwise wins iff any selected timestamp is strictly newer on the
/// incoming side.
fn prefers_incoming(existing: &Record, incoming: &Record, modus: u8) -> bool {
    if modus & merge_modus::INCLUDE != 0 {
        return true;
    }
    if modus & merge_modus::MODIFIED != 0 && newer(incoming.last_modification_time, existing.last_modification_time) {
        return true;
    }
    if modus & merge_modus::PASSACCESSED != 0 && newer(incoming.last_access_time, existing.last_access_time) {
        return true;
    }
    if modus & merge_modus::PASSMODIFIED != 0
        && newer(incoming.password_modification_time, existing.password_modification_time)
    {
        return true;
    }
    if modus & merge_modus::EXPIRY != 0 && newer(incoming.password_expiry_time, existing.password_expiry_time) {
        return true;
    }
    false
}

fn newer(incoming: Option<u64>, existing: Option<u64>) -> bool {
    match (incoming, existing) {
        (Some(i), Some(e)) => i > e,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Normalizes a rename target the same way `Record::set_group` does, for
/// callers building group names programmatically rather than through a
/// record.
pub fn normalized(group: &str) -> String {
    let segments: Vec<&str> = group.split('.').filter(|s| !s.is_empty()).collect();
    normalize_group(&segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_title(title: &str) -> Record {
        let mut r = Record::new();
        r.title = title.to_string();
        r
    }

    #[test]
    fn add_then_get_roundtrips_a_deep_copy() {
        let mut list = RecordList::new();
        let r = record_with_title("one");
        list.add(&r).unwrap();

        let got = list.get(r.id).unwrap();
        assert_eq!(got.title, "one");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn add_duplicate_id_fails() {
        let mut list = RecordList::new();
        let r = record_with_title("one");
        list.add(&r).unwrap();
        assert!(matches!(list.add(&r), Err(crate::error::Error::Duplicate)));
    }

    #[test]
    fn update_missing_record_fails() {
        let mut list = RecordList::new();
        let r = record_with_title("ghost");
        assert!(matches!(list.update(&r), Err(crate::error::Error::NoSuchRecord)));
    }

    #[test]
    fn remove_fires_event_and_drops_record() {
        let mut list = RecordList::new();
        let r = record_with_title("one");
        list.add(&r).unwrap();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        list.add_listener(move |e| seen2.lock().unwrap().push(e.kind));

        assert!(list.remove(r.id));
        assert!(list.get(r.id).is_none());
        let kinds = seen.lock().unwrap();
        assert!(kinds.contains(&FileEventKind::RecordRemoved));
    }

    #[test]
    fn event_pause_batches_into_one_list_updated() {
        let mut list = RecordList::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        list.add_listener(move |e| seen2.lock().unwrap().push(e.kind));

        list.set_event_pause(true);
        list.add(&record_with_title("a")).unwrap();
        list.add(&record_with_title("b")).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        list.set_event_pause(false);
        let kinds = seen.lock().unwrap();
        assert_eq!(kinds.as_slice(), &[FileEventKind::ListUpdated]);
    }

    #[test]
    fn grouped_exact_matches_prefix_and_subgroups_only() {
        let mut list = RecordList::new();
        let mut a = record_with_title("a");
        a.set_group("work");
        let mut b = record_with_title("b");
        b.set_group("work.email");
        let mut c = record_with_title("c");
        c.set_group("workshop");

        list.add(&a).unwrap();
        list.add(&b).unwrap();
        list.add(&c).unwrap();

        let matched = list.grouped("work", true);
        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|r| r.title != "c"));
    }

    #[test]
    fn rename_group_replaces_leading_segment() {
        let mut list = RecordList::new();
        let mut a = record_with_title("a");
        a.set_group("work.email");
        list.add(&a).unwrap();

        list.rename_group("work", "personal");
        let got = list.get(a.id).unwrap();
        assert_eq!(got.group, "personal.email");
    }

    #[test]
    fn remove_group_drops_all_matching_records() {
        let mut list = RecordList::new();
        let mut a = record_with_title("a");
        a.set_group("work");
        let b = record_with_title("b");
        list.add(&a).unwrap();
        list.add(&b).unwrap();

        list.remove_group("work");
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(b.id).unwrap().title, "b");
    }

    #[test]
    fn merge_plain_excludes_conflicts_into_failed() {
        let mut a = RecordList::new();
        let mut b = RecordList::new();

        let shared_id = RecordId::new_random();
        let mut ra = record_with_title("mine");
        ra.id = shared_id;
        a.add(&ra).unwrap();

        let mut rb = record_with_title("theirs");
        rb.id = shared_id;
        b.add(&rb).unwrap();

        let outcome = a.merge(&b, merge_modus::PLAIN, true);
        assert!(outcome.imported.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(a.get(shared_id).unwrap().title, "mine");
    }

    #[test]
    fn merge_include_always_overwrites_conflicts() {
        let mut a = RecordList::new();
        let mut b = RecordList::new();

        let shared_id = RecordId::new_random();
        let mut ra = record_with_title("mine");
        ra.id = shared_id;
        a.add(&ra).unwrap();

        let mut rb = record_with_title("theirs");
        rb.id = shared_id;
        b.add(&rb).unwrap();

        let outcome = a.merge(&b, merge_modus::INCLUDE, true);
        assert_eq!(outcome.imported, vec![(shared_id, ImportStatus::ImportedConflict)]);
        assert_eq!(a.get(shared_id).unwrap().title, "theirs");
    }

    #[test]
    fn merge_modified_prefers_newer_modification_time() {
        let mut a = RecordList::new();
        let mut b = RecordList::new();

        let shared_id = RecordId::new_random();
        let mut ra = record_with_title("mine");
        ra.id = shared_id;
        ra.last_modification_time = Some(1_000);
        a.add(&ra).unwrap();

        let mut rb = record_with_title("theirs");
        rb.id = shared_id;
        rb.last_modification_time = Some(2_000);
        b.add(&rb).unwrap();

        let outcome = a.merge(&b, merge_modus::MODIFIED, true);
        assert_eq!(outcome.imported.len(), 1);
        assert_eq!(a.get(shared_id).unwrap().title, "theirs");
    }

    #[test]
    fn merge_cardinality_holds_for_disjoint_lists() {
        let mut a = RecordList::new();
        let mut b = RecordList::new();
        a.add(&record_with_title("a1")).unwrap();
        a.add(&record_with_title("a2")).unwrap();
        b.add(&record_with_title("b1")).unwrap();

        let n1 = a.len();
        let n2 = b.len();
        let outcome = a.merge(&b, merge_modus::PLAIN, true);
        assert_eq!(a.len() + outcome.failed.len(), n1 + n2);
    }

    #[test]
    fn signature_is_order_independent() {
        let mut a = RecordList::new();
        let mut b = RecordList::new();
        let r1 = record_with_title("one");
        let r2 = record_with_title("two");

        a.add(&r1).unwrap();
        a.add(&r2).unwrap();
        b.add(&r2).unwrap();
        b.add(&r1).unwrap();

        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn invalid_records_excluded_unless_allowed() {
        let mut a = RecordList::new();
        let mut b = RecordList::new();
        let blank = Record::new();
        b.add(&blank).unwrap();

        let outcome = a.merge(&b, merge_modus::INCLUDE, false);
        assert!(outcome.imported.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(a.len(), 0);
    }
}
