//! The in-memory record model shared by all three dialects. A `RecordCodec`
//! (see [`crate::record_codec`]) maps this to and from the on-disk field set
//! each dialect actually carries; fields a dialect doesn't support are simply
//! left at their default and dropped silently on save to that dialect.
use std::collections::BTreeMap;

use crate::field::RawField;
use crate::secret::SecretString;
use crate::uuid::Uuid128;

pub type RecordId = Uuid128;

/// `keycode`/`modifiers` pair from a V3 keyboard-shortcut field (§4.7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardShortcut {
    pub keycode: u32,
    pub modifiers: u8,
}

/// One entry in a password database.
///
/// Times are truncated to second precision on the way in (the on-disk
/// encoding has no finer resolution); `password` is the only field kept as
/// a [`SecretString`] since it is the only one the format itself treats as
/// sensitive.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: RecordId,
    pub group: String,
    pub title: String,
    pub username: String,
    pub password: SecretString,
    pub notes: String,
    pub url: String,
    pub email: String,
    pub autotype: String,
    pub password_history: String,
    pub password_policy: String,
    pub password_policy_name: String,
    pub own_symbols_for_password: String,
    pub password_policy_old: Option<[u8; 4]>,
    pub password_expiry_interval: Option<u32>,
    pub protected: bool,
    pub keyboard_shortcut: Option<KeyboardShortcut>,
    pub creation_time: Option<u64>,
    pub password_modification_time: Option<u64>,
    pub last_access_time: Option<u64>,
    pub password_expiry_time: Option<u64>,
    pub last_modification_time: Option<u64>,
    /// Fields read back verbatim that this crate doesn't interpret, plus
    /// (per §4.6) any V3 field whose UUID collided with another record's or
    /// failed to parse at all, preserved so a round-trip save doesn't lose
    /// data even though the record's identity had to be regenerated.
    pub unknown_fields: Vec<RawField>,
    /// Set when this record's on-disk UUID was unusable (missing, wrong
    /// length, or a duplicate of another record already seen) and a fresh
    /// one was generated in its place.
    pub uuid_was_regenerated: bool,
}

impl Record {
    /// A new record with a fresh random id and every other field at its
    /// default/empty value.
    pub fn new() -> Self {
        Record {
            id: RecordId::new_random(),
            group: String::new(),
            title: String::new(),
            username: String::new(),
            password: SecretString::empty(),
            notes: String::new(),
            url: String::new(),
            email: String::new(),
            autotype: String::new(),
            password_history: String::new(),
            password_policy: String::new(),
            password_policy_name: String::new(),
            own_symbols_for_password: String::new(),
            password_policy_old: None,
            password_expiry_interval: None,
            protected: false,
            keyboard_shortcut: None,
            creation_time: None,
            password_modification_time: None,
            last_access_time: None,
            password_expiry_time: None,
            last_modification_time: None,
            unknown_fields: Vec::new(),
            uuid_was_regenerated: false,
        }
    }

    /// The record's group as path segments, with empty segments (from a
    /// leading/trailing/doubled `.`) dropped. `"a..b."` becomes `["a",
    /// "b"]`.
    pub fn group_path(&self) -> Vec<&str> {
        self.group.split('.').filter(|s| !s.is_empty()).collect()
    }

    /// Sets `group`, normalizing away leading/trailing/doubled `.`
    /// separators per the group invariant in spec §3.
    pub fn set_group(&mut self, group: &str) {
        let segments: Vec<&str> = group.split('.').filter(|s| !s.is_empty()).collect();
        self.group = normalize_group(&segments);
    }

    /// Sets a time field, truncating to second precision (the resolution
    /// the on-disk encoding carries).
    pub fn set_creation_time(&mut self, time_ms: u64) {
        self.creation_time = Some(truncate_to_seconds(time_ms));
    }

    pub fn set_password_modification_time(&mut self, time_ms: u64) {
        self.password_modification_time = Some(truncate_to_seconds(time_ms));
    }

    pub fn set_last_access_time(&mut self, time_ms: u64) {
        self.last_access_time = Some(truncate_to_seconds(time_ms));
    }

    pub fn set_password_expiry_time(&mut self, time_ms: u64) {
        self.password_expiry_time = Some(truncate_to_seconds(time_ms));
    }

    pub fn set_last_modification_time(&mut self, time_ms: u64) {
        self.last_modification_time = Some(truncate_to_seconds(time_ms));
    }

    /// A stable per-record digest used by [`crate::record_list::RecordList::signature`]:
    /// SHA-256 over every field this crate interprets plus the raw bytes of
    /// any preserved unknown field, so two records with identical content
    /// (field order aside) hash identically.
    ///
    /// Grounded on the teacher's `DiffableBase`/`FieldMark` pattern in
    /// `src/diff.rs`, which hashes individual fields to detect changes
    /// against a prior snapshot; this generalizes that to a whole-record
    /// digest used for list-level content comparison instead of CRDT sync.
    pub fn signature(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.group.as_bytes());
        hasher.update(self.title.as_bytes());
        hasher.update(self.username.as_bytes());
        hasher.update(&*self.password.get_bytes(crate::charset::Charset::Utf8));
        hasher.update(self.notes.as_bytes());
        hasher.update(self.url.as_bytes());
        hasher.update(self.email.as_bytes());
        hasher.update(self.autotype.as_bytes());
        hasher.update(self.password_history.as_bytes());
        hasher.update(self.password_policy.as_bytes());
        hasher.update(self.password_policy_name.as_bytes());
        hasher.update(self.own_symbols_for_password.as_bytes());
        if let Some(old) = self.password_policy_old {
            hasher.update(old);
        }
        if let Some(interval) = self.password_expiry_interval {
            hasher.update(interval.to_le_bytes());
        }
        hasher.update([self.protected as u8]);
        if let Some(shortcut) = self.keyboard_shortcut {
            hasher.update(shortcut.keycode.to_le_bytes());
            hasher.update([shortcut.modifiers]);
        }
        for time in [
            self.creation_time,
            self.password_modification_time,
            self.last_access_time,
            self.password_expiry_time,
            self.last_modification_time,
        ] {
            if let Some(t) = time {
                hasher.update(t.to_le_bytes());
            }
        }
        for field in &self.unknown_fields {
            hasher.update([field.field_type]);
            hasher.update(field.payload());
        }
        hasher.finalize().into()
    }
}

impl Default for Record {
    fn default() -> Self {
        Record::new()
    }
}

/// Joins path segments back into a normalized group string (no leading,
/// trailing, or doubled separators).
pub fn normalize_group(segments: &[&str]) -> String {
    segments.iter().filter(|s| !s.is_empty()).copied().collect::<Vec<_>>().join(".")
}

/// Truncates a millisecond timestamp to second precision, the resolution
/// the on-disk time fields actually carry.
pub fn truncate_to_seconds(time_ms: u64) -> u64 {
    (time_ms / 1000) * 1000
}

/// A lightweight, order-preserving view used by [`crate::record_list`]'s
/// grouping operations; not persisted.
#[derive(Debug, Default)]
pub struct GroupIndex {
    groups: BTreeMap<String, Vec<RecordId>>,
}

impl GroupIndex {
    pub fn new() -> Self {
        GroupIndex::default()
    }

    pub fn insert(&mut self, group: &str, id: RecordId) {
        self.groups.entry(group.to_string()).or_default().push(id);
    }

    pub fn remove(&mut self, group: &str, id: RecordId) {
        if let Some(ids) = self.groups.get_mut(group) {
            ids.retain(|&existing| existing != id);
            if ids.is_empty() {
                self.groups.remove(group);
            }
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_path_drops_empty_segments() {
        let mut r = Record::new();
        r.group = "a..b.".to_string();
        assert_eq!(r.group_path(), vec!["a", "b"]);
    }

    #[test]
    fn normalize_group_rejoins_without_empty_segments() {
        assert_eq!(normalize_group(&["a", "", "b"]), "a.b");
        assert_eq!(normalize_group(&[]), "");
    }

    #[test]
    fn truncate_to_seconds_drops_sub_second_component() {
        assert_eq!(truncate_to_seconds(1_500), 1_000);
        assert_eq!(truncate_to_seconds(2_000), 2_000);
    }

    #[test]
    fn new_record_has_random_distinct_ids() {
        let a = Record::new();
        let b = Record::new();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn set_group_normalizes() {
        let mut r = Record::new();
        r.set_group(".a..b.");
        assert_eq!(r.group, "a.b");
    }

    #[test]
    fn signature_is_stable_for_identical_content() {
        let mut a = Record::new();
        a.id = RecordId::from_bytes([1; 16]);
        a.title = "same".into();
        let mut b = a.clone();
        b.id = a.id;
        assert_eq!(a.signature(), b.signature());

        b.title = "different".into();
        assert_ne!(a.signature(), b.signature());
    }
}
