//! The ordered `u8 -> RawField` map V3 files keep ahead of their records
//! (database name/description, last-save metadata, empty groups, ...).
//! V1/V2 have no such list at all.
use crate::field::{PwsafeHeaderField, RawField};
use crate::uuid::Uuid128;

/// Preserves insertion order so an unmodified header round-trips
/// byte-for-byte on the fields this crate doesn't interpret.
#[derive(Debug, Default, Clone)]
pub struct HeaderFieldList {
    fields: Vec<RawField>,
}

impl HeaderFieldList {
    pub fn new() -> Self {
        HeaderFieldList { fields: Vec::new() }
    }

    pub fn insert_raw(&mut self, field: RawField) {
        if let Some(slot) = self.fields.iter_mut().find(|f| f.field_type == field.field_type) {
            *slot = field;
        } else {
            self.fields.push(field);
        }
    }

    pub fn get_raw(&self, field_type: u8) -> Option<&RawField> {
        self.fields.iter().find(|f| f.field_type == field_type)
    }

    pub fn remove(&mut self, field_type: u8) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| f.field_type != field_type);
        self.fields.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn decoded(&self) -> impl Iterator<Item = crate::error::Result<PwsafeHeaderField>> + '_ {
        self.fields.iter().map(|f| PwsafeHeaderField::new(f.field_type, f.payload().to_vec()))
    }

    pub fn database_name(&self) -> Option<String> {
        self.get_raw(PwsafeHeaderField::TYPE_DATABASE_NAME)
            .map(|f| String::from_utf8_lossy(f.payload()).into_owned())
    }

    pub fn set_database_name(&mut self, name: &str) {
        self.insert_raw(RawField::new(PwsafeHeaderField::TYPE_DATABASE_NAME, name.as_bytes().to_vec()));
    }

    /// The file's own UUID (field 0x01), distinct from any record's id.
    pub fn file_uuid(&self) -> Option<Uuid128> {
        self.get_raw(PwsafeHeaderField::TYPE_UUID)
            .and_then(|f| f.payload().try_into().ok())
            .map(Uuid128::from_bytes)
    }

    pub fn set_file_uuid(&mut self, uuid: Uuid128) {
        self.insert_raw(RawField::new(PwsafeHeaderField::TYPE_UUID, uuid.as_bytes().to_vec()));
    }

    pub fn last_save_time(&self) -> Option<u32> {
        self.get_raw(PwsafeHeaderField::TYPE_LAST_SAVE_TIME)
            .map(|f| crate::field::decode_time_field_ms(f.payload()) as u32 / 1000)
    }

    pub fn set_last_save_time(&mut self, unix_seconds: u32) {
        self.insert_raw(RawField::new(
            PwsafeHeaderField::TYPE_LAST_SAVE_TIME,
            unix_seconds.to_le_bytes().to_vec(),
        ));
    }

    pub fn database_description(&self) -> Option<String> {
        self.get_raw(PwsafeHeaderField::TYPE_DATABASE_DESCRIPTION)
            .map(|f| String::from_utf8_lossy(f.payload()).into_owned())
    }

    pub fn set_database_description(&mut self, description: &str) {
        self.insert_raw(RawField::new(
            PwsafeHeaderField::TYPE_DATABASE_DESCRIPTION,
            description.as_bytes().to_vec(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_raw_overwrites_same_type_in_place() {
        let mut list = HeaderFieldList::new();
        list.insert_raw(RawField::new(PwsafeHeaderField::TYPE_DATABASE_NAME, b"first".to_vec()));
        list.insert_raw(RawField::new(PwsafeHeaderField::TYPE_DATABASE_NAME, b"second".to_vec()));
        assert_eq!(list.len(), 1);
        assert_eq!(list.database_name().unwrap(), "second");
    }

    #[test]
    fn database_name_helpers_roundtrip() {
        let mut list = HeaderFieldList::new();
        list.set_database_name("vault");
        assert_eq!(list.database_name().unwrap(), "vault");
    }

    #[test]
    fn file_uuid_helpers_roundtrip() {
        let mut list = HeaderFieldList::new();
        let uuid = Uuid128::new_random();
        list.set_file_uuid(uuid);
        assert_eq!(list.file_uuid(), Some(uuid));
    }
}
