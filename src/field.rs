//! The TLV unit of on-disk encoding, and the canonical field-type registry.
use crate::error::{Error, Result};

/// Marks the end of a record (or, at the top level, the end of the V3
/// header field stream).
pub const END_OF_RECORD: u8 = 0xff;

/// `(type, length, data)`. `length` is authoritative; `data` may be longer
/// only because of block padding and is truncated logically by `length`.
#[derive(Clone, Debug)]
pub struct RawField {
    pub field_type: u8,
    length: u32,
    data: Vec<u8>,
}

impl RawField {
    /// Builds a field from its exact payload; `data.len()` becomes `length`.
    pub fn new(field_type: u8, data: Vec<u8>) -> Self {
        RawField {
            field_type,
            length: data.len() as u32,
            data,
        }
    }

    /// Builds a field from a possibly padding-extended buffer plus the
    /// authoritative length read from the header block.
    pub fn from_padded(field_type: u8, length: u32, data: Vec<u8>) -> Self {
        RawField { field_type, length, data }
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// The logical payload, truncated to `length`.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length as usize]
    }

    pub fn is_end_of_record(&self) -> bool {
        self.field_type == END_OF_RECORD
    }

    pub fn end_of_record() -> Self {
        RawField::new(END_OF_RECORD, Vec::new())
    }
}

/// Number of bytes a field occupies on disk once blocked, given only its
/// (authoritative) payload length. See spec §4.5 for the exact layouts.
pub fn blocked_field_size(length: u32, block_size: usize) -> usize {
    match block_size {
        16 => {
            let remaining = length.saturating_sub(11);
            let data_blocks = if remaining == 0 {
                0
            } else {
                div_ceil(remaining as usize, 16)
            };
            16 * (1 + data_blocks)
        }
        8 => {
            let data_blocks = div_ceil(length as usize, 8).max(1);
            8 * (1 + data_blocks)
        }
        other => panic!("unsupported field block size {other}"),
    }
}

fn div_ceil(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

/// V3 header fields. Numeric codes follow the canonical registry (§6.5);
/// unknown codes are preserved verbatim by the caller, not represented here.
#[derive(Debug, Clone)]
pub enum PwsafeHeaderField {
    Version(u16),
    Uuid([u8; 16]),
    NonDefaultPreferences(String),
    TreeDisplayStatus(String),
    LastSaveTime(u32),
    LastSaveWhat(String),
    LastSaveUser(String),
    LastSaveHost(String),
    DatabaseName(String),
    DatabaseDescription(String),
    RecentlyUsedEntries(Vec<u8>),
    NamedPasswordPolicies(String),
    EmptyGroups(Vec<String>),
    EndOfHeader,
}

impl PwsafeHeaderField {
    pub const TYPE_VERSION: u8 = 0x00;
    pub const TYPE_UUID: u8 = 0x01;
    pub const TYPE_NON_DEFAULT_PREFERENCES: u8 = 0x02;
    pub const TYPE_TREE_DISPLAY_STATUS: u8 = 0x03;
    pub const TYPE_LAST_SAVE_TIME: u8 = 0x04;
    pub const TYPE_LAST_SAVE_WHAT: u8 = 0x06;
    pub const TYPE_LAST_SAVE_USER: u8 = 0x07;
    pub const TYPE_LAST_SAVE_HOST: u8 = 0x08;
    pub const TYPE_DATABASE_NAME: u8 = 0x09;
    pub const TYPE_DATABASE_DESCRIPTION: u8 = 0x0a;
    pub const TYPE_RECENTLY_USED_ENTRIES: u8 = 0x0f;
    pub const TYPE_NAMED_PASSWORD_POLICIES: u8 = 0x10;
    pub const TYPE_EMPTY_GROUPS: u8 = 0x11;

    pub fn new(field_type: u8, data: &[u8]) -> Result<Self> {
        Ok(match field_type {
            Self::TYPE_VERSION => {
                if data.len() != 2 {
                    return Err(Error::CorruptStream("version field has wrong length"));
                }
                PwsafeHeaderField::Version(u16::from_le_bytes([data[0], data[1]]))
            }
            Self::TYPE_UUID => {
                let bytes: [u8; 16] = data
                    .try_into()
                    .map_err(|_| Error::CorruptStream("uuid field has wrong length"))?;
                PwsafeHeaderField::Uuid(bytes)
            }
            Self::TYPE_NON_DEFAULT_PREFERENCES => {
                PwsafeHeaderField::NonDefaultPreferences(String::from_utf8_lossy(data).into_owned())
            }
            Self::TYPE_TREE_DISPLAY_STATUS => {
                PwsafeHeaderField::TreeDisplayStatus(String::from_utf8_lossy(data).into_owned())
            }
            Self::TYPE_LAST_SAVE_TIME => PwsafeHeaderField::LastSaveTime(decode_time_u32(data)),
            Self::TYPE_LAST_SAVE_WHAT => {
                PwsafeHeaderField::LastSaveWhat(String::from_utf8_lossy(data).into_owned())
            }
            Self::TYPE_LAST_SAVE_USER => {
                PwsafeHeaderField::LastSaveUser(String::from_utf8_lossy(data).into_owned())
            }
            Self::TYPE_LAST_SAVE_HOST => {
                PwsafeHeaderField::LastSaveHost(String::from_utf8_lossy(data).into_owned())
            }
            Self::TYPE_DATABASE_NAME => {
                PwsafeHeaderField::DatabaseName(String::from_utf8_lossy(data).into_owned())
            }
            Self::TYPE_DATABASE_DESCRIPTION => {
                PwsafeHeaderField::DatabaseDescription(String::from_utf8_lossy(data).into_owned())
            }
            Self::TYPE_RECENTLY_USED_ENTRIES => PwsafeHeaderField::RecentlyUsedEntries(data.to_vec()),
            Self::TYPE_NAMED_PASSWORD_POLICIES => {
                PwsafeHeaderField::NamedPasswordPolicies(String::from_utf8_lossy(data).into_owned())
            }
            Self::TYPE_EMPTY_GROUPS => {
                let text = String::from_utf8_lossy(data);
                PwsafeHeaderField::EmptyGroups(text.split('\0').filter(|s| !s.is_empty()).map(String::from).collect())
            }
            END_OF_RECORD => PwsafeHeaderField::EndOfHeader,
            _ => return Err(Error::CorruptStream("unknown header field type")),
        })
    }
}

fn decode_time_u32(data: &[u8]) -> u32 {
    match data.len() {
        4 => u32::from_le_bytes(data.try_into().unwrap()),
        _ => 0,
    }
}

/// Decodes a time field per §4.7: `u32 * 1000` ms if 4 bytes, `u64 * 1000`
/// ms if 8 bytes, otherwise 0 (returned as milliseconds since epoch).
pub fn decode_time_field_ms(data: &[u8]) -> u64 {
    match data.len() {
        4 => u32::from_le_bytes(data.try_into().unwrap()) as u64 * 1000,
        8 => u64::from_le_bytes(data.try_into().unwrap()) * 1000,
        _ => 0,
    }
}

/// Canonical per-record field types, per §6.5 (`0x01..=0x19` plus `0xff`).
#[derive(Debug, Clone)]
pub enum PwsafeRecordField {
    Uuid([u8; 16]),
    Group(String),
    Title(String),
    Username(String),
    Notes(String),
    Password(String),
    CreationTime(u64),
    PasswordModificationTime(u64),
    LastAccessTime(u64),
    PasswordExpiryTime(u64),
    PasswordPolicyOld([u8; 4]),
    LastModificationTime(u64),
    Url(String),
    Autotype(String),
    PasswordHistory(String),
    PasswordPolicy(String),
    PasswordExpiryInterval(u32),
    Email(String),
    ProtectedEntry(bool),
    OwnSymbolsForPassword(String),
    PasswordPolicyName(String),
    KeyboardShortcut { keycode: u32, modifiers: u8 },
    EndOfRecord,
}

impl PwsafeRecordField {
    pub const TYPE_UUID: u8 = 0x01;
    pub const TYPE_GROUP: u8 = 0x02;
    pub const TYPE_TITLE: u8 = 0x03;
    pub const TYPE_USERNAME: u8 = 0x04;
    pub const TYPE_NOTES: u8 = 0x05;
    pub const TYPE_PASSWORD: u8 = 0x06;
    pub const TYPE_CREATION_TIME: u8 = 0x07;
    pub const TYPE_PASSWORD_MODIFICATION_TIME: u8 = 0x08;
    pub const TYPE_LAST_ACCESS_TIME: u8 = 0x09;
    pub const TYPE_PASSWORD_EXPIRY_TIME: u8 = 0x0a;
    pub const TYPE_PASSWORD_POLICY_OLD: u8 = 0x0b;
    pub const TYPE_LAST_MODIFICATION_TIME: u8 = 0x0c;
    pub const TYPE_URL: u8 = 0x0d;
    pub const TYPE_AUTOTYPE: u8 = 0x0e;
    pub const TYPE_PASSWORD_HISTORY: u8 = 0x0f;
    pub const TYPE_PASSWORD_POLICY: u8 = 0x10;
    pub const TYPE_PASSWORD_EXPIRY_INTERVAL: u8 = 0x11;
    pub const TYPE_EMAIL: u8 = 0x14;
    pub const TYPE_PROTECTED_ENTRY: u8 = 0x15;
    pub const TYPE_OWN_SYMBOLS: u8 = 0x16;
    pub const TYPE_PASSWORD_POLICY_NAME: u8 = 0x18;
    pub const TYPE_KEYBOARD_SHORTCUT: u8 = 0x19;

    /// Highest canonical record field type. Anything above this (other than
    /// `0xff`) is stored as an unknown field rather than rejected, per §4.7.
    pub const MAX_CANONICAL: u8 = 0x19;

    pub fn new(field_type: u8, data: Vec<u8>) -> Result<Self> {
        Ok(match field_type {
            Self::TYPE_UUID => {
                let bytes: [u8; 16] = data
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::CorruptStream("uuid field has wrong length"))?;
                PwsafeRecordField::Uuid(bytes)
            }
            Self::TYPE_GROUP => PwsafeRecordField::Group(utf8(&data)),
            Self::TYPE_TITLE => PwsafeRecordField::Title(utf8(&data)),
            Self::TYPE_USERNAME => PwsafeRecordField::Username(utf8(&data)),
            Self::TYPE_NOTES => PwsafeRecordField::Notes(utf8(&data)),
            Self::TYPE_PASSWORD => PwsafeRecordField::Password(utf8(&data)),
            Self::TYPE_CREATION_TIME => PwsafeRecordField::CreationTime(decode_time_field_ms(&data)),
            Self::TYPE_PASSWORD_MODIFICATION_TIME => {
                PwsafeRecordField::PasswordModificationTime(decode_time_field_ms(&data))
            }
            Self::TYPE_LAST_ACCESS_TIME => PwsafeRecordField::LastAccessTime(decode_time_field_ms(&data)),
            Self::TYPE_PASSWORD_EXPIRY_TIME => {
                PwsafeRecordField::PasswordExpiryTime(decode_time_field_ms(&data))
            }
            Self::TYPE_PASSWORD_POLICY_OLD => {
                let bytes: [u8; 4] = data
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::CorruptStream("old policy field has wrong length"))?;
                PwsafeRecordField::PasswordPolicyOld(bytes)
            }
            Self::TYPE_LAST_MODIFICATION_TIME => {
                PwsafeRecordField::LastModificationTime(decode_time_field_ms(&data))
            }
            Self::TYPE_URL => PwsafeRecordField::Url(utf8(&data)),
            Self::TYPE_AUTOTYPE => PwsafeRecordField::Autotype(utf8(&data)),
            Self::TYPE_PASSWORD_HISTORY => PwsafeRecordField::PasswordHistory(utf8(&data)),
            Self::TYPE_PASSWORD_POLICY => PwsafeRecordField::PasswordPolicy(utf8(&data)),
            Self::TYPE_PASSWORD_EXPIRY_INTERVAL => {
                let bytes: [u8; 4] = data
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::CorruptStream("expiry interval field has wrong length"))?;
                PwsafeRecordField::PasswordExpiryInterval(u32::from_le_bytes(bytes))
            }
            Self::TYPE_EMAIL => PwsafeRecordField::Email(utf8(&data)),
            Self::TYPE_PROTECTED_ENTRY => {
                PwsafeRecordField::ProtectedEntry(data.first().copied() == Some(0xff))
            }
            Self::TYPE_OWN_SYMBOLS => PwsafeRecordField::OwnSymbolsForPassword(utf8(&data)),
            Self::TYPE_PASSWORD_POLICY_NAME => PwsafeRecordField::PasswordPolicyName(utf8(&data)),
            Self::TYPE_KEYBOARD_SHORTCUT => {
                if data.len() != 6 {
                    return Err(Error::CorruptStream("keyboard shortcut field has wrong length"));
                }
                let keycode = u32::from_le_bytes(data[0..4].try_into().unwrap());
                let modifiers = data[4];
                PwsafeRecordField::KeyboardShortcut { keycode, modifiers }
            }
            END_OF_RECORD => PwsafeRecordField::EndOfRecord,
            _ => return Err(Error::CorruptStream("unknown record field type")),
        })
    }
}

fn utf8(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

/// Keyboard shortcut modifier bitmask.
pub mod modifiers {
    pub const ALT: u8 = 1;
    pub const CTRL: u8 = 2;
    pub const SHIFT: u8 = 4;
    pub const ALT_GR: u8 = 8;
    pub const META: u8 = 16;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_size_v3_short_payload_adds_no_data_blocks() {
        assert_eq!(blocked_field_size(0, 16), 16);
        assert_eq!(blocked_field_size(11, 16), 16);
    }

    #[test]
    fn blocked_size_v3_long_payload_adds_data_blocks() {
        assert_eq!(blocked_field_size(12, 16), 32);
        assert_eq!(blocked_field_size(27, 16), 32);
        assert_eq!(blocked_field_size(28, 16), 48);
    }

    #[test]
    fn blocked_size_v1v2_always_has_at_least_one_data_block() {
        assert_eq!(blocked_field_size(0, 8), 16);
        assert_eq!(blocked_field_size(8, 8), 16);
        assert_eq!(blocked_field_size(9, 8), 24);
    }

    #[test]
    fn time_field_decoding() {
        assert_eq!(decode_time_field_ms(&1u32.to_le_bytes()), 1000);
        assert_eq!(decode_time_field_ms(&1u64.to_le_bytes()), 1000);
        assert_eq!(decode_time_field_ms(&[1, 2, 3]), 0);
    }
}
