//! Maps [`Record`]s to and from the field stream each dialect actually
//! carries (§4.7). V1 has a fixed three-field layout; V2 adds the canonical
//! field set; V3 adds the modern fields (url, email, autotype, history,
//! policy name, protected flag, expiry interval, keyboard shortcut).
//!
//! Grounded on the field-type dispatch `third-party/pwsafer/src/diff.rs`
//! performs via `PwsafeRecordField::new`, generalized here to cover writing
//! as well as reading, and to the full canonical registry rather than the
//! handful of variants the teacher's CRDT diffing needs.
use tracing::warn;

use crate::error::{Error, Result};
use crate::field::{modifiers as kbd_modifiers, PwsafeRecordField, RawField, END_OF_RECORD};
use crate::fieldstream::{FieldStreamReader, FieldStreamWriter};
use crate::header::{VERSION_V1, VERSION_V2, VERSION_V3};
use crate::record::{truncate_to_seconds, KeyboardShortcut, Record, RecordId};
use crate::secret::SecretString;

use std::io::{Read, Write};

/// The literal three-codepoint separator V1 uses to glue title and username
/// into one field: two spaces, a soft hyphen (U+00AD), two spaces.
const V1_SEPARATOR: &str = "  \u{00ad}  ";

/// Outcome of reading one record: the record itself, plus whether reading
/// it had to take a "benign recovery" path (§4.7/§7) that the caller (the
/// `RecordList`/`File` layer) uses to set the preserve-old marker.
pub struct DecodedRecord {
    pub record: Record,
    pub needs_preserve_old: bool,
}

/// Reads records until the underlying field stream is exhausted.
///
/// `version` selects the field set expected on disk; `known_ids` is used
/// only to detect on-disk UUID collisions across records already decoded in
/// this load (duplicate ids get a fresh UUID and mark `needs_preserve_old`,
/// per §4.7).
pub fn decode_all<R: Read>(
    reader: &mut FieldStreamReader<R>,
    version: u8,
    known_ids: &mut std::collections::HashSet<RecordId>,
) -> Result<Vec<DecodedRecord>> {
    let mut out = Vec::new();
    loop {
        match version {
            VERSION_V1 => match decode_record_v1(reader)? {
                Some(decoded) => out.push(decoded),
                None => break,
            },
            VERSION_V2 | VERSION_V3 => match decode_record_v2_v3(reader, version, known_ids)? {
                Some(decoded) => out.push(decoded),
                None => break,
            },
            v => return Err(Error::UnsupportedVersion(v)),
        }
    }
    Ok(out)
}

/// V1's rigid (title [sep] user, password, notes) triple. There is no
/// explicit per-field type byte on disk distinguishing these three from one
/// another beyond their position; callers are expected to know the shape.
fn decode_record_v1<R: Read>(reader: &mut FieldStreamReader<R>) -> Result<Option<DecodedRecord>> {
    let Some(title_field) = reader.read_field()? else {
        return Ok(None);
    };

    let combined = String::from_utf8_lossy(title_field.payload()).into_owned();
    let (title, username) = match combined.split_once(V1_SEPARATOR) {
        Some((t, u)) => (t.to_string(), u.to_string()),
        None => (combined, String::new()),
    };

    let password_field = reader.read_field()?.ok_or(Error::UnexpectedEof)?;
    let notes_field = reader.read_field()?.ok_or(Error::UnexpectedEof)?;

    let mut record = Record::new();
    record.title = title;
    record.username = username;
    record.password.set_from_str(&String::from_utf8_lossy(password_field.payload()));
    record.notes = String::from_utf8_lossy(notes_field.payload()).into_owned();

    Ok(Some(DecodedRecord { record, needs_preserve_old: false }))
}

fn decode_record_v2_v3<R: Read>(
    reader: &mut FieldStreamReader<R>,
    version: u8,
    known_ids: &mut std::collections::HashSet<RecordId>,
) -> Result<Option<DecodedRecord>> {
    let mut record = Record::new();
    let mut saw_any_field = false;
    let mut saw_uuid = false;
    let mut needs_preserve_old = false;
    let mut saw_modern_policy = false;

    loop {
        let Some(field) = reader.read_field()? else {
            if !saw_any_field {
                return Ok(None);
            }
            return Err(Error::UnexpectedEof);
        };
        saw_any_field = true;

        if field.is_end_of_record() {
            break;
        }

        let payload = field.payload().to_vec();
        if field.field_type > PwsafeRecordField::MAX_CANONICAL {
            record.unknown_fields.push(RawField::new(field.field_type, payload));
            continue;
        }

        let decoded = match PwsafeRecordField::new(field.field_type, payload.clone()) {
            Ok(decoded) => decoded,
            Err(_) => {
                warn!(field_type = field.field_type, "keeping malformed canonical field as unknown");
                record.unknown_fields.push(RawField::new(field.field_type, payload));
                continue;
            }
        };

        match decoded {
            PwsafeRecordField::Uuid(bytes) => {
                let id = RecordId::from_bytes(bytes);
                if saw_uuid || known_ids.contains(&id) {
                    warn!(?id, "duplicate or repeated record uuid, regenerating");
                    record.id = RecordId::new_random();
                    record.uuid_was_regenerated = true;
                    needs_preserve_old = true;
                } else {
                    record.id = id;
                }
                saw_uuid = true;
            }
            PwsafeRecordField::Group(s) => record.set_group(&s),
            PwsafeRecordField::Title(s) => record.title = s,
            PwsafeRecordField::Username(s) => record.username = s,
            PwsafeRecordField::Notes(s) => record.notes = s,
            PwsafeRecordField::Password(s) => record.password.set_from_str(&s),
            PwsafeRecordField::CreationTime(t) => record.creation_time = Some(t),
            PwsafeRecordField::PasswordModificationTime(t) => record.password_modification_time = Some(t),
            PwsafeRecordField::LastAccessTime(t) => record.last_access_time = Some(t),
            PwsafeRecordField::PasswordExpiryTime(t) => record.password_expiry_time = Some(t),
            PwsafeRecordField::LastModificationTime(t) => record.last_modification_time = Some(t),
            PwsafeRecordField::PasswordPolicyOld(bytes) => {
                // Read-only: accepted only if a modern policy wasn't already seen, per §4.7.
                if !saw_modern_policy {
                    record.password_policy_old = Some(bytes);
                }
            }
            PwsafeRecordField::Url(s) if version == VERSION_V3 => record.url = s,
            PwsafeRecordField::Autotype(s) if version == VERSION_V3 => record.autotype = s,
            PwsafeRecordField::PasswordHistory(s) if version == VERSION_V3 => record.password_history = s,
            PwsafeRecordField::PasswordPolicy(s) if version == VERSION_V3 => {
                record.password_policy = s;
                saw_modern_policy = true;
                record.password_policy_old = None;
            }
            PwsafeRecordField::PasswordExpiryInterval(v) if version == VERSION_V3 => {
                record.password_expiry_interval = Some(v)
            }
            PwsafeRecordField::Email(s) if version == VERSION_V3 => record.email = s,
            PwsafeRecordField::ProtectedEntry(b) if version == VERSION_V3 => record.protected = b,
            PwsafeRecordField::OwnSymbolsForPassword(s) if version == VERSION_V3 => {
                record.own_symbols_for_password = s
            }
            PwsafeRecordField::PasswordPolicyName(s) if version == VERSION_V3 => {
                record.password_policy_name = s
            }
            PwsafeRecordField::KeyboardShortcut { keycode, modifiers } if version == VERSION_V3 => {
                record.keyboard_shortcut = Some(KeyboardShortcut { keycode, modifiers })
            }
            // A V3-only field read back from a V2 file (shouldn't happen on disk, but
            // tolerated the same way unknown types are): keep the original bytes verbatim.
            _ => record.unknown_fields.push(RawField::new(field.field_type, payload)),
        }
    }

    if !saw_uuid {
        warn!("record has no uuid field, generating one");
        record.id = RecordId::new_random();
        record.uuid_was_regenerated = true;
        needs_preserve_old = true;
    }

    known_ids.insert(record.id);
    Ok(Some(DecodedRecord { record, needs_preserve_old }))
}

/// Writes `records` to `writer` for `version`, in the order given.
pub fn encode_all<W: Write>(writer: &mut FieldStreamWriter<'_, W>, version: u8, records: &[Record]) -> Result<()> {
    for record in records {
        match version {
            VERSION_V1 => encode_record_v1(writer, record)?,
            VERSION_V2 | VERSION_V3 => encode_record_v2_v3(writer, version, record)?,
            v => return Err(Error::UnsupportedVersion(v)),
        }
    }
    Ok(())
}

fn encode_record_v1<W: Write>(writer: &mut FieldStreamWriter<'_, W>, record: &Record) -> Result<()> {
    let combined = if record.username.is_empty() {
        record.title.clone()
    } else {
        format!("{}{}{}", record.title, V1_SEPARATOR, record.username)
    };
    writer.write_field(0, combined.as_bytes())?;

    let password = cleartext(&record.password);
    writer.write_field(0, password.as_bytes())?;
    writer.write_field(0, record.notes.as_bytes())?;
    Ok(())
}

fn encode_record_v2_v3<W: Write>(writer: &mut FieldStreamWriter<'_, W>, version: u8, record: &Record) -> Result<()> {
    writer.write_field(PwsafeRecordField::TYPE_UUID, record.id.as_bytes())?;

    if !record.group.is_empty() {
        writer.write_field(PwsafeRecordField::TYPE_GROUP, record.group.as_bytes())?;
    }
    writer.write_field(PwsafeRecordField::TYPE_TITLE, record.title.as_bytes())?;
    writer.write_field(PwsafeRecordField::TYPE_USERNAME, record.username.as_bytes())?;
    if !record.notes.is_empty() {
        writer.write_field(PwsafeRecordField::TYPE_NOTES, record.notes.as_bytes())?;
    }
    // Password is always written, even when empty, per §4.7.
    let password = cleartext(&record.password);
    writer.write_field(PwsafeRecordField::TYPE_PASSWORD, password.as_bytes())?;

    // Old policy (0x0b) is read-only per §4.7: V3 always writes the modern
    // text form (0x10) below and never re-emits 0x0b.
    if version == VERSION_V2 {
        if let Some(old) = record.password_policy_old {
            writer.write_field(PwsafeRecordField::TYPE_PASSWORD_POLICY_OLD, &old)?;
        }
    }

    write_time_if_nonzero(writer, PwsafeRecordField::TYPE_CREATION_TIME, record.creation_time)?;
    write_time_if_nonzero(
        writer,
        PwsafeRecordField::TYPE_PASSWORD_MODIFICATION_TIME,
        record.password_modification_time,
    )?;
    write_time_if_nonzero(writer, PwsafeRecordField::TYPE_LAST_ACCESS_TIME, record.last_access_time)?;
    write_time_if_nonzero(
        writer,
        PwsafeRecordField::TYPE_PASSWORD_EXPIRY_TIME,
        record.password_expiry_time,
    )?;
    write_time_if_nonzero(
        writer,
        PwsafeRecordField::TYPE_LAST_MODIFICATION_TIME,
        record.last_modification_time,
    )?;

    if version == VERSION_V3 {
        if !record.url.is_empty() {
            writer.write_field(PwsafeRecordField::TYPE_URL, record.url.as_bytes())?;
        }
        if !record.email.is_empty() {
            writer.write_field(PwsafeRecordField::TYPE_EMAIL, record.email.as_bytes())?;
        }
        if !record.autotype.is_empty() {
            writer.write_field(PwsafeRecordField::TYPE_AUTOTYPE, record.autotype.as_bytes())?;
        }
        if !record.password_history.is_empty() {
            writer.write_field(PwsafeRecordField::TYPE_PASSWORD_HISTORY, record.password_history.as_bytes())?;
        }
        if !record.password_policy.is_empty() {
            // Always the "modern" policy text form (field 0x10), per §4.7.
            writer.write_field(PwsafeRecordField::TYPE_PASSWORD_POLICY, record.password_policy.as_bytes())?;
        }
        if !record.own_symbols_for_password.is_empty() {
            writer.write_field(PwsafeRecordField::TYPE_OWN_SYMBOLS, record.own_symbols_for_password.as_bytes())?;
        }
        if !record.password_policy_name.is_empty() {
            writer.write_field(
                PwsafeRecordField::TYPE_PASSWORD_POLICY_NAME,
                record.password_policy_name.as_bytes(),
            )?;
        }
        if let Some(interval) = record.password_expiry_interval {
            writer.write_field(PwsafeRecordField::TYPE_PASSWORD_EXPIRY_INTERVAL, &interval.to_le_bytes())?;
        }
        if record.protected {
            writer.write_field(PwsafeRecordField::TYPE_PROTECTED_ENTRY, &[0xff])?;
        }
        if let Some(shortcut) = record.keyboard_shortcut {
            let mut buf = Vec::with_capacity(6);
            buf.extend_from_slice(&shortcut.keycode.to_le_bytes());
            buf.push(shortcut.modifiers & (kbd_modifiers::ALT
                | kbd_modifiers::CTRL
                | kbd_modifiers::SHIFT
                | kbd_modifiers::ALT_GR
                | kbd_modifiers::META));
            buf.push(0);
            writer.write_field(PwsafeRecordField::TYPE_KEYBOARD_SHORTCUT, &buf)?;
        }
    }

    for unknown in &record.unknown_fields {
        writer.write_field(unknown.field_type, unknown.payload())?;
    }

    writer.write_field(END_OF_RECORD, &[])
}

fn write_time_if_nonzero<W: Write>(writer: &mut FieldStreamWriter<'_, W>, field_type: u8, time: Option<u64>) -> Result<()> {
    match time.map(truncate_to_seconds) {
        Some(0) | None => Ok(()),
        Some(t) => writer.write_field(field_type, &((t / 1000) as u32).to_le_bytes()),
    }
}

/// Decrypts a `SecretString` to a plain `String`, wiping the intermediate
/// buffer (`Zeroizing`, via `get_bytes`) once copied out. The copy itself is
/// handed straight to `write_field`/`as_bytes` and not retained.
fn cleartext(secret: &SecretString) -> String {
    String::from_utf8_lossy(&secret.get_bytes(crate::charset::Charset::Utf8)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstream::{BlockStreamReader, BlockStreamWriter};
    use crate::primitives::{new_checksum, OsRandom, TwofishAdapter};
    use std::collections::HashSet;

    fn v3_roundtrip(records: &[Record]) -> Vec<Record> {
        let key = [5u8; 32];
        let iv = vec![0u8; 16];
        let seed = [2u8; 32];

        let mut buf = Vec::new();
        {
            let cipher: Box<dyn crate::primitives::BlockCipherAdapter> = Box::new(TwofishAdapter::new(&key).unwrap());
            let blocks = BlockStreamWriter::new(&mut buf, cipher, iv.clone(), &OsRandom);
            let mut writer = FieldStreamWriter::new(blocks, Some(new_checksum(&seed).unwrap()));
            encode_all(&mut writer, VERSION_V3, records).unwrap();
            writer.finish().unwrap();
        }

        let cipher: Box<dyn crate::primitives::BlockCipherAdapter> = Box::new(TwofishAdapter::new(&key).unwrap());
        let blocks = BlockStreamReader::new(std::io::Cursor::new(buf), cipher, iv).unwrap();
        let mut reader = FieldStreamReader::new(blocks, Some(new_checksum(&seed).unwrap()));
        let mut known = HashSet::new();
        decode_all(&mut reader, VERSION_V3, &mut known).unwrap().into_iter().map(|d| d.record).collect()
    }

    #[test]
    fn v3_record_roundtrips_core_fields() {
        let mut r = Record::new();
        r.title = "Hans Hase".into();
        r.username = "Hasimaus".into();
        r.password.set_from_str("abc");
        r.notes = "Zugang zum Tresor".into();
        r.url = "https://example.com".into();
        r.email = "hans@example.com".into();
        r.protected = true;
        r.keyboard_shortcut = Some(KeyboardShortcut { keycode: 0x41, modifiers: kbd_modifiers::CTRL });

        let out = v3_roundtrip(std::slice::from_ref(&r));
        assert_eq!(out.len(), 1);
        let got = &out[0];
        assert_eq!(got.id, r.id);
        assert_eq!(got.title, r.title);
        assert_eq!(got.username, r.username);
        assert!(got.password.equals(&r.password));
        assert_eq!(got.notes, r.notes);
        assert_eq!(got.url, r.url);
        assert_eq!(got.email, r.email);
        assert!(got.protected);
        assert_eq!(got.keyboard_shortcut, r.keyboard_shortcut);
    }

    #[test]
    fn unknown_field_types_are_preserved() {
        let mut r = Record::new();
        r.title = "with unknown".into();
        r.unknown_fields.push(RawField::new(0x30, b"vendor extension".to_vec()));

        let out = v3_roundtrip(std::slice::from_ref(&r));
        assert_eq!(out[0].unknown_fields.len(), 1);
        assert_eq!(out[0].unknown_fields[0].payload(), b"vendor extension");
    }

    #[test]
    fn missing_uuid_is_regenerated_and_flagged() {
        let key = [5u8; 32];
        let iv = vec![0u8; 16];
        let seed = [2u8; 32];
        let mut buf = Vec::new();
        {
            let cipher: Box<dyn crate::primitives::BlockCipherAdapter> = Box::new(TwofishAdapter::new(&key).unwrap());
            let blocks = BlockStreamWriter::new(&mut buf, cipher, iv.clone(), &OsRandom);
            let mut writer = FieldStreamWriter::new(blocks, Some(new_checksum(&seed).unwrap()));
            writer.write_field(PwsafeRecordField::TYPE_TITLE, b"no uuid here").unwrap();
            writer.write_field(END_OF_RECORD, &[]).unwrap();
            writer.finish().unwrap();
        }

        let cipher: Box<dyn crate::primitives::BlockCipherAdapter> = Box::new(TwofishAdapter::new(&key).unwrap());
        let blocks = BlockStreamReader::new(std::io::Cursor::new(buf), cipher, iv).unwrap();
        let mut reader = FieldStreamReader::new(blocks, Some(new_checksum(&seed).unwrap()));
        let mut known = HashSet::new();
        let decoded = decode_all(&mut reader, VERSION_V3, &mut known).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].record.uuid_was_regenerated);
        assert!(decoded[0].needs_preserve_old);
    }

    #[test]
    fn v1_record_roundtrips() {
        let key = [5u8; 32];
        let iv = vec![0u8; 8];
        let mut buf = Vec::new();
        {
            let cipher: Box<dyn crate::primitives::BlockCipherAdapter> =
                Box::new(crate::primitives::BlowfishAdapter::new(&key).unwrap());
            let blocks = BlockStreamWriter::new(&mut buf, cipher, iv.clone(), &OsRandom);
            let mut writer = FieldStreamWriter::new(blocks, None);
            let mut r = Record::new();
            r.title = "Hans Hase".into();
            r.username = "Hasimaus".into();
            r.password.set_from_str("abc");
            r.notes = "Zugang zum Tresor".into();
            encode_all(&mut writer, VERSION_V1, std::slice::from_ref(&r)).unwrap();
            writer.finish().unwrap();
        }

        let cipher: Box<dyn crate::primitives::BlockCipherAdapter> =
            Box::new(crate::primitives::BlowfishAdapter::new(&key).unwrap());
        let blocks = BlockStreamReader::new(std::io::Cursor::new(buf), cipher, iv).unwrap();
        let mut reader = FieldStreamReader::new(blocks, None);
        let mut known = HashSet::new();
        let decoded = decode_all(&mut reader, VERSION_V1, &mut known).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].record.title, "Hans Hase");
        assert_eq!(decoded[0].record.username, "Hasimaus");
        assert_eq!(
            String::from_utf8_lossy(&decoded[0].record.password.get_bytes(crate::charset::Charset::Utf8)),
            "abc"
        );
        assert_eq!(decoded[0].record.notes, "Zugang zum Tresor");
    }
}
