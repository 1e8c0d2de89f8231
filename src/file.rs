//! The `File` facade (§4.9): load/save orchestration over a
//! [`ResourceAdapter`], tying together the header engine, record codec,
//! and record list into the single entry point embedders use.
//!
//! Grounded on `bin/pwsafe-matrix/src/lockfile.rs`'s careful handling of
//! file permissions and cleanup, and on `src/pwsafe.rs::PwsafeLock::rewrite`'s
//! write-then-persist discipline (crate `tempfile`, a teacher dependency),
//! generalized here into the full safe-swap protocol of spec.md §4.9
//! (temp-then-delete-then-rename, `.old` preservation, copy-then-delete
//! fallback on a failed rename).
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::adapter::{copy_via_adapter, FilesystemAdapter, ResourceAdapter};
use crate::charset::Charset;
use crate::error::{Error, Result};
use crate::fieldstream::verify_trailer;
use crate::header::{
    self, HeaderSocket, HeaderWriteParams, OpenOutcome, ANY_VERSION, DEFAULT_ITERATIONS, MAX_ITERATIONS, VERSION_V3,
};
use crate::header_fields::HeaderFieldList;
use crate::primitives::{BlockCipherFactory, CryptoRandom, OsRandom, TwofishFactory};
use crate::record_codec;
use crate::record_list::RecordList;

/// Ties the primitives/RNG/storage seams together, with the default
/// [`Default`] impl wiring the same concrete stack spec.md §9 describes
/// as "global singletons become explicit configuration".
///
/// `cipher_factory` and `rng` are accepted for embedders who need an
/// alternate (e.g. FIPS-validated) implementation of
/// [`crate::primitives::BlockCipherAdapter`]/[`CryptoRandom`] in the
/// primitives layer those traits already define; today only `rng` is
/// threaded into the header engine (`cipher_factory` documents the seam
/// for a future caller, since V1/V2/V3 each hardcode which cipher they
/// use and don't currently accept a substitute — see DESIGN.md).
pub struct EngineConfig {
    pub cipher_factory: Box<dyn BlockCipherFactory>,
    pub rng: Box<dyn CryptoRandom>,
    pub adapter: Box<dyn ResourceAdapter>,
    pub default_iterations: u32,
    pub max_iterations: u32,
    pub default_charset: Charset,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cipher_factory: Box::new(TwofishFactory),
            rng: Box::new(OsRandom),
            adapter: Box::new(FilesystemAdapter),
            default_iterations: DEFAULT_ITERATIONS,
            max_iterations: MAX_ITERATIONS,
            default_charset: Charset::Utf8,
        }
    }
}

/// Outcome of [`File::load`] — a sum type rather than an exception, per
/// spec.md §9's redesign note on turning control-flow exceptions into
/// ordinary return values.
pub enum LoadOutcome {
    Opened(File),
    WrongPassword,
    WrongVersion(u8),
    Unsupported(u8),
}

/// Load/save orchestration over a [`ResourceAdapter`]-backed path.
pub struct File {
    pub records: RecordList,
    pub header_fields: HeaderFieldList,
    pub source_format: u8,
    pub iterations: u32,
    pub options: Option<String>,
    pub charset: Charset,
    /// Whether the V3 trailer HMAC matched the computed digest at load
    /// time. Always `true` for V1/V2 (no trailer to check) and for a
    /// freshly constructed, never-loaded `File`.
    pub checksum_ok: bool,
    /// Set when a load had to take a benign-recovery path (regenerated a
    /// record UUID); the next save renames the previous target to
    /// `.old` rather than overwriting it outright.
    pub preserve_old: bool,
    config: EngineConfig,
}

impl File {
    /// A fresh, empty V3 database ready to accept records and be saved.
    pub fn new(config: EngineConfig) -> Self {
        let default_iterations = config.default_iterations;
        let default_charset = config.default_charset;
        File {
            records: RecordList::new(),
            header_fields: HeaderFieldList::new(),
            source_format: VERSION_V3,
            iterations: default_iterations,
            options: None,
            charset: default_charset,
            checksum_ok: true,
            preserve_old: false,
            config,
        }
    }

    /// Opens `path` with `passphrase`, restricted to `version`
    /// (`ANY_VERSION` tries every known dialect). Follows spec.md §4.9's
    /// load algorithm: open, populate metadata, stream records, then
    /// compare the trailer HMAC and record `checksum_ok`.
    pub fn load(path: &str, passphrase: &[u8], version: u8, config: EngineConfig) -> Result<LoadOutcome> {
        let source = config.adapter.open_read(path)?;
        let mut socket = HeaderSocket::new(source)?;

        debug!(path, version, "attempting to open database");
        match socket.attempt_open(passphrase, version)? {
            OpenOutcome::WrongPassword => return Ok(LoadOutcome::WrongPassword),
            OpenOutcome::WrongVersion(found) => return Ok(LoadOutcome::WrongVersion(found)),
            OpenOutcome::Unsupported(v) => return Ok(LoadOutcome::Unsupported(v)),
            OpenOutcome::Opened => {}
        }

        let format = socket.version().expect("an opened socket always reports its dialect");
        let iterations = socket.iterations().expect("an opened socket always reports its iteration count");
        let charset = socket.charset().expect("an opened socket always reports its charset");
        let options = socket.options().map(str::to_string);
        let header_fields = socket.header_fields().cloned().unwrap_or_default();
        let expected_trailer = socket.expected_trailer();

        let mut reader = socket.raw_field_reader()?;
        let mut known_ids = HashSet::new();
        let decoded = record_codec::decode_all(&mut reader, format, &mut known_ids)?;
        let computed_trailer = reader.finish();
        let checksum_ok = verify_trailer(computed_trailer, expected_trailer);
        if !checksum_ok {
            warn!(path, "trailer checksum did not match on load");
        }

        let mut records = RecordList::new();
        if let Some(file_uuid) = header_fields.file_uuid() {
            records.set_id(file_uuid);
        }

        let mut preserve_old = false;
        for decoded_record in decoded {
            preserve_old |= decoded_record.needs_preserve_old;
            records
                .add(&decoded_record.record)
                .expect("decode_all guarantees unique ids across one load");
        }
        if preserve_old {
            debug!(path, "marking file preserve-old after a benign recovery during load");
        }

        Ok(LoadOutcome::Opened(File {
            records,
            header_fields,
            source_format: format,
            iterations,
            options,
            charset,
            checksum_ok,
            preserve_old,
            config,
        }))
    }

    /// Saves to `path` at the file's current `source_format`.
    pub fn save(&mut self, path: &str, passphrase: &[u8]) -> Result<()> {
        let version = self.source_format;
        self.save_as(path, passphrase, version)
    }

    /// Saves to `path`, rewriting to `version` if it differs from
    /// `source_format` (triggering `.old` preservation per step 4 below).
    ///
    /// Safe-swap protocol (spec.md §4.9):
    /// 1. If target exists, is non-empty, and deletable: write to
    ///    `{target}.temp`; otherwise write straight to `path`.
    /// 2. On success, delete the original and rename `.temp` into place.
    /// 3. If the rename fails, fall back to copy-then-delete.
    /// 4. If `preserve_old` is set or the format is changing, the
    ///    previous target is renamed to `{target}.old` before step 1.
    /// 5. Every exit path leaves either the original or `.temp` on disk
    ///    — never both missing.
    pub fn save_as(&mut self, path: &str, passphrase: &[u8], version: u8) -> Result<()> {
        let temp_path = format!("{path}.temp");
        let old_path = format!("{path}.old");

        let target_exists = self.config.adapter.exists(path);
        let format_changed = target_exists && self.source_format != version;

        if target_exists && (self.preserve_old || format_changed) {
            debug!(path, old_path, "preserving previous revision before safe-swap save");
            self.config.adapter.rename(path, &old_path);
        }

        let use_temp = target_exists && self.config.adapter.length(path) > 0 && self.config.adapter.can_delete(path);
        let write_target: &str = if use_temp { &temp_path } else { path };

        self.write_to(write_target, passphrase, version)?;

        if use_temp {
            if !self.config.adapter.delete(path) {
                warn!(path, "could not delete original ahead of safe-swap rename");
                return Err(Error::IllegalState("safe-swap save: original could not be removed; .temp left in place"));
            }
            if !self.config.adapter.rename(&temp_path, path) {
                warn!(path, "safe-swap rename failed, falling back to copy");
                let copied = copy_via_adapter(&*self.config.adapter, &temp_path, path)?;
                if !copied {
                    return Err(Error::IllegalState("safe-swap save: copy fallback failed; .temp left in place"));
                }
                self.config.adapter.delete(&temp_path);
            }
        }

        self.source_format = version;
        self.preserve_old = false;
        Ok(())
    }

    fn write_to(&mut self, path: &str, passphrase: &[u8], version: u8) -> Result<()> {
        let sink = self.config.adapter.open_write(path)?;
        let params = HeaderWriteParams {
            version,
            passphrase,
            iterations: self.iterations.clamp(1, self.config.max_iterations),
            charset: self.charset,
        };

        let mut opened = header::write_header(sink, &params, &*self.config.rng)?;
        let records = self.records.all_records();

        if version == VERSION_V3 {
            for field in self.header_fields.iter() {
                opened.field_writer.write_field(field.field_type, field.payload())?;
            }
            opened.field_writer.write_field(crate::field::END_OF_RECORD, &[])?;
        }

        record_codec::encode_all(&mut opened.field_writer, version, &records)?;
        opened.field_writer.finish()?;
        debug!(path, version, record_count = records.len(), "wrote database");
        Ok(())
    }
}
