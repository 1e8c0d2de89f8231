//! Read, write, and manipulate Password Safe (V1/V2/V3) encrypted
//! password database files.
//!
//! This crate covers the three hard-engineering subsystems of the format:
//! the **file engine** (header parsing, key derivation, CBC block
//! streaming, field framing, integrity verification, safe write/swap), the
//! **record model** (a keyed collection with merge semantics, group-tree
//! operations, and change notification), and the **passphrase vault**
//! (an in-memory encrypted holder for secret strings). Storage access and
//! raw crypto primitives are each behind a narrow trait — [`ResourceAdapter`]
//! and [`primitives::BlockCipherAdapter`]/[`primitives::CryptoRandom`] —
//! so the engine itself never touches `std::fs` or a concrete cipher type
//! directly.
//!
//! [`File`] is the usual entry point: [`File::load`] opens an existing
//! database, [`File::save`] writes one back out through the safe-swap
//! protocol. The loaded [`RecordList`] is a plain keyed collection that can
//! be mutated, merged with another list, or queried by group independently
//! of any file on disk.

mod adapter;
mod blockstream;
mod charset;
mod error;
mod field;
mod fieldstream;
mod file;
mod header;
mod header_fields;
mod primitives;
mod record;
mod record_codec;
mod record_list;
mod secret;
mod uuid;

pub use adapter::{ByteSink, ByteSource, FilesystemAdapter, ResourceAdapter};
pub use charset::Charset;
pub use error::{Error, Result};
pub use field::RawField;
pub use file::{EngineConfig, File, LoadOutcome};
pub use header::{ANY_VERSION, DEFAULT_ITERATIONS, MAX_ITERATIONS, VERSION_V1, VERSION_V2, VERSION_V3};
pub use header_fields::HeaderFieldList;
pub use primitives::{
    BlockCipherAdapter, BlockCipherFactory, BlowfishAdapter, BlowfishFactory, CryptoRandom, OsRandom, TwofishAdapter,
    TwofishFactory,
};
pub use record::{GroupIndex, KeyboardShortcut, Record, RecordId};
pub use record_codec::DecodedRecord;
pub use record_list::{merge_modus, FileEvent, FileEventKind, ImportStatus, MergeOutcome, RecordList};
pub use secret::SecretString;
pub use uuid::Uuid128;
