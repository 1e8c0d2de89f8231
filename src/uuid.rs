use serde::{Deserialize, Serialize};
use std::fmt;

/// A 16-byte UUID identifying a record or a record list.
///
/// Thin newtype over [`uuid::Uuid`] so the public API's field-framing code
/// (which always deals in raw 16-byte arrays, per the on-disk UUID field)
/// isn't tied to whichever `uuid` crate version an embedder happens to use.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uuid128(uuid::Uuid);

impl Uuid128 {
    /// A fresh random (v4) UUID.
    pub fn new_random() -> Self {
        Uuid128(uuid::Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Uuid128(uuid::Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated())
    }
}

impl fmt::Display for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated())
    }
}
