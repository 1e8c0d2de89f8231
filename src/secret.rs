//! In-memory encrypted character sequence.
//!
//! Backed by [`secrets::SecretVec`], the same crate the teacher's
//! `secrets_vec::SecretBuffer` already uses for an appendable secret byte
//! buffer. `SecretString` stores UTF-16 code units little-endian in a
//! buffer padded out to a multiple of 16 bytes, per the on-disk convention
//! Password Safe uses for password fields held in memory.
use secrets::SecretVec;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

const ALIGN: usize = 16;

fn padded_byte_len(code_units: usize) -> usize {
    let raw = code_units * 2;
    raw.div_ceil(ALIGN) * ALIGN
}

/// An encrypted sequence of UTF-16 code units.
///
/// The cleartext form only ever exists in transient, zeroizing buffers
/// returned from [`SecretString::get_chars`]/[`SecretString::get_bytes`];
/// every internal consumer wipes those buffers once it is done with them.
pub struct SecretString {
    len: usize,
    buffer: Option<SecretVec<u8>>,
}

impl SecretString {
    /// An empty secret string. Marshals to an empty value.
    pub fn empty() -> Self {
        SecretString { len: 0, buffer: None }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Re-encrypts `src[off..off+len]`. Any previous buffer is replaced and,
    /// being a `SecretVec`, wiped on drop.
    pub fn set_from_chars(&mut self, src: &[u16], off: usize, len: usize) {
        if len == 0 {
            self.buffer = None;
            self.len = 0;
            return;
        }

        let mut secret = SecretVec::<u8>::zero(padded_byte_len(len));
        {
            let mut guard = secret.borrow_mut();
            for (i, unit) in src[off..off + len].iter().enumerate() {
                guard[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
            }
        }

        self.buffer = Some(secret);
        self.len = len;
    }

    pub fn set_from_str(&mut self, s: &str) {
        let units: Vec<u16> = s.encode_utf16().collect();
        let len = units.len();
        self.set_from_chars(&units, 0, len);
    }

    /// Decrypts and returns a transient, zeroizing buffer of code units.
    pub fn get_chars(&self) -> Zeroizing<Vec<u16>> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.len));
        if let Some(secret) = &self.buffer {
            let guard = secret.borrow();
            for i in 0..self.len {
                let unit = u16::from_le_bytes([guard[i * 2], guard[i * 2 + 1]]);
                out.push(unit);
            }
        }
        out
    }

    /// Decrypts and encodes to bytes under the given charset.
    pub fn get_bytes(&self, charset: crate::charset::Charset) -> Zeroizing<Vec<u8>> {
        let chars = self.get_chars();
        let s = String::from_utf16_lossy(&chars);
        Zeroizing::new(charset.encode(&s))
    }

    /// Constant-time equality over the decrypted contents. Both transient
    /// buffers are wiped before returning (`Zeroizing` does this on drop).
    pub fn equals(&self, other: &SecretString) -> bool {
        if self.len != other.len {
            return false;
        }
        let a = self.get_chars();
        let b = other.get_chars();
        let a_bytes: Vec<u8> = a.iter().flat_map(|u| u.to_le_bytes()).collect();
        let b_bytes: Vec<u8> = b.iter().flat_map(|u| u.to_le_bytes()).collect();
        a_bytes.ct_eq(&b_bytes).into()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        let chars = self.get_chars();
        let mut copy = SecretString::empty();
        let len = chars.len();
        copy.set_from_chars(&chars, 0, len);
        copy
    }
}

impl Default for SecretString {
    fn default() -> Self {
        SecretString::empty()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretString(<{} code units>)", self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_roundtrips_to_empty() {
        let s = SecretString::empty();
        assert!(s.is_empty());
        assert_eq!(s.get_chars().len(), 0);
    }

    #[test]
    fn set_and_get_roundtrip() {
        let mut s = SecretString::empty();
        s.set_from_str("abc");
        assert_eq!(s.len(), 3);
        let chars = s.get_chars();
        assert_eq!(String::from_utf16_lossy(&chars), "abc");
    }

    #[test]
    fn equals_is_content_based() {
        let mut a = SecretString::empty();
        a.set_from_str("hunter2");
        let mut b = SecretString::empty();
        b.set_from_str("hunter2");
        let mut c = SecretString::empty();
        c.set_from_str("hunter3");

        assert!(a.equals(&b));
        assert!(!a.equals(&c));
    }

    #[test]
    fn replacing_value_wipes_previous_buffer() {
        let mut s = SecretString::empty();
        s.set_from_str("first");
        s.set_from_str("second");
        assert_eq!(String::from_utf16_lossy(&s.get_chars()), "second");
    }
}
