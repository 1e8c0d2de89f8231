/// Text encoding used to marshal [`crate::secret::SecretString`] contents
/// and V1/V2 record fields to bytes.
///
/// V3 is always UTF-8. V2 is UTF-8 only when its option string carries the
/// `B 24 1` marker (see [`crate::header`]); otherwise it falls back to the
/// platform default the original Windows client used, which this crate
/// models as Latin-1 since that is the only other charset the reference
/// option string distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
}

impl Charset {
    pub fn encode(&self, s: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => s.as_bytes().to_vec(),
            Charset::Latin1 => s.chars().map(|c| c as u32 as u8).collect(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

impl Default for Charset {
    fn default() -> Self {
        Charset::Utf8
    }
}
