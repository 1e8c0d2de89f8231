//! Fixed-size encrypted block reader/writer over a byte I/O, with one
//! block of read-ahead so end-of-stream can be detected before the caller
//! asks for more data than remains.
use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::primitives::{BlockCipherAdapter, CbcState};

pub struct BlockStreamReader<R> {
    inner: R,
    block_size: usize,
    cipher: Box<dyn BlockCipherAdapter>,
    cbc: CbcState,
    peeked: Option<Vec<u8>>,
}

impl<R: Read> BlockStreamReader<R> {
    pub fn new(mut inner: R, cipher: Box<dyn BlockCipherAdapter>, iv: Vec<u8>) -> Result<Self> {
        let block_size = cipher.block_size();
        let peeked = Self::try_read_block(&mut inner, block_size)?;
        let mut cbc = CbcState::new(iv);
        let peeked = match peeked {
            Some(mut block) => {
                cbc.decrypt_blocks(&*cipher, &mut block)?;
                Some(block)
            }
            None => None,
        };

        Ok(BlockStreamReader {
            inner,
            block_size,
            cipher,
            cbc,
            peeked,
        })
    }

    fn try_read_block(inner: &mut R, block_size: usize) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; block_size];
        let mut filled = 0;
        loop {
            match inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
            if filled == block_size {
                break;
            }
        }

        if filled == 0 {
            Ok(None)
        } else if filled == block_size {
            Ok(Some(buf))
        } else {
            Err(Error::CorruptStream("short block mid-stream"))
        }
    }

    fn refill(&mut self) -> Result<()> {
        match Self::try_read_block(&mut self.inner, self.block_size)? {
            Some(mut block) => {
                self.cbc.decrypt_blocks(&*self.cipher, &mut block)?;
                self.peeked = Some(block);
            }
            None => self.peeked = None,
        }
        Ok(())
    }

    pub fn has_more(&self) -> bool {
        self.peeked.is_some()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns exactly `n * block_size` cleartext bytes, or `UnexpectedEof`.
    pub fn read_blocks(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n * self.block_size);
        for _ in 0..n {
            let block = self.peeked.take().ok_or(Error::UnexpectedEof)?;
            out.extend_from_slice(&block);
            self.refill()?;
        }
        Ok(out)
    }
}

pub struct BlockStreamWriter<'a, W> {
    inner: W,
    block_size: usize,
    cipher: Box<dyn BlockCipherAdapter>,
    cbc: CbcState,
    rng: &'a dyn crate::primitives::CryptoRandom,
}

impl<'a, W: Write> BlockStreamWriter<'a, W> {
    pub fn new(
        inner: W,
        cipher: Box<dyn BlockCipherAdapter>,
        iv: Vec<u8>,
        rng: &'a dyn crate::primitives::CryptoRandom,
    ) -> Self {
        let block_size = cipher.block_size();
        BlockStreamWriter {
            inner,
            block_size,
            cipher,
            cbc: CbcState::new(iv),
            rng,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Encrypts and writes `data`, zero-padding the tail to a block
    /// boundary first. Callers that need random (not zero) padding, such
    /// as field framing, must pad before calling this.
    pub fn write_blocks(&mut self, data: &[u8]) -> Result<()> {
        let mut padded = data.to_vec();
        let remainder = padded.len() % self.block_size;
        if remainder != 0 {
            padded.resize(padded.len() + (self.block_size - remainder), 0);
        }

        self.cbc.encrypt_blocks(&*self.cipher, &mut padded)?;
        self.inner.write_all(&padded)?;
        Ok(())
    }

    /// A scratch buffer of cryptographic random bytes, for field padding.
    pub fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.rng.next_bytes(&mut buf);
        buf
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}
