//! Keyed block functions and the suites that parameterize a counter engine.
//!
//! A [`CipherSuite`] fixes everything the counter engine needs to know about
//! its primitive: counter width, how many counter blocks are enciphered per
//! call, key lengths, and the digest used to fold a short reseed into the
//! existing key.

use sha2::{Digest, Sha256};

use super::EngineError;

/// Context string for stretching 16-byte keys to BLAKE3's 32-byte key size.
const SHORT_KEY_CONTEXT: &str = "entropy-ctr 2026-01-01 blake3 counter key expansion";

/// A keyed function applied to consecutive counter blocks.
pub trait BlockCipher: Send {
    /// Installs a new key, replacing the previous one.
    fn set_key(&mut self, key: &[u8]) -> Result<(), EngineError>;

    /// Enciphers `input` (a whole number of counter blocks) into `output`.
    ///
    /// Both slices have the same length.
    fn encipher(&mut self, input: &[u8], output: &mut [u8]);
}

/// Constants and constructors for one instantiation of the counter engine.
pub trait CipherSuite: Send + Sync + 'static {
    /// Block function used by engines of this suite.
    type Cipher: BlockCipher;

    /// Width of the counter, and of each enciphered block, in bytes.
    const COUNTER_SIZE_BYTES: usize;
    /// Counter blocks enciphered per generation.
    const BLOCKS_AT_ONCE: usize;
    /// Longest key the cipher accepts.
    const MAX_KEY_LENGTH_BYTES: usize;
    /// Shortest seed accepted at construction.
    const MIN_SEED_LENGTH_BYTES: usize;
    /// Longest seed accepted: a full key plus a full counter.
    const MAX_TOTAL_SEED_LENGTH_BYTES: usize = Self::MAX_KEY_LENGTH_BYTES + Self::COUNTER_SIZE_BYTES;
    /// Bytes of output produced per generation.
    const BYTES_AT_ONCE: usize = Self::COUNTER_SIZE_BYTES * Self::BLOCKS_AT_ONCE;

    /// How many of `input_len` seed bytes become the key.
    fn key_length(input_len: usize) -> usize;

    /// Creates an unkeyed cipher.
    fn new_cipher() -> Self::Cipher;

    /// Digest used to compress an extended seed down to key size.
    fn digest(input: &[u8]) -> Vec<u8>;
}

/// Keyed BLAKE3 in counter mode, SHA-256 for seed extension.
///
/// Each 32-byte counter block is mapped through `blake3::keyed_hash`. Keys
/// may be 16 or 32 bytes; short keys are stretched with `blake3::derive_key`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Suite;

impl CipherSuite for Blake3Suite {
    type Cipher = Blake3Cipher;

    const COUNTER_SIZE_BYTES: usize = blake3::OUT_LEN;
    const BLOCKS_AT_ONCE: usize = 4;
    const MAX_KEY_LENGTH_BYTES: usize = blake3::KEY_LEN;
    const MIN_SEED_LENGTH_BYTES: usize = 16;

    fn key_length(input_len: usize) -> usize {
        if input_len >= blake3::KEY_LEN {
            blake3::KEY_LEN
        } else {
            16
        }
    }

    fn new_cipher() -> Blake3Cipher {
        Blake3Cipher::default()
    }

    fn digest(input: &[u8]) -> Vec<u8> {
        Sha256::digest(input).to_vec()
    }
}

/// Block function for [`Blake3Suite`].
#[derive(Default)]
pub struct Blake3Cipher {
    key: [u8; blake3::KEY_LEN],
}

impl BlockCipher for Blake3Cipher {
    fn set_key(&mut self, key: &[u8]) -> Result<(), EngineError> {
        self.key = match key.len() {
            blake3::KEY_LEN => {
                let mut full = [0u8; blake3::KEY_LEN];
                full.copy_from_slice(key);
                full
            }
            16 => blake3::derive_key(SHORT_KEY_CONTEXT, key),
            length => return Err(EngineError::InvalidKey { length }),
        };
        Ok(())
    }

    fn encipher(&mut self, input: &[u8], output: &mut [u8]) {
        for (block_in, block_out) in input
            .chunks(blake3::OUT_LEN)
            .zip(output.chunks_mut(blake3::OUT_LEN))
        {
            let hash = blake3::keyed_hash(&self.key, block_in);
            block_out.copy_from_slice(&hash.as_bytes()[..block_out.len()]);
        }
    }
}

impl std::fmt::Debug for Blake3Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blake3Cipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_rule() {
        assert_eq!(Blake3Suite::key_length(16), 16);
        assert_eq!(Blake3Suite::key_length(31), 16);
        assert_eq!(Blake3Suite::key_length(32), 32);
        assert_eq!(Blake3Suite::key_length(64), 32);
    }

    #[test]
    fn test_suite_constants() {
        assert_eq!(Blake3Suite::MAX_TOTAL_SEED_LENGTH_BYTES, 64);
        assert_eq!(Blake3Suite::BYTES_AT_ONCE, 128);
    }

    #[test]
    fn test_rejects_odd_key_length() {
        let mut cipher = Blake3Suite::new_cipher();
        assert!(matches!(
            cipher.set_key(&[0u8; 20]),
            Err(EngineError::InvalidKey { length: 20 })
        ));
    }

    #[test]
    fn test_short_and_long_keys_differ() {
        let input = [0u8; 32];
        let mut short = Blake3Suite::new_cipher();
        short.set_key(&[7u8; 16]).unwrap();
        let mut long = Blake3Suite::new_cipher();
        long.set_key(&[7u8; 32]).unwrap();

        let mut out_short = [0u8; 32];
        let mut out_long = [0u8; 32];
        short.encipher(&input, &mut out_short);
        long.encipher(&input, &mut out_long);
        assert_ne!(out_short, out_long);
    }

    #[test]
    fn test_blocks_enciphered_independently() {
        let mut cipher = Blake3Suite::new_cipher();
        cipher.set_key(&[1u8; 32]).unwrap();

        let mut input = [0u8; 64];
        input[31] = 1;
        input[63] = 1;
        let mut output = [0u8; 64];
        cipher.encipher(&input, &mut output);
        assert_eq!(output[..32], output[32..]);
    }

    #[test]
    fn test_digest_is_sha256() {
        let digest = Blake3Suite::digest(b"abc");
        assert_eq!(digest.len(), 32);
        assert_eq!(digest[..4], [0xba, 0x78, 0x16, 0xbf]);
    }
}
