//! Digest-based partitioner.

use crate::partitioner::traits::Partitioner;
use crate::token::Token;

/// MD5 partitioner: the first four bytes of the digest, big-endian.
#[derive(Clone, Copy, Debug, Default)]
pub struct Md5Partitioner;

impl Partitioner for Md5Partitioner {
    fn partition(&self, key: &[u8]) -> Token {
        let digest = md5::compute(key);
        Token(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
    }

    fn name(&self) -> &'static str {
        "Md5Partitioner"
    }
}
