use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::Hasher;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::Rid;

/// Fixed-width key type stored in hash index pages.
///
/// The closed set of implementors (`i32` and `GenericKey<N>`) mirrors the
/// widths the execution layer materializes index keys at.
pub trait IndexKey: Copy + PartialEq + Debug + Send + Sync + 'static {
    /// Serialized width in bytes
    const SIZE: usize;

    fn write_to(&self, buf: &mut [u8]);

    fn from_bytes(buf: &[u8]) -> Self;

    /// Stable 64-bit fingerprint of the key. The hash table keeps only
    /// the low 32 bits for directory addressing.
    fn fingerprint(&self) -> u64;
}

/// Fixed-width value type stored alongside a key
pub trait IndexValue: Copy + PartialEq + Debug + Send + Sync + 'static {
    /// Serialized width in bytes
    const SIZE: usize;

    fn write_to(&self, buf: &mut [u8]);

    fn from_bytes(buf: &[u8]) -> Self;
}

fn fingerprint_bytes(bytes: &[u8]) -> u64 {
    // SipHash with the default (zero) keys: stable within a process,
    // which is all directory addressing needs
    let mut hasher = DefaultHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

/// Opaque fixed-width key, the index-side image of whatever column bytes
/// the execution layer handed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn new(data: [u8; N]) -> Self {
        Self { data }
    }

    /// Build a key from a prefix of `bytes`, zero-padded to width
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }
}

impl<const N: usize> IndexKey for GenericKey<N> {
    const SIZE: usize = N;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.data);
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let mut data = [0u8; N];
        data.copy_from_slice(&buf[..N]);
        Self { data }
    }

    fn fingerprint(&self) -> u64 {
        fingerprint_bytes(&self.data)
    }
}

impl IndexKey for i32 {
    const SIZE: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[..4], *self);
    }

    fn from_bytes(buf: &[u8]) -> Self {
        LittleEndian::read_i32(&buf[..4])
    }

    fn fingerprint(&self) -> u64 {
        fingerprint_bytes(&self.to_le_bytes())
    }
}

impl IndexValue for i32 {
    const SIZE: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[..4], *self);
    }

    fn from_bytes(buf: &[u8]) -> Self {
        LittleEndian::read_i32(&buf[..4])
    }
}

impl IndexValue for Rid {
    const SIZE: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[..4], self.page_id);
        LittleEndian::write_u32(&mut buf[4..8], self.slot);
    }

    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_id: LittleEndian::read_i32(&buf[..4]),
            slot: LittleEndian::read_u32(&buf[4..8]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i32_roundtrip() {
        let mut buf = [0u8; 4];
        IndexKey::write_to(&(-12345i32), &mut buf);
        assert_eq!(<i32 as IndexKey>::from_bytes(&buf), -12345);
    }

    #[test]
    fn test_generic_key_roundtrip() {
        let key = GenericKey::<8>::from_slice(b"abc");
        let mut buf = [0u8; 8];
        key.write_to(&mut buf);
        assert_eq!(GenericKey::<8>::from_bytes(&buf), key);
    }

    #[test]
    fn test_rid_roundtrip() {
        let rid = Rid::new(42, 7);
        let mut buf = [0u8; 8];
        rid.write_to(&mut buf);
        assert_eq!(<Rid as IndexValue>::from_bytes(&buf), rid);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = 99i32.fingerprint();
        let b = 99i32.fingerprint();
        assert_eq!(a, b);
        assert_ne!(99i32.fingerprint(), 100i32.fingerprint());
    }
}
