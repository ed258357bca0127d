//! Deterministic seeds for content derivation.
//!
//! FNV-1a keeps seeds identical across runs and platforms, which the
//! randomized `DefaultHasher` does not.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(state: u64, bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(state, |state, &byte| (state ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
}

/// Seed for a fragment's content derivation: content length, the level
/// quantized to thousandths, and a configurable salt.
pub fn fragment_seed(char_count: usize, level_millis: u32, salt: u64) -> u64 {
    let state = fnv1a(FNV_OFFSET_BASIS, &(char_count as u64).to_le_bytes());
    let state = fnv1a(state, &level_millis.to_le_bytes());
    fnv1a(state, &salt.to_le_bytes())
}
