//! Client-side proof-of-work for registration (spec §4.10):
//!
//! > `ComputeProofOfWork(pool_size, salt, pw_suffix, max_hash)` returns
//! > `pool_size` numbers `{n_1 .. n_p}` such that for each `n_i`:
//! > `hash(method, salt || n_i || pw_suffix) < max_hash`.
//!
//! `PowMethod::Crc32` is the only method this client speaks; the registrar
//! picks the method and the client rejects anything else (§4.10 edge case:
//! unknown PoW method aborts registration).

use thiserror::Error;

use aether_proto::PowMethod;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PowError {
    #[error("registrar requested an unsupported proof-of-work method: {0:?}")]
    UnsupportedMethod(PowMethod),
    #[error("proof-of-work pool did not satisfy the hash threshold")]
    ThresholdNotMet,
    #[error("proof-of-work pool size mismatch: expected {expected}, got {actual}")]
    PoolSizeMismatch { expected: u16, actual: usize },
}

fn hash_candidate(salt: &[u8], n: u64, pw_suffix: &[u8]) -> u64 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(salt);
    hasher.update(&n.to_be_bytes());
    hasher.update(pw_suffix);
    hasher.finalize() as u64
}

/// Finds one `n` satisfying `hash(salt || n || pw_suffix) < max_hash`,
/// scanning from `start` upward. Returns the winning `n` and the next
/// unused candidate so a caller computing a whole pool never reuses one.
fn find_one(salt: &[u8], pw_suffix: &[u8], max_hash: u64, start: u64) -> (u64, u64) {
    let mut n = start;
    loop {
        if hash_candidate(salt, n, pw_suffix) < max_hash {
            return (n, n + 1);
        }
        n += 1;
    }
}

/// Computes a full pool of `pool_size` proof-of-work numbers.
pub fn compute(
    method: PowMethod,
    pool_size: u16,
    salt: &[u8],
    pw_suffix: &[u8],
    max_hash: u64,
) -> Result<Vec<u64>, PowError> {
    if method != PowMethod::Crc32 {
        return Err(PowError::UnsupportedMethod(method));
    }
    let mut pool = Vec::with_capacity(pool_size as usize);
    let mut cursor = 0u64;
    for _ in 0..pool_size {
        let (n, next) = find_one(salt, pw_suffix, max_hash, cursor);
        pool.push(n);
        cursor = next;
    }
    Ok(pool)
}

/// Verifies a previously computed pool (used in tests and by a party
/// checking its own work before submitting it).
pub fn verify(
    method: PowMethod,
    pool: &[u64],
    salt: &[u8],
    pw_suffix: &[u8],
    max_hash: u64,
) -> Result<(), PowError> {
    if method != PowMethod::Crc32 {
        return Err(PowError::UnsupportedMethod(method));
    }
    if pool.iter().all(|&n| hash_candidate(salt, n, pw_suffix) < max_hash) {
        Ok(())
    } else {
        Err(PowError::ThresholdNotMet)
    }
}
