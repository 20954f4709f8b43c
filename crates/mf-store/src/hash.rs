//! Content hashing for store keys.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use mf_core::{ContentHash, Result};
use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 64 * 1024;

/// SHA-256 of a file's contents, read in 64 KiB blocks.
pub fn hash_file(path: &Path) -> Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ContentHash::from_digest(&hasher.finalize()))
}

/// SHA-256 of an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    ContentHash::from_digest(&Sha256::digest(data))
}
