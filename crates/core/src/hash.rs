use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Streams a dump file through SHA-256 without loading it into memory.
pub fn file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
