//! Positional chunk I/O against a staging file.
//!
//! Chunks are written at `index * chunk_size`, so out-of-order arrival
//! needs no reassembly buffer: the file is its own assembly area, and a
//! resumed transfer simply fills in the holes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Writes `data` at `offset`, creating the file if needed. Regions
/// between out-of-order chunks stay as holes until their chunk lands.
pub fn write_chunk(path: &Path, offset: u64, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

/// Reads exactly `size` bytes at `offset`.
pub fn read_chunk(path: &Path, offset: u64, size: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// SHA-256 of the whole file as lowercase hex, computed streaming so
/// large transfers never load fully into memory.
pub fn file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
