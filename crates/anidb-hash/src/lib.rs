//! ed2k content hashing.
//!
//! The ed2k identity of a file is a two-level MD4 construction: the file is
//! split into fixed-size chunks, each chunk is hashed with MD4, and — unless
//! there is exactly one chunk — the concatenation of those digests is hashed
//! with MD4 again. See `spec.md` §4.1 for the exact rule.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use md4::{Digest, Md4};
use rayon::prelude::*;

/// Chunk boundary used by the ed2k construction, in bytes.
pub const CHUNK_SIZE: u64 = 9_728_000;

/// Below this chunk count, hashing runs on the calling thread: the overhead
/// of handing work to the pool outweighs the saving for small files.
const PARALLEL_THRESHOLD_CHUNKS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The hashed identity of a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    /// 32-character lowercase hex ed2k digest.
    pub ed2k: String,
    pub size: u64,
}

/// Hashes a file on disk, reading it in `CHUNK_SIZE`-byte pieces.
///
/// Chunks are read sequentially (I/O is not parallelised); once all chunks
/// are in memory, their MD4 digests are computed in parallel when there are
/// enough of them to be worth it.
pub fn hash_file(path: impl AsRef<Path>) -> Result<FileHash, HashError> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|source| HashError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let size = file
        .metadata()
        .map_err(|source| HashError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    let chunks = chunk_count(size);
    let mut raw_chunks: Vec<Vec<u8>> = Vec::with_capacity(chunks);
    for index in 0..chunks {
        let len = chunk_len(size, index) as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(|source| HashError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        raw_chunks.push(buf);
    }

    Ok(FileHash {
        ed2k: hex::encode(ed2k_of_chunks(&raw_chunks)),
        size,
    })
}

/// Computes the ed2k digest of data already split into chunks, in the
/// caller's chosen order. Exposed separately from [`hash_file`] so the
/// chunking rule can be exercised without touching the filesystem.
pub fn ed2k_of_chunks(chunks: &[Vec<u8>]) -> [u8; 16] {
    let digests: Vec<[u8; 16]> = if chunks.len() <= PARALLEL_THRESHOLD_CHUNKS {
        chunks.iter().map(|c| md4_digest(c)).collect()
    } else {
        chunks.par_iter().map(|c| md4_digest(c)).collect()
    };
    combine(digests)
}

/// Computes the ed2k digest of an in-memory buffer, splitting it on the
/// standard chunk boundary. Convenient for tests and for callers that
/// already hold the whole file in memory.
pub fn ed2k_of_bytes(data: &[u8]) -> String {
    let size = data.len() as u64;
    let chunks: Vec<Vec<u8>> = (0..chunk_count(size))
        .map(|index| {
            let start = index as u64 * CHUNK_SIZE;
            let end = start + chunk_len(size, index);
            data[start as usize..end as usize].to_vec()
        })
        .collect();
    hex::encode(ed2k_of_chunks(&chunks))
}

fn md4_digest(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md4::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn combine(digests: Vec<[u8; 16]>) -> [u8; 16] {
    if digests.len() == 1 {
        digests[0]
    } else {
        let concatenated: Vec<u8> = digests.concat();
        md4_digest(&concatenated)
    }
}

fn chunk_count(size: u64) -> usize {
    if size == 0 {
        1
    } else {
        size.div_ceil(CHUNK_SIZE) as usize
    }
}

fn chunk_len(size: u64, index: usize) -> u64 {
    let start = index as u64 * CHUNK_SIZE;
    std::cmp::min(CHUNK_SIZE, size - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_hashes_as_md4_of_empty_string() {
        assert_eq!(ed2k_of_bytes(b""), hex::encode(md4_digest(b"")));
    }

    #[test]
    fn s1_hash_singleton() {
        // spec.md S1: "hello" -> db346d691d7acc4dc2625db19f9e3f52
        assert_eq!(ed2k_of_bytes(b"hello"), "db346d691d7acc4dc2625db19f9e3f52");
    }

    #[test]
    fn exactly_one_chunk_boundary_uses_single_digest_rule() {
        let data = vec![0x11u8; CHUNK_SIZE as usize];
        let expected = hex::encode(md4_digest(&data));
        assert_eq!(ed2k_of_bytes(&data), expected);
    }

    #[test]
    fn s2_hash_two_chunk() {
        let mut data = vec![0x00u8; CHUNK_SIZE as usize];
        data.extend(std::iter::repeat(0xFFu8).take(CHUNK_SIZE as usize));
        let d0 = md4_digest(&data[..CHUNK_SIZE as usize]);
        let d1 = md4_digest(&data[CHUNK_SIZE as usize..]);
        let expected = hex::encode(md4_digest(&[d0, d1].concat()));
        assert_eq!(ed2k_of_bytes(&data), expected);
    }

    #[test]
    fn hash_file_matches_in_memory_hash() {
        let data = vec![0x42u8; (CHUNK_SIZE as usize) + 17];
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();
        let result = hash_file(tmp.path()).unwrap();
        assert_eq!(result.size, data.len() as u64);
        assert_eq!(result.ed2k, ed2k_of_bytes(&data));
    }

    #[test]
    fn hash_is_deterministic() {
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        assert_eq!(ed2k_of_bytes(&data), ed2k_of_bytes(&data));
    }

    proptest::proptest! {
        #[test]
        fn prop_deterministic_and_single_chunk_rule(len in 0usize..2000) {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let a = ed2k_of_bytes(&data);
            let b = ed2k_of_bytes(&data);
            prop_assert_eq!(&a, &b);
            if (len as u64) <= CHUNK_SIZE {
                prop_assert_eq!(a, hex::encode(md4_digest(&data)));
            }
        }
    }
}
