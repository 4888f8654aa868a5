//! md5 content hashes for recorded artifacts
//!
//! Devices publish one `<file>.md5` sidecar next to every video they record,
//! containing the lowercase hex digest of the file. The node keeps the same
//! convention for its local copies so both sides can be compared by string.

use crate::error::{EthoError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental md5 hasher for data arriving in chunks
pub struct Md5Hasher {
    context: md5::Context,
    bytes: u64,
}

impl Md5Hasher {
    pub fn new() -> Self {
        Self {
            context: md5::Context::new(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.context.consume(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes consumed so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finish hashing and return the lowercase hex digest
    pub fn finalize(self) -> String {
        format!("{:x}", self.context.compute())
    }
}

impl Default for Md5Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the md5 hex digest of any readable source
pub fn compute_md5<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Md5Hasher::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Compute the md5 hex digest of a file
pub fn compute_file_md5(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_md5(&mut file)
}

/// Path of the `.md5` sidecar belonging to `path`
pub fn sidecar_path(path: impl AsRef<Path>) -> PathBuf {
    let mut name = path.as_ref().as_os_str().to_os_string();
    name.push(".md5");
    PathBuf::from(name)
}

/// Read the digest stored in the sidecar of `path`, if there is one
pub fn read_sidecar(path: impl AsRef<Path>) -> Result<Option<String>> {
    match std::fs::read_to_string(sidecar_path(path)) {
        Ok(content) => {
            let digest = content.split_whitespace().next().unwrap_or_default();
            if digest.is_empty() {
                Ok(None)
            } else {
                Ok(Some(digest.to_lowercase()))
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `digest` into the sidecar of `path`
pub fn write_sidecar(path: impl AsRef<Path>, digest: &str) -> Result<PathBuf> {
    let sidecar = sidecar_path(path);
    std::fs::write(&sidecar, digest)?;
    Ok(sidecar)
}

/// Fail with [`EthoError::ChecksumMismatch`] unless both digests agree
pub fn ensure_digest(expected: &str, actual: &str) -> Result<()> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(EthoError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
