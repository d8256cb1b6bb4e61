// src/hash.rs

//! Digest algorithms and single-pass multi-digest streaming
//!
//! Bags carry one manifest per digest algorithm. The packager needs several
//! digests of every payload file while copying it into the output archive, so
//! [`DigestReader`] decorates any [`Read`] and feeds every chunk it hands out
//! to all requested hashers at once. Nothing is buffered beyond the caller's
//! read buffer.
//!
//! | Algorithm | Role |
//! |-----------|------|
//! | MD5 | Legacy manifests, kept for backward compatibility |
//! | SHA-256 | Primary fixity algorithm |
//! | SHA-512 | Optional extra manifest |

use crate::error::{Error, Result};
use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// Digest algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    /// MD5 (128-bit, legacy)
    Md5,
    /// SHA-256 (256-bit)
    Sha256,
    /// SHA-512 (512-bit)
    Sha512,
}

/// Algorithms every produced bag must carry manifests for
pub const REQUIRED_ALGORITHMS: [DigestAlgorithm; 2] = [DigestAlgorithm::Md5, DigestAlgorithm::Sha256];

/// Checksums of one file, keyed by algorithm
pub type DigestSet = BTreeMap<DigestAlgorithm, String>;

impl DigestAlgorithm {
    /// Name as used in manifest file names (`manifest-<name>.txt`)
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoded digest
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Payload manifest file name for this algorithm
    pub fn manifest_name(&self) -> String {
        format!("manifest-{}.txt", self.name())
    }

    /// Tag manifest file name for this algorithm
    pub fn tagmanifest_name(&self) -> String {
        format!("tagmanifest-{}.txt", self.name())
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(Error::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Incremental hasher for one algorithm
pub struct Hasher {
    algorithm: DigestAlgorithm,
    state: HasherState,
}

enum HasherState {
    Md5(Md5),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let state = match algorithm {
            DigestAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            DigestAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
        }
    }

    /// Finalize into a lowercase hex string
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Md5(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Sha512(h) => hex::encode(h.finalize()),
        }
    }

    #[inline]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }
}

/// Reader that computes several digests of everything read through it
///
/// The stream must be read to end-of-file exactly once before calling
/// [`DigestReader::finish`]. Calling `finish` earlier is a usage error and
/// returns [`Error::DigestIncomplete`] instead of a digest of a prefix.
/// `finish` consumes the reader, so a second pass over the same stream cannot
/// be expressed.
pub struct DigestReader<R> {
    inner: R,
    hashers: Vec<Hasher>,
    bytes_read: u64,
    exhausted: bool,
}

impl<R: Read> DigestReader<R> {
    /// Wrap `inner`, computing one digest per entry of `algorithms`
    ///
    /// Duplicate algorithms are ignored. An empty list is allowed and turns the
    /// reader into a plain byte counter.
    pub fn new(inner: R, algorithms: &[DigestAlgorithm]) -> Self {
        let mut hashers: Vec<Hasher> = Vec::with_capacity(algorithms.len());
        for &algorithm in algorithms {
            if !hashers.iter().any(|h| h.algorithm() == algorithm) {
                hashers.push(Hasher::new(algorithm));
            }
        }
        Self {
            inner,
            hashers,
            bytes_read: 0,
            exhausted: false,
        }
    }

    /// Number of bytes passed through so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Return the digests of the fully consumed stream
    pub fn finish(self) -> Result<DigestSet> {
        if !self.exhausted {
            return Err(Error::DigestIncomplete);
        }
        Ok(self
            .hashers
            .into_iter()
            .map(|h| (h.algorithm(), h.finalize()))
            .collect())
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            if !buf.is_empty() {
                self.exhausted = true;
            }
        } else {
            for hasher in &mut self.hashers {
                hasher.update(&buf[..n]);
            }
            self.bytes_read += n as u64;
        }
        Ok(n)
    }
}

/// Compute one digest of a byte slice
pub fn hash_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute several digests of a byte slice
pub fn digest_bytes(algorithms: &[DigestAlgorithm], data: &[u8]) -> DigestSet {
    algorithms
        .iter()
        .map(|&algorithm| (algorithm, hash_bytes(algorithm, data)))
        .collect()
}

/// Compute several digests of everything `reader` yields
pub fn hash_reader<R: Read>(algorithms: &[DigestAlgorithm], reader: R) -> Result<DigestSet> {
    let mut digest_reader = DigestReader::new(reader, algorithms);
    io::copy(&mut digest_reader, &mut io::sink())?;
    digest_reader.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_known_values() {
        assert_eq!(
            hash_bytes(DigestAlgorithm::Sha256, b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(
            hash_bytes(DigestAlgorithm::Md5, b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(hash_bytes(DigestAlgorithm::Sha512, b"").len(), 128);
    }

    #[test]
    fn test_digest_reader_matches_independent_digests() {
        let data = vec![7u8; 100_000];
        let algorithms = [DigestAlgorithm::Md5, DigestAlgorithm::Sha256, DigestAlgorithm::Sha512];
        let mut reader = DigestReader::new(Cursor::new(&data), &algorithms);
        let mut out = Vec::new();
        io::copy(&mut reader, &mut out).unwrap();
        assert_eq!(reader.bytes_read(), data.len() as u64);

        let digests = reader.finish().unwrap();
        assert_eq!(digests.len(), 3);
        for algorithm in algorithms {
            assert_eq!(digests[&algorithm], hash_bytes(algorithm, &data));
        }
        assert_eq!(out, data);
    }

    #[test]
    fn test_finish_before_eof_is_an_error() {
        let mut reader = DigestReader::new(Cursor::new(b"abcdef".to_vec()), &[DigestAlgorithm::Md5]);
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert!(matches!(reader.finish(), Err(Error::DigestIncomplete)));
    }

    #[test]
    fn test_empty_algorithm_list_counts_bytes() {
        let mut reader = DigestReader::new(Cursor::new(b"abc".to_vec()), &[]);
        io::copy(&mut reader, &mut io::sink()).unwrap();
        assert_eq!(reader.bytes_read(), 3);
        assert!(reader.finish().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_algorithms_collapse() {
        let digests = hash_reader(
            &[DigestAlgorithm::Sha256, DigestAlgorithm::Sha256],
            Cursor::new(b"x".to_vec()),
        )
        .unwrap();
        assert_eq!(digests.len(), 1);
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("MD5".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Md5);
        assert_eq!("sha-256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!("sha512".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha512);
        assert!("sha1".parse::<DigestAlgorithm>().is_err());
        assert_eq!(DigestAlgorithm::Md5.manifest_name(), "manifest-md5.txt");
        assert_eq!(DigestAlgorithm::Sha256.tagmanifest_name(), "tagmanifest-sha256.txt");
    }
}
