// src/bag/mod.rs

//! Bag packaging engine
//!
//! Turns a loaded [`Deposit`] into one archive. The write order is fixed and
//! every step hands the checksums of what it wrote to the next one:
//!
//! 1. payload files under `data/`, digested while they stream into the archive
//! 2. tag files produced by the metadata converters
//! 3. `bagit.txt`, `bag-info.txt` and every other source tag file under
//!    `metadata/` that no converter regenerated, copied unchanged
//! 4. one `manifest-<alg>.txt` per algorithm, listing step 1
//! 5. one `tagmanifest-<alg>.txt` per algorithm, listing steps 2 to 4
//!
//! Packaging only reads the deposit; state changes are the caller's business.

pub mod convert;
pub mod manifest;
pub mod writer;

pub use convert::{MetadataConverter, MetadataOutput, RenderMetadata, Vocabulary};
pub use manifest::ManifestEntry;
pub use writer::{AtomicBagWriter, output_file_name};

use crate::deposit::Deposit;
use crate::error::{Error, Result};
use crate::hash::{DigestAlgorithm, DigestReader, DigestSet, REQUIRED_ALGORITHMS, digest_bytes};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Tag files copied verbatim from the source bag
const BAG_DECLARATION_FILES: [&str; 2] = ["bagit.txt", "bag-info.txt"];

/// One file written into the archive together with its checksums
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    /// Bag-relative path
    pub path: String,
    pub size: u64,
    pub checksums: DigestSet,
}

/// Summary of one packaging run
#[derive(Debug, Clone, Default)]
pub struct PackagingReport {
    /// Payload files, in manifest order
    pub payload: Vec<WrittenFile>,
    /// Tag files listed in the tag manifests, in write order
    pub tag_files: Vec<WrittenFile>,
    /// Total bytes of all archive entries
    pub bytes_written: u64,
}

impl PackagingReport {
    /// Payload manifest entries for every algorithm
    pub fn manifest_entries(&self) -> Vec<ManifestEntry> {
        entries_of(&self.payload)
    }

    /// Tag manifest entries for every algorithm
    pub fn tag_manifest_entries(&self) -> Vec<ManifestEntry> {
        entries_of(&self.tag_files)
    }
}

fn entries_of(files: &[WrittenFile]) -> Vec<ManifestEntry> {
    files
        .iter()
        .flat_map(|f| {
            f.checksums.iter().map(move |(algorithm, digest)| ManifestEntry {
                path: f.path.clone(),
                algorithm: *algorithm,
                digest: digest.clone(),
            })
        })
        .collect()
}

/// Writes deposits as bags
pub struct BagPackager {
    algorithms: Vec<DigestAlgorithm>,
    converters: Vec<Box<dyn RenderMetadata>>,
    mtime: u64,
}

impl BagPackager {
    /// Packager for the required algorithms plus `extra_algorithms`
    pub fn new(extra_algorithms: &[DigestAlgorithm], converters: Vec<Box<dyn RenderMetadata>>) -> Self {
        let algorithms: BTreeSet<DigestAlgorithm> = REQUIRED_ALGORITHMS
            .iter()
            .chain(extra_algorithms)
            .copied()
            .collect();
        Self {
            algorithms: algorithms.into_iter().collect(),
            converters,
            mtime: writer::DEFAULT_MTIME,
        }
    }

    /// Timestamp used for every archive entry
    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    /// Algorithms every manifest is written for, sorted
    pub fn algorithms(&self) -> &[DigestAlgorithm] {
        &self.algorithms
    }

    /// Package `deposit` into a new archive at `output_path`
    ///
    /// The archive only appears at `output_path` when every step succeeded.
    pub fn package(&self, deposit: &Deposit, output_path: &Path) -> Result<PackagingReport> {
        let mut writer = AtomicBagWriter::create(output_path)?.with_mtime(self.mtime);
        match self.write(deposit, &mut writer) {
            Ok(report) => {
                writer.close()?;
                Ok(report)
            }
            Err(e) => {
                writer.poison(e.to_string());
                // close reports the poison; the original error is more useful
                let _ = writer.close();
                Err(e)
            }
        }
    }

    /// Write all entries of `deposit` into `writer`, in bag order
    pub fn write(&self, deposit: &Deposit, writer: &mut AtomicBagWriter) -> Result<PackagingReport> {
        info!(
            "Packaging deposit {} ({} payload files, algorithms: {})",
            deposit.id(),
            deposit.payload_files.len(),
            self.algorithms
                .iter()
                .map(DigestAlgorithm::name)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let payload = self.write_payload(deposit, writer)?;
        let mut tag_files = self.write_metadata(deposit, writer)?;
        let source_tag_files = self.write_source_tag_files(deposit, &tag_files, writer)?;
        tag_files.extend(source_tag_files);
        tag_files.extend(self.write_manifests(&payload, writer)?);
        self.write_tagmanifests(&tag_files, writer)?;

        Ok(PackagingReport {
            payload,
            tag_files,
            bytes_written: writer.bytes_written(),
        })
    }

    /// Step 1: stream the payload, computing only what was not precomputed
    fn write_payload(&self, deposit: &Deposit, writer: &mut AtomicBagWriter) -> Result<Vec<WrittenFile>> {
        let mut written = Vec::with_capacity(deposit.payload_files.len());

        for file in &deposit.payload_files {
            let source = deposit.bag_dir().join(&file.physical_path);
            let handle = File::open(&source)?;
            let size = handle.metadata()?.len();
            let missing = file.missing_algorithms(&self.algorithms);

            let mut reader = DigestReader::new(handle.take(size), &missing);
            let bag_path = file.bag_path();
            writer.append_reader(&bag_path, size, &mut reader)?;
            if reader.bytes_read() != size {
                return Err(Error::Io(std::io::Error::other(format!(
                    "{} changed size while being packaged ({} of {} bytes)",
                    source.display(),
                    reader.bytes_read(),
                    size
                ))));
            }

            let mut checksums: DigestSet = file
                .checksums
                .iter()
                .filter(|(algorithm, _)| self.algorithms.contains(*algorithm))
                .map(|(algorithm, digest)| (*algorithm, digest.to_lowercase()))
                .collect();
            let computed = reader.finish()?;
            debug!(
                "{}: {} bytes, reused {:?}, computed {:?}",
                bag_path,
                size,
                checksums.keys().collect::<Vec<_>>(),
                computed.keys().collect::<Vec<_>>()
            );
            checksums.extend(computed);

            written.push(WrittenFile {
                path: bag_path,
                size,
                checksums,
            });
        }

        Ok(written)
    }

    /// Step 2: converter outputs
    fn write_metadata(&self, deposit: &Deposit, writer: &mut AtomicBagWriter) -> Result<Vec<WrittenFile>> {
        let mut seen = BTreeSet::new();
        let mut written = Vec::new();

        for converter in &self.converters {
            for output in converter.render(deposit)? {
                if output.path.starts_with("data/")
                    || BAG_DECLARATION_FILES.contains(&output.path.as_str())
                    || manifest::manifest_algorithm(&output.path).is_some()
                    || manifest::is_tagmanifest(&output.path)
                {
                    return Err(Error::InvalidArgument(format!(
                        "converter output {} collides with a reserved bag path",
                        output.path
                    )));
                }
                if !seen.insert(output.path.clone()) {
                    return Err(Error::InvalidArgument(format!(
                        "metadata file {} produced twice",
                        output.path
                    )));
                }
                written.push(self.append_tag_file(writer, &output.path, &output.bytes)?);
            }
        }

        Ok(written)
    }

    /// Step 3: bag declaration, bag-info and the remaining source tag files, unchanged
    fn write_source_tag_files(
        &self,
        deposit: &Deposit,
        regenerated: &[WrittenFile],
        writer: &mut AtomicBagWriter,
    ) -> Result<Vec<WrittenFile>> {
        let mut written = Vec::with_capacity(deposit.metadata_files.len());
        for name in BAG_DECLARATION_FILES {
            let file = deposit.metadata_file(name).ok_or_else(|| {
                Error::load(deposit.bag_dir(), format!("{name} is missing"))
            })?;
            written.push(self.append_tag_file(writer, name, &file.content)?);
        }

        let regenerated: BTreeSet<&str> = regenerated.iter().map(|f| f.path.as_str()).collect();
        for (path, file) in &deposit.metadata_files {
            if BAG_DECLARATION_FILES.contains(&path.as_str()) || regenerated.contains(path.as_str()) {
                continue;
            }
            debug!("Carrying over source tag file {}", path);
            written.push(self.append_tag_file(writer, path, &file.content)?);
        }
        Ok(written)
    }

    /// Step 4: one payload manifest per algorithm
    fn write_manifests(&self, payload: &[WrittenFile], writer: &mut AtomicBagWriter) -> Result<Vec<WrittenFile>> {
        let mut written = Vec::with_capacity(self.algorithms.len());
        for algorithm in &self.algorithms {
            let content = render_for(*algorithm, payload)?;
            written.push(self.append_tag_file(writer, &algorithm.manifest_name(), content.as_bytes())?);
        }
        Ok(written)
    }

    /// Step 5: tag manifests over everything but the payload
    fn write_tagmanifests(&self, tag_files: &[WrittenFile], writer: &mut AtomicBagWriter) -> Result<()> {
        for algorithm in &self.algorithms {
            let content = render_for(*algorithm, tag_files)?;
            writer.append_bytes(&algorithm.tagmanifest_name(), content.as_bytes())?;
        }
        Ok(())
    }

    fn append_tag_file(&self, writer: &mut AtomicBagWriter, path: &str, bytes: &[u8]) -> Result<WrittenFile> {
        writer.append_bytes(path, bytes)?;
        Ok(WrittenFile {
            path: path.to_string(),
            size: bytes.len() as u64,
            checksums: digest_bytes(&self.algorithms, bytes),
        })
    }
}

fn render_for(algorithm: DigestAlgorithm, files: &[WrittenFile]) -> Result<String> {
    let mut lines = Vec::with_capacity(files.len());
    for file in files {
        let digest = file.checksums.get(&algorithm).ok_or_else(|| {
            Error::InvalidArgument(format!("no {algorithm} checksum for {}", file.path))
        })?;
        lines.push((file.path.as_str(), digest.as_str()));
    }
    Ok(manifest::render_manifest(lines))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(path: &str, md5: &str) -> WrittenFile {
        let mut checksums = DigestSet::new();
        checksums.insert(DigestAlgorithm::Md5, md5.to_string());
        WrittenFile {
            path: path.to_string(),
            size: 0,
            checksums,
        }
    }

    #[test]
    fn test_algorithms_always_include_required() {
        let packager = BagPackager::new(&[DigestAlgorithm::Sha512, DigestAlgorithm::Md5], Vec::new());
        assert_eq!(
            packager.algorithms(),
            &[DigestAlgorithm::Md5, DigestAlgorithm::Sha256, DigestAlgorithm::Sha512]
        );
    }

    #[test]
    fn test_render_for_keeps_order() {
        let files = vec![written("data/b.txt", "bb"), written("data/a.txt", "aa")];
        assert_eq!(
            render_for(DigestAlgorithm::Md5, &files).unwrap(),
            "bb  data/b.txt\naa  data/a.txt\n"
        );
        assert!(render_for(DigestAlgorithm::Sha256, &files).is_err());
    }

    #[test]
    fn test_report_entries() {
        let report = PackagingReport {
            payload: vec![written("data/a.txt", "aa")],
            tag_files: vec![written("bagit.txt", "bb"), written("bag-info.txt", "cc")],
            bytes_written: 0,
        };
        assert_eq!(report.manifest_entries().len(), 1);
        let tags = report.tag_manifest_entries();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().all(|e| !e.path.starts_with("data/")));
    }
}
