// src/deposit/loader.rs

//! Turning a deposit directory into a [`Deposit`]
//!
//! Expected layout:
//!
//! ```text
//! <deposit>/deposit.properties
//! <deposit>/<bag>/bagit.txt
//! <deposit>/<bag>/bag-info.txt
//! <deposit>/<bag>/manifest-<alg>.txt      (zero or more)
//! <deposit>/<bag>/original-filepaths.txt  (optional)
//! <deposit>/<bag>/metadata/dataset.xml
//! <deposit>/<bag>/metadata/files.xml
//! <deposit>/<bag>/data/**
//! ```
//!
//! Every problem found here is a non-retryable load error.

use super::bag_info::{self, BagInfo};
use super::metadata::{self, DatasetMetadata, FileMetadata};
use super::paths::{read_original_filepaths, sanitize_path};
use super::properties::{self, DepositProperties, PROPERTIES_FILE};
use super::{Deposit, DepositState, MetadataFile, PayloadFile, SourceFormat};
use crate::bag::manifest::{manifest_algorithm, parse_manifest};
use crate::error::{Error, Result};
use crate::hash::{DigestAlgorithm, DigestSet};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const DATASET_XML: &str = "metadata/dataset.xml";
const FILES_XML: &str = "metadata/files.xml";

/// Load the deposit stored in directory `path`
///
/// Read-only: loading the same directory twice yields equal models.
pub fn load_deposit(path: &Path) -> Result<Deposit> {
    if !path.is_dir() {
        return Err(Error::load(path, "not a directory"));
    }
    let id = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::load(path, "deposit directory has no usable name"))?
        .to_string();

    let props = DepositProperties::load(&path.join(PROPERTIES_FILE))?;
    let source_format = match props.get(properties::ORIGIN) {
        Some(origin) => origin
            .parse::<SourceFormat>()
            .map_err(|e| Error::load(path, e.to_string()))?,
        None => SourceFormat::default(),
    };

    let bag_dir = find_bag_dir(path)?;
    let metadata_files = read_metadata_files(&bag_dir)?;

    let bagit = tag_file(&metadata_files, "bagit.txt")
        .ok_or_else(|| Error::load(&bag_dir, "bagit.txt is missing"))?;
    let bagit = BagInfo::parse(bagit).map_err(|msg| Error::load(&bag_dir, format!("bagit.txt: {msg}")))?;
    if bagit.first(bag_info::BAGIT_VERSION).is_none() {
        return Err(Error::load(&bag_dir, "bagit.txt does not declare BagIt-Version"));
    }

    let bag_info = tag_file(&metadata_files, "bag-info.txt")
        .ok_or_else(|| Error::load(&bag_dir, "bag-info.txt is missing"))?;
    let bag_info = BagInfo::parse(bag_info)
        .map_err(|msg| Error::load(&bag_dir, format!("bag-info.txt: {msg}")))?;

    let dataset = match tag_file(&metadata_files, DATASET_XML) {
        Some(xml) => {
            let dataset = DatasetMetadata::parse(xml)
                .map_err(|e| Error::load(&bag_dir, format!("malformed {DATASET_XML}: {e}")))?;
            if dataset.title().is_none() {
                return Err(Error::load(&bag_dir, format!("{DATASET_XML} has no title")));
            }
            dataset
        }
        None if source_format == SourceFormat::Simple => DatasetMetadata::default(),
        None => return Err(Error::load(&bag_dir, format!("{DATASET_XML} is missing"))),
    };

    let files_metadata = match tag_file(&metadata_files, FILES_XML) {
        Some(xml) => Some(
            metadata::parse_files_xml(xml)
                .map_err(|e| Error::load(&bag_dir, format!("malformed {FILES_XML}: {e}")))?,
        ),
        None if source_format == SourceFormat::Simple => None,
        None => return Err(Error::load(&bag_dir, format!("{FILES_XML} is missing"))),
    };

    let payload_files = collect_payload(
        &bag_dir,
        source_format,
        files_metadata.as_deref(),
        dataset.access_rights.as_deref(),
    )?;

    let bag_id = props
        .get(properties::BAG_ID)
        .map(str::to_string)
        .unwrap_or_else(|| id.clone());
    let depositor_id = props
        .get(properties::DEPOSITOR_ID)
        .ok_or_else(|| Error::load(path, format!("{} is not set", properties::DEPOSITOR_ID)))?
        .to_string();
    let doi = props
        .get(properties::DOI)
        .or_else(|| dataset.doi())
        .map(str::to_string);
    let nbn = props.get(properties::NBN).map(str::to_string);
    if source_format == SourceFormat::Migration && (doi.is_none() || nbn.is_none()) {
        return Err(Error::load(
            path,
            "migration deposits must carry both a DOI and an NBN",
        ));
    }
    let version = match props.get(properties::VAULT_VERSION) {
        Some(v) => Some(v.parse::<u32>().map_err(|_| {
            Error::load(path, format!("{} is not a number: {v}", properties::VAULT_VERSION))
        })?),
        None => None,
    };
    let state = match props.get(properties::STATE_LABEL) {
        Some(label) => label
            .parse::<DepositState>()
            .map_err(|e| Error::load(path, e.to_string()))?,
        None => DepositState::Submitted,
    };
    let state_message = props
        .get(properties::STATE_DESCRIPTION)
        .unwrap_or_default()
        .to_string();

    let is_version_of = bag_info.first(bag_info::IS_VERSION_OF).map(|v| {
        v.strip_prefix("urn:uuid:").unwrap_or(v).to_string()
    });
    // Without an explicit token, versions of one dataset share the first version's bag id
    let sword_token = props
        .get(properties::SWORD_TOKEN)
        .map(str::to_string)
        .unwrap_or_else(|| format!("sword:{}", is_version_of.as_deref().unwrap_or(&bag_id)));
    let created = bag_info.first(bag_info::CREATED).and_then(|c| {
        chrono::DateTime::parse_from_rfc3339(c)
            .map_err(|e| warn!("Deposit {}: ignoring unparsable Created '{}': {}", id, c, e))
            .ok()
    });

    debug!(
        "Loaded deposit {} ({} payload files, {} metadata files, format {:?})",
        id,
        payload_files.len(),
        metadata_files.len(),
        source_format
    );

    Ok(Deposit {
        id,
        dir: path.to_path_buf(),
        bag_dir,
        state,
        state_message,
        properties: props,
        bag_id,
        doi,
        nbn,
        version,
        depositor_id,
        sword_token,
        is_version_of,
        source_format,
        created,
        payload_files,
        metadata_files,
        bag_info,
        dataset,
    })
}

/// Locate the single bag directory inside a deposit
pub fn find_bag_dir(deposit_dir: &Path) -> Result<PathBuf> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(deposit_dir)
        .map_err(|e| Error::load(deposit_dir, format!("cannot list deposit: {e}")))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            candidates.push(entry.path());
        }
    }

    match candidates.len() {
        1 => {
            let bag_dir = candidates.remove(0);
            if !bag_dir.join("bagit.txt").is_file() {
                return Err(Error::load(
                    deposit_dir,
                    format!("{} is not a bag (no bagit.txt)", bag_dir.display()),
                ));
            }
            Ok(bag_dir)
        }
        n => Err(Error::load(
            deposit_dir,
            format!("expected exactly one bag directory, found {n}"),
        )),
    }
}

fn tag_file<'a>(files: &'a BTreeMap<String, MetadataFile>, path: &str) -> Option<&'a str> {
    files
        .get(path)
        .and_then(|f| std::str::from_utf8(&f.content).ok())
}

fn relative_path(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

/// Bag declaration files plus everything under `metadata/`
fn read_metadata_files(bag_dir: &Path) -> Result<BTreeMap<String, MetadataFile>> {
    let mut files = BTreeMap::new();

    for name in ["bagit.txt", "bag-info.txt"] {
        let path = bag_dir.join(name);
        if path.is_file() {
            let content = fs::read(&path)
                .map_err(|e| Error::load(&path, format!("cannot read: {e}")))?;
            files.insert(
                name.to_string(),
                MetadataFile {
                    path: name.to_string(),
                    content,
                },
            );
        }
    }

    let metadata_dir = bag_dir.join("metadata");
    if metadata_dir.is_dir() {
        for entry in WalkDir::new(&metadata_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::load(&metadata_dir, e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_path(bag_dir, entry.path()).ok_or_else(|| {
                Error::load(entry.path(), "metadata file name is not valid UTF-8")
            })?;
            let content = fs::read(entry.path())
                .map_err(|e| Error::load(entry.path(), format!("cannot read: {e}")))?;
            files.insert(rel.clone(), MetadataFile { path: rel, content });
        }
    }

    Ok(files)
}

/// Checksums declared in the source bag's payload manifests, by physical path
fn read_precomputed(bag_dir: &Path) -> Result<BTreeMap<String, DigestSet>> {
    let mut precomputed: BTreeMap<String, DigestSet> = BTreeMap::new();

    for entry in fs::read_dir(bag_dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else { continue };
        let Some(algorithm) = manifest_algorithm(name) else { continue };
        let algorithm = match algorithm.parse::<DigestAlgorithm>() {
            Ok(a) => a,
            Err(_) => {
                warn!("Ignoring {} in {}: unsupported algorithm", name, bag_dir.display());
                continue;
            }
        };

        let content = fs::read_to_string(entry.path())
            .map_err(|e| Error::load(entry.path(), format!("cannot read: {e}")))?;
        let entries =
            parse_manifest(&content).map_err(|msg| Error::load(entry.path(), msg))?;
        for (digest, path) in entries {
            if digest.len() != algorithm.hex_len() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::load(
                    entry.path(),
                    format!("malformed {algorithm} checksum for {path}"),
                ));
            }
            precomputed.entry(path).or_default().insert(algorithm, digest);
        }
    }

    Ok(precomputed)
}

fn collect_payload(
    bag_dir: &Path,
    source_format: SourceFormat,
    files_metadata: Option<&[FileMetadata]>,
    dataset_access: Option<&str>,
) -> Result<Vec<PayloadFile>> {
    let mut on_disk = BTreeSet::new();
    let data_dir = bag_dir.join("data");
    if data_dir.is_dir() {
        for entry in WalkDir::new(&data_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::load(&data_dir, e.to_string()))?;
            if entry.file_type().is_file() {
                let rel = relative_path(bag_dir, entry.path()).ok_or_else(|| {
                    Error::load(entry.path(), "payload file name is not valid UTF-8")
                })?;
                on_disk.insert(rel);
            }
        }
    }

    let original = read_original_filepaths(bag_dir)?;
    for physical in original.keys() {
        if !on_disk.contains(physical) {
            return Err(Error::load(
                bag_dir,
                format!("original-filepaths.txt lists {physical}, which is not in the payload"),
            ));
        }
    }

    // logical path -> physical path
    let mut by_logical: BTreeMap<String, String> = BTreeMap::new();
    for physical in &on_disk {
        let logical = original.get(physical).unwrap_or(physical).clone();
        if by_logical.insert(logical.clone(), physical.clone()).is_some() {
            return Err(Error::load(
                bag_dir,
                format!("more than one payload file maps to {logical}"),
            ));
        }
    }

    let mut declared: BTreeMap<String, &FileMetadata> = BTreeMap::new();
    if let Some(files) = files_metadata {
        for file in files {
            if !by_logical.contains_key(&file.filepath) {
                return Err(Error::load(
                    bag_dir,
                    format!("files.xml describes {}, which is not in the payload", file.filepath),
                ));
            }
            declared.insert(file.filepath.clone(), file);
        }
        if source_format != SourceFormat::Simple
            && let Some(undeclared) = by_logical.keys().find(|l| !declared.contains_key(*l))
        {
            return Err(Error::load(
                bag_dir,
                format!("payload file {undeclared} is not described in files.xml"),
            ));
        }
    }

    let mut precomputed = read_precomputed(bag_dir)?;
    let mut payload: Vec<PayloadFile> = Vec::with_capacity(by_logical.len());
    for (logical, physical) in by_logical {
        let Some(rel_logical) = logical.strip_prefix("data/") else {
            return Err(Error::load(
                bag_dir,
                format!("logical path {logical} is outside data/"),
            ));
        };
        if rel_logical.is_empty()
            || Path::new(rel_logical)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::load(
                bag_dir,
                format!("logical path {logical} does not name a file inside data/"),
            ));
        }
        let sanitized = sanitize_path(rel_logical);
        let original_path = (sanitized != rel_logical).then(|| rel_logical.to_string());
        let access_rights = metadata::effective_access_rights(
            declared
                .get(&logical)
                .and_then(|f| f.accessible_to_rights.as_deref()),
            dataset_access,
        );

        payload.push(PayloadFile {
            id: String::new(),
            path: sanitized,
            checksums: precomputed.remove(&physical).unwrap_or_default(),
            physical_path: physical,
            original_path,
            access_rights,
        });
    }

    payload.sort_by(|a, b| a.path.cmp(&b.path));
    if let Some(pair) = payload.windows(2).find(|w| w[0].path == w[1].path) {
        return Err(Error::load(
            bag_dir,
            format!("two payload files sanitize to the same path data/{}", pair[0].path),
        ));
    }
    for (index, file) in payload.iter_mut().enumerate() {
        file.id = format!("file-{:04}", index + 1);
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn simple_deposit(root: &Path) -> PathBuf {
        let deposit = root.join("dep-1");
        write(
            &deposit.join(PROPERTIES_FILE),
            "deposit.origin=SIMPLE\ndepositor.userId=user001\nbag-store.bag-id=bag-1\n",
        );
        let bag = deposit.join("bag");
        write(&bag.join("bagit.txt"), "BagIt-Version: 1.0\nTag-File-Character-Encoding: UTF-8\n");
        write(&bag.join("bag-info.txt"), "Created: 2024-05-01T10:00:00+02:00\n");
        write(&bag.join("data/b.txt"), "bbb");
        write(&bag.join("data/sub/a?.txt"), "aaa");
        deposit
    }

    #[test]
    fn test_load_simple_deposit() {
        let dir = TempDir::new().unwrap();
        let deposit = load_deposit(&simple_deposit(dir.path())).unwrap();

        assert_eq!(deposit.id(), "dep-1");
        assert_eq!(deposit.bag_id, "bag-1");
        assert_eq!(deposit.sword_token, "sword:bag-1");
        assert_eq!(deposit.state(), DepositState::Submitted);
        assert_eq!(deposit.source_format, SourceFormat::Simple);
        assert!(!deposit.is_update());
        assert!(deposit.created.is_some());

        let paths: Vec<&str> = deposit.payload_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["b.txt", "sub/a_.txt"]);
        assert_eq!(deposit.payload_files[0].id, "file-0001");
        assert_eq!(deposit.payload_files[1].original_path.as_deref(), Some("sub/a?.txt"));
        assert_eq!(deposit.payload_files[1].physical_path, "data/sub/a?.txt");
        assert!(deposit.metadata_file("bagit.txt").is_some());
    }

    #[test]
    fn test_zero_or_two_bags_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let deposit = simple_deposit(dir.path());
        fs::create_dir(deposit.join("second-bag")).unwrap();
        assert!(matches!(load_deposit(&deposit), Err(Error::Load { .. })));

        let empty = dir.path().join("empty");
        fs::create_dir(&empty).unwrap();
        fs::write(empty.join(PROPERTIES_FILE), "depositor.userId=u\n").unwrap();
        assert!(matches!(load_deposit(&empty), Err(Error::Load { .. })));
    }

    #[test]
    fn test_sword_deposit_requires_dataset_xml() {
        let dir = TempDir::new().unwrap();
        let deposit = simple_deposit(dir.path());
        fs::write(
            deposit.join(PROPERTIES_FILE),
            "deposit.origin=SWORD2\ndepositor.userId=user001\n",
        )
        .unwrap();
        let err = load_deposit(&deposit).unwrap_err();
        assert!(err.to_string().contains("dataset.xml"));
    }

    #[test]
    fn test_unsupported_manifest_is_ignored() {
        let dir = TempDir::new().unwrap();
        let deposit = simple_deposit(dir.path());
        fs::write(
            deposit.join("bag/manifest-sha1.txt"),
            "a9993e364706816aba3e25717850c26c9cd0d89d  data/b.txt\n",
        )
        .unwrap();
        let loaded = load_deposit(&deposit).unwrap();
        assert!(loaded.payload_files.iter().all(|f| f.checksums.is_empty()));
    }

    #[test]
    fn test_malformed_precomputed_checksum() {
        let dir = TempDir::new().unwrap();
        let deposit = simple_deposit(dir.path());
        fs::write(deposit.join("bag/manifest-md5.txt"), "xyz  data/b.txt\n").unwrap();
        assert!(matches!(load_deposit(&deposit), Err(Error::Load { .. })));
    }

    #[test]
    fn test_update_without_token_uses_series_token() {
        let dir = TempDir::new().unwrap();
        let deposit = simple_deposit(dir.path());
        write(
            &deposit.join("bag/bag-info.txt"),
            "Created: 2024-05-01T10:00:00+02:00\nIs-Version-Of: urn:uuid:bag-0\n",
        );
        let loaded = load_deposit(&deposit).unwrap();
        assert!(loaded.is_update());
        assert_eq!(loaded.bag_id, "bag-1");
        assert_eq!(loaded.version_series_id(), "bag-0");
        assert_eq!(loaded.sword_token, "sword:bag-0");
    }

    #[test]
    fn test_logical_paths_must_stay_inside_data() {
        for logical in ["data/../escape.txt", "data//etc/passwd", "data/sub/../../x"] {
            let dir = TempDir::new().unwrap();
            let deposit = simple_deposit(dir.path());
            write(
                &deposit.join("bag/original-filepaths.txt"),
                &format!("data/b.txt  {logical}\n"),
            );
            let err = load_deposit(&deposit).unwrap_err();
            assert!(matches!(err, Error::Load { .. }), "{logical}");
            assert!(err.to_string().contains("inside data/"), "{logical}: {err}");
        }
    }

    #[test]
    fn test_missing_depositor_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let deposit = simple_deposit(dir.path());
        fs::write(deposit.join(PROPERTIES_FILE), "deposit.origin=SIMPLE\n").unwrap();
        assert!(matches!(load_deposit(&deposit), Err(Error::Load { .. })));
    }
}
