// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use bagforge::{
    BagValidator, Error, PriorRegistration, Result, RuleViolation, SkeletonRecord,
    ValidationReport, VaultCatalog,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const DATASET_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ddm:DDM xmlns:ddm="http://schemas.dans.knaw.nl/dataset/ddm-v2/"
         xmlns:dc="http://purl.org/dc/elements/1.1/"
         xmlns:dcterms="http://purl.org/dc/terms/"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xmlns:id-type="http://easy.dans.knaw.nl/schemas/vocab/identifier-type/">
  <ddm:profile>
    <dc:title>Excavation report Oss</dc:title>
    <dc:creator>J. Doe</dc:creator>
    <ddm:accessRights>OPEN_ACCESS</ddm:accessRights>
  </ddm:profile>
  <ddm:dcmiMetadata>
    <dcterms:identifier xsi:type="id-type:DOI">10.5072/dans-test-1</dcterms:identifier>
  </ddm:dcmiMetadata>
</ddm:DDM>
"#;

/// One payload file of a fixture deposit
pub struct FixtureFile {
    /// Path relative to the bag's `data/` directory
    pub path: String,
    pub content: Vec<u8>,
    pub accessible_to: Option<String>,
}

/// Builds deposit directories on disk
pub struct DepositBuilder {
    name: String,
    bag_name: String,
    properties: BTreeMap<String, String>,
    files: Vec<FixtureFile>,
    precomputed: BTreeMap<String, Vec<(String, String)>>,
    bag_info: Vec<(String, String)>,
    dataset_xml: Option<String>,
    write_files_xml: bool,
}

impl DepositBuilder {
    pub fn new(name: &str) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert("depositor.userId".to_string(), "user001".to_string());
        properties.insert("state.label".to_string(), "SUBMITTED".to_string());
        properties.insert("bag-store.bag-id".to_string(), format!("bag-{name}"));
        Self {
            name: name.to_string(),
            bag_name: "bag".to_string(),
            properties,
            files: Vec::new(),
            precomputed: BTreeMap::new(),
            bag_info: vec![("Created".to_string(), "2024-05-01T10:00:00+02:00".to_string())],
            dataset_xml: Some(DATASET_XML.to_string()),
            write_files_xml: true,
        }
    }

    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.push(FixtureFile {
            path: path.to_string(),
            content: content.to_vec(),
            accessible_to: None,
        });
        self
    }

    pub fn file_with_access(mut self, path: &str, content: &[u8], rights: &str) -> Self {
        self.files.push(FixtureFile {
            path: path.to_string(),
            content: content.to_vec(),
            accessible_to: Some(rights.to_string()),
        });
        self
    }

    /// Declare a checksum in the source bag's `manifest-<algorithm>.txt`
    pub fn precomputed(mut self, algorithm: &str, path: &str, digest: &str) -> Self {
        self.precomputed
            .entry(algorithm.to_string())
            .or_default()
            .push((digest.to_string(), format!("data/{path}")));
        self
    }

    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn bag_info(mut self, key: &str, value: &str) -> Self {
        self.bag_info.push((key.to_string(), value.to_string()));
        self
    }

    pub fn without_dataset_xml(mut self) -> Self {
        self.dataset_xml = None;
        self
    }

    pub fn without_files_xml(mut self) -> Self {
        self.write_files_xml = false;
        self
    }

    /// Write the deposit into `parent` and return its directory
    pub fn build(self, parent: &Path) -> PathBuf {
        let deposit = parent.join(&self.name);
        let bag = deposit.join(&self.bag_name);
        fs::create_dir_all(bag.join("data")).unwrap();
        fs::create_dir_all(bag.join("metadata")).unwrap();

        let props: String = self
            .properties
            .iter()
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect();
        fs::write(deposit.join("deposit.properties"), props).unwrap();

        fs::write(
            bag.join("bagit.txt"),
            "BagIt-Version: 1.0\nTag-File-Character-Encoding: UTF-8\n",
        )
        .unwrap();
        let bag_info: String = self
            .bag_info
            .iter()
            .map(|(k, v)| format!("{k}: {v}\n"))
            .collect();
        fs::write(bag.join("bag-info.txt"), bag_info).unwrap();

        for file in &self.files {
            let target = bag.join("data").join(&file.path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, &file.content).unwrap();
        }

        for (algorithm, entries) in &self.precomputed {
            let content: String = entries
                .iter()
                .map(|(digest, path)| format!("{digest}  {path}\n"))
                .collect();
            fs::write(bag.join(format!("manifest-{algorithm}.txt")), content).unwrap();
        }

        if let Some(xml) = &self.dataset_xml {
            fs::write(bag.join("metadata/dataset.xml"), xml).unwrap();
        }
        if self.write_files_xml {
            let mut xml = String::from(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<files xmlns=\"http://easy.dans.knaw.nl/schemas/bag/metadata/files/\">\n",
            );
            for file in &self.files {
                match &file.accessible_to {
                    Some(rights) => xml.push_str(&format!(
                        "  <file filepath=\"data/{}\">\n    <accessibleToRights>{}</accessibleToRights>\n  </file>\n",
                        file.path, rights
                    )),
                    None => xml.push_str(&format!("  <file filepath=\"data/{}\"/>\n", file.path)),
                }
            }
            xml.push_str("</files>\n");
            fs::write(bag.join("metadata/files.xml"), xml).unwrap();
        }

        deposit
    }
}

/// Read every entry of a produced bag archive
pub fn read_bag(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut archive = tar::Archive::new(fs::File::open(path).unwrap());
    let mut entries = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        entries.insert(name, content);
    }
    entries
}

/// Entry names of a produced bag archive, in archive order
pub fn bag_entry_order(path: &Path) -> Vec<String> {
    let mut archive = tar::Archive::new(fs::File::open(path).unwrap());
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}

/// Parse manifest text into path -> digest
pub fn manifest_map(content: &[u8]) -> BTreeMap<String, String> {
    String::from_utf8(content.to_vec())
        .unwrap()
        .lines()
        .map(|line| {
            let (digest, path) = line.split_once("  ").unwrap();
            (path.to_string(), digest.to_string())
        })
        .collect()
}

/// Scripted validator
pub enum FakeValidator {
    Compliant,
    Violations(Vec<(&'static str, &'static str)>),
    Anomaly,
    Unreachable,
}

impl BagValidator for FakeValidator {
    fn validate(&self, _bag_dir: &Path, _package_type: &str) -> Result<ValidationReport> {
        match self {
            Self::Compliant => Ok(ValidationReport {
                profile_version: "1.0.0".to_string(),
            }),
            Self::Violations(list) => Err(Error::InvalidDeposit {
                profile_version: "1.0.0".to_string(),
                violations: list
                    .iter()
                    .map(|(rule, violation)| RuleViolation {
                        rule: rule.to_string(),
                        violation: violation.to_string(),
                    })
                    .collect(),
            }),
            Self::Anomaly => Err(Error::ValidatorAnomaly("1.0.0".to_string())),
            Self::Unreachable => Err(Error::transport("http://validator/validate", "HTTP 503")),
        }
    }
}

/// In-memory catalog
#[derive(Default)]
pub struct FakeCatalog {
    pub prior: Mutex<BTreeMap<String, PriorRegistration>>,
    pub versions: Mutex<BTreeMap<String, u32>>,
    pub registered: Mutex<Vec<(String, u32, SkeletonRecord)>>,
    pub fail: bool,
}

impl FakeCatalog {
    pub fn with_prior(sword_token: &str, bag_id: &str, nbn: &str, version: u32) -> Self {
        let catalog = Self::default();
        catalog.prior.lock().unwrap().insert(
            sword_token.to_string(),
            PriorRegistration {
                bag_id: bag_id.to_string(),
                nbn: nbn.to_string(),
                version: Some(version),
            },
        );
        catalog
            .versions
            .lock()
            .unwrap()
            .insert(bag_id.to_string(), version);
        catalog
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn registrations(&self) -> Vec<(String, u32, SkeletonRecord)> {
        self.registered.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            return Err(Error::transport("http://vault", "connection refused"));
        }
        Ok(())
    }
}

impl VaultCatalog for FakeCatalog {
    fn find_existing_version(&self, sword_token: &str) -> Result<Option<PriorRegistration>> {
        self.check()?;
        Ok(self.prior.lock().unwrap().get(sword_token).cloned())
    }

    fn highest_version(&self, bag_id: &str) -> Result<u32> {
        self.check()?;
        Ok(self.versions.lock().unwrap().get(bag_id).copied().unwrap_or(0))
    }

    fn register_version(&self, bag_id: &str, version: u32, record: &SkeletonRecord) -> Result<()> {
        self.check()?;
        self.versions
            .lock()
            .unwrap()
            .insert(bag_id.to_string(), version);
        self.registered
            .lock()
            .unwrap()
            .push((bag_id.to_string(), version, record.clone()));
        Ok(())
    }
}
