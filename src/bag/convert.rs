// src/bag/convert.rs

//! Metadata converters
//!
//! A converter turns a loaded [`Deposit`] into an in-memory document and then
//! serializes that document into one or more tag files of the output bag. The
//! packager only sees the object-safe [`RenderMetadata`] side, so converters
//! with different document types can live in one list.
//!
//! Built-in converters:
//!
//! | Converter | Output |
//! |-----------|--------|
//! | [`DatasetXmlConverter`] | `metadata/dataset.xml` (carried verbatim) |
//! | [`FilesXmlConverter`] | `metadata/files.xml` (regenerated) |
//! | [`OaiOreConverter`] | `metadata/oai-ore.rdf`, `metadata/oai-ore.jsonld` |
//! | [`PidMappingConverter`] | `metadata/pid-mapping.txt` |

use crate::deposit::{DatasetMetadata, Deposit};
use crate::error::Result;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

const DCTERMS_NS: &str = "http://purl.org/dc/terms/";
const FILES_NS: &str = "http://easy.dans.knaw.nl/schemas/bag/metadata/files/";
const ORE_NS: &str = "http://www.openarchives.org/ore/terms/";
const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

/// One tag file produced by a converter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataOutput {
    /// Bag-relative path, e.g. `metadata/oai-ore.rdf`
    pub path: String,
    pub bytes: Vec<u8>,
}

impl MetadataOutput {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }
}

/// Two-phase conversion of a deposit into tag files
pub trait MetadataConverter {
    type Document;

    fn convert(&self, deposit: &Deposit) -> Result<Self::Document>;

    fn serialize(&self, document: &Self::Document) -> Result<Vec<MetadataOutput>>;
}

/// Object-safe view of a [`MetadataConverter`]
pub trait RenderMetadata: Send + Sync {
    fn render(&self, deposit: &Deposit) -> Result<Vec<MetadataOutput>>;
}

impl<C> RenderMetadata for C
where
    C: MetadataConverter + Send + Sync,
{
    fn render(&self, deposit: &Deposit) -> Result<Vec<MetadataOutput>> {
        let document = self.convert(deposit)?;
        self.serialize(&document)
    }
}

/// Controlled vocabulary used by the converters
///
/// Maps file-level access categories onto access right URIs. Built once from
/// configuration and shared read-only between workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    access_rights: BTreeMap<String, String>,
    /// Prefix turning a bag id into a URI
    pub resource_prefix: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let access_rights = [
            ("ANONYMOUS", "http://purl.org/coar/access_right/c_abf2"),
            ("KNOWN", "http://purl.org/coar/access_right/c_16ec"),
            ("RESTRICTED_REQUEST", "http://purl.org/coar/access_right/c_16ec"),
            ("NONE", "http://purl.org/coar/access_right/c_14cb"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            access_rights,
            resource_prefix: "urn:uuid:".to_string(),
        }
    }
}

impl Vocabulary {
    /// Default table with some entries replaced or added
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Self {
        let mut vocabulary = Self::default();
        for (category, uri) in overrides {
            vocabulary
                .access_rights
                .insert(category.to_uppercase(), uri.clone());
        }
        vocabulary
    }

    /// URI of a file-level access category
    pub fn access_right_uri(&self, category: &str) -> Option<&str> {
        self.access_rights.get(category).map(String::as_str)
    }

    fn resource_uri(&self, id: &str) -> String {
        format!("{}{}", self.resource_prefix, id)
    }
}

/// Converters every produced bag carries, in tag file order
pub fn default_converters(vocabulary: Arc<Vocabulary>) -> Vec<Box<dyn RenderMetadata>> {
    vec![
        Box::new(DatasetXmlConverter),
        Box::new(FilesXmlConverter),
        Box::new(OaiOreConverter::new(vocabulary)),
        Box::new(PidMappingConverter),
    ]
}

/// Carries `metadata/dataset.xml` over unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct DatasetXmlConverter;

impl MetadataConverter for DatasetXmlConverter {
    type Document = Option<Vec<u8>>;

    fn convert(&self, deposit: &Deposit) -> Result<Self::Document> {
        Ok(deposit
            .metadata_file("metadata/dataset.xml")
            .map(|f| f.content.clone()))
    }

    fn serialize(&self, document: &Self::Document) -> Result<Vec<MetadataOutput>> {
        Ok(document
            .iter()
            .map(|bytes| MetadataOutput::new("metadata/dataset.xml", bytes.clone()))
            .collect())
    }
}

/// Entry of the regenerated files.xml
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescription {
    pub id: String,
    pub bag_path: String,
    pub original_path: Option<String>,
    pub access_rights: Option<String>,
}

/// Regenerates `metadata/files.xml` from the payload list
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesXmlConverter;

impl MetadataConverter for FilesXmlConverter {
    type Document = Vec<FileDescription>;

    fn convert(&self, deposit: &Deposit) -> Result<Self::Document> {
        Ok(deposit
            .payload_files
            .iter()
            .map(|f| FileDescription {
                id: f.id.clone(),
                bag_path: f.bag_path(),
                original_path: f.original_path.as_ref().map(|p| format!("data/{p}")),
                access_rights: f.access_rights.clone(),
            })
            .collect())
    }

    fn serialize(&self, document: &Self::Document) -> Result<Vec<MetadataOutput>> {
        let mut writer = xml_writer()?;
        writer.write_event(Event::Start(
            BytesStart::new("files").with_attributes([("xmlns", FILES_NS), ("xmlns:dcterms", DCTERMS_NS)]),
        ))?;
        for file in document {
            writer.write_event(Event::Start(
                BytesStart::new("file").with_attributes([("filepath", file.bag_path.as_str())]),
            ))?;
            text_element(&mut writer, "dcterms:identifier", &file.id)?;
            if let Some(original) = &file.original_path {
                text_element(&mut writer, "originalFilepath", original)?;
            }
            if let Some(rights) = &file.access_rights {
                text_element(&mut writer, "accessibleToRights", rights)?;
            }
            writer.write_event(Event::End(BytesEnd::new("file")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("files")))?;

        Ok(vec![MetadataOutput::new("metadata/files.xml", finish_xml(writer)?)])
    }
}

/// One aggregated resource of the resource map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedResource {
    pub uri: String,
    pub id: String,
    pub path: String,
    pub access_right: Option<String>,
    pub restricted: Option<bool>,
}

/// OAI-ORE resource map: one aggregation of the dataset's files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMap {
    pub map_uri: String,
    pub aggregation_uri: String,
    pub title: Option<String>,
    pub creators: Vec<String>,
    pub pid: String,
    pub created: Option<String>,
    /// Descriptive `dcterms` statements about the aggregation, in document order
    pub statements: Vec<(String, String)>,
    pub resources: Vec<AggregatedResource>,
}

fn dataset_statements(dataset: &DatasetMetadata) -> Vec<(String, String)> {
    let fields: [(&str, &[String]); 9] = [
        ("dcterms:alternative", &dataset.alternative_titles),
        ("dcterms:description", &dataset.descriptions),
        ("dcterms:subject", &dataset.subjects),
        ("dcterms:audience", &dataset.audiences),
        ("dcterms:language", &dataset.languages),
        ("dcterms:rightsHolder", &dataset.rights_holders),
        ("dcterms:created", dataset.created.as_slice()),
        ("dcterms:available", dataset.available.as_slice()),
        ("dcterms:license", dataset.license.as_slice()),
    ];
    fields
        .into_iter()
        .flat_map(|(property, values)| values.iter().map(move |v| (property.to_string(), v.clone())))
        .collect()
}

/// Produces the resource map in RDF/XML and JSON-LD
#[derive(Debug, Clone)]
pub struct OaiOreConverter {
    vocabulary: Arc<Vocabulary>,
}

impl OaiOreConverter {
    pub fn new(vocabulary: Arc<Vocabulary>) -> Self {
        Self { vocabulary }
    }

    fn render_rdf(&self, map: &ResourceMap) -> Result<Vec<u8>> {
        let mut writer = xml_writer()?;
        writer.write_event(Event::Start(BytesStart::new("rdf:RDF").with_attributes([
            ("xmlns:rdf", RDF_NS),
            ("xmlns:ore", ORE_NS),
            ("xmlns:dcterms", DCTERMS_NS),
        ])))?;

        writer.write_event(Event::Start(
            BytesStart::new("ore:ResourceMap").with_attributes([("rdf:about", map.map_uri.as_str())]),
        ))?;
        empty_element(&mut writer, "ore:describes", "rdf:resource", &map.aggregation_uri)?;
        if let Some(created) = &map.created {
            text_element(&mut writer, "dcterms:created", created)?;
        }
        writer.write_event(Event::End(BytesEnd::new("ore:ResourceMap")))?;

        writer.write_event(Event::Start(
            BytesStart::new("ore:Aggregation")
                .with_attributes([("rdf:about", map.aggregation_uri.as_str())]),
        ))?;
        if let Some(title) = &map.title {
            text_element(&mut writer, "dcterms:title", title)?;
        }
        for creator in &map.creators {
            text_element(&mut writer, "dcterms:creator", creator)?;
        }
        text_element(&mut writer, "dcterms:identifier", &map.pid)?;
        for (property, value) in &map.statements {
            text_element(&mut writer, property, value)?;
        }
        for resource in &map.resources {
            empty_element(&mut writer, "ore:aggregates", "rdf:resource", &resource.uri)?;
        }
        writer.write_event(Event::End(BytesEnd::new("ore:Aggregation")))?;

        for resource in &map.resources {
            writer.write_event(Event::Start(
                BytesStart::new("rdf:Description").with_attributes([("rdf:about", resource.uri.as_str())]),
            ))?;
            text_element(&mut writer, "dcterms:identifier", &resource.id)?;
            text_element(&mut writer, "dcterms:title", &resource.path)?;
            if let Some(uri) = &resource.access_right {
                empty_element(&mut writer, "dcterms:accessRights", "rdf:resource", uri)?;
            }
            writer.write_event(Event::End(BytesEnd::new("rdf:Description")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("rdf:RDF")))?;
        finish_xml(writer)
    }

    fn render_json_ld(&self, map: &ResourceMap) -> Result<Vec<u8>> {
        let resources: Vec<serde_json::Value> = map
            .resources
            .iter()
            .map(|r| {
                json!({
                    "@id": r.uri,
                    "dcterms:identifier": r.id,
                    "dcterms:title": r.path,
                    "dcterms:accessRights": r.access_right,
                    "restricted": r.restricted,
                })
            })
            .collect();

        let mut aggregation = json!({
            "@id": map.aggregation_uri,
            "@type": "ore:Aggregation",
            "dcterms:title": map.title,
            "dcterms:creator": map.creators,
            "dcterms:identifier": map.pid,
            "ore:aggregates": resources,
        });
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (property, value) in &map.statements {
            grouped.entry(property.as_str()).or_default().push(value.as_str());
        }
        if let Some(object) = aggregation.as_object_mut() {
            for (property, values) in grouped {
                object.insert(property.to_string(), json!(values));
            }
        }

        let document = json!({
            "@context": {
                "ore": ORE_NS,
                "dcterms": DCTERMS_NS,
            },
            "@id": map.map_uri,
            "@type": "ore:ResourceMap",
            "dcterms:created": map.created,
            "ore:describes": aggregation,
        });

        let mut bytes = serde_json::to_vec_pretty(&document)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

impl MetadataConverter for OaiOreConverter {
    type Document = ResourceMap;

    fn convert(&self, deposit: &Deposit) -> Result<Self::Document> {
        let aggregation_uri = self.vocabulary.resource_uri(&deposit.bag_id);
        let resources = deposit
            .payload_files
            .iter()
            .map(|f| AggregatedResource {
                uri: format!("{aggregation_uri}/{}", f.id),
                id: f.id.clone(),
                path: f.bag_path(),
                access_right: f
                    .access_rights
                    .as_deref()
                    .and_then(|c| self.vocabulary.access_right_uri(c))
                    .map(str::to_string),
                restricted: f.restricted(),
            })
            .collect();

        Ok(ResourceMap {
            map_uri: format!("{aggregation_uri}/oai-ore"),
            title: deposit.dataset.title().map(str::to_string),
            creators: deposit.dataset.creators.clone(),
            pid: deposit.persistent_identifier().to_string(),
            created: deposit.created.map(|c| c.to_rfc3339()),
            statements: dataset_statements(&deposit.dataset),
            aggregation_uri,
            resources,
        })
    }

    fn serialize(&self, document: &Self::Document) -> Result<Vec<MetadataOutput>> {
        Ok(vec![
            MetadataOutput::new("metadata/oai-ore.rdf", self.render_rdf(document)?),
            MetadataOutput::new("metadata/oai-ore.jsonld", self.render_json_ld(document)?),
        ])
    }
}

/// Writes `metadata/pid-mapping.txt`
#[derive(Debug, Default, Clone, Copy)]
pub struct PidMappingConverter;

impl MetadataConverter for PidMappingConverter {
    type Document = Vec<(String, String)>;

    fn convert(&self, deposit: &Deposit) -> Result<Self::Document> {
        let mut mapping = Vec::with_capacity(deposit.payload_files.len() + 1);
        mapping.push((deposit.persistent_identifier().to_string(), "data/".to_string()));
        mapping.extend(
            deposit
                .payload_files
                .iter()
                .map(|f| (f.id.clone(), f.bag_path())),
        );
        Ok(mapping)
    }

    fn serialize(&self, document: &Self::Document) -> Result<Vec<MetadataOutput>> {
        let mut out = String::new();
        for (pid, path) in document {
            out.push_str(pid);
            out.push(' ');
            out.push_str(path);
            out.push('\n');
        }
        Ok(vec![MetadataOutput::new("metadata/pid-mapping.txt", out)])
    }
}

fn xml_writer() -> Result<Writer<Vec<u8>>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    Ok(writer)
}

fn finish_xml(writer: Writer<Vec<u8>>) -> Result<Vec<u8>> {
    let mut bytes = writer.into_inner();
    bytes.write_all(b"\n")?;
    Ok(bytes)
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn empty_element(writer: &mut Writer<Vec<u8>>, name: &str, attr: &str, value: &str) -> Result<()> {
    writer.write_event(Event::Empty(BytesStart::new(name).with_attributes([(attr, value)])))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_overrides() {
        let vocabulary = Vocabulary::default();
        assert_eq!(
            vocabulary.access_right_uri("ANONYMOUS"),
            Some("http://purl.org/coar/access_right/c_abf2")
        );
        assert_eq!(vocabulary.access_right_uri("UNKNOWN"), None);

        let mut overrides = BTreeMap::new();
        overrides.insert("none".to_string(), "http://example.org/closed".to_string());
        let vocabulary = Vocabulary::with_overrides(&overrides);
        assert_eq!(vocabulary.access_right_uri("NONE"), Some("http://example.org/closed"));
        assert!(vocabulary.access_right_uri("KNOWN").is_some());
    }

    #[test]
    fn test_files_xml_serialization() {
        let document = vec![
            FileDescription {
                id: "file-0001".to_string(),
                bag_path: "data/a_.txt".to_string(),
                original_path: Some("data/a?.txt".to_string()),
                access_rights: Some("ANONYMOUS".to_string()),
            },
            FileDescription {
                id: "file-0002".to_string(),
                bag_path: "data/b & c.txt".to_string(),
                original_path: None,
                access_rights: None,
            },
        ];
        let outputs = FilesXmlConverter.serialize(&document).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].path, "metadata/files.xml");

        let xml = String::from_utf8(outputs[0].bytes.clone()).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"<file filepath="data/a_.txt">"#));
        assert!(xml.contains("<originalFilepath>data/a?.txt</originalFilepath>"));
        assert!(xml.contains("data/b &amp; c.txt"));

        // the regenerated document is readable by our own parser
        let parsed = crate::deposit::metadata::parse_files_xml(&xml).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].accessible_to_rights.as_deref(), Some("ANONYMOUS"));
        assert_eq!(parsed[1].filepath, "data/b & c.txt");
    }

    #[test]
    fn test_pid_mapping_serialization() {
        let document = vec![
            ("doi:10.5072/abc".to_string(), "data/".to_string()),
            ("file-0001".to_string(), "data/a.txt".to_string()),
        ];
        let outputs = PidMappingConverter.serialize(&document).unwrap();
        assert_eq!(
            String::from_utf8(outputs[0].bytes.clone()).unwrap(),
            "doi:10.5072/abc data/\nfile-0001 data/a.txt\n"
        );
    }

    #[test]
    fn test_resource_map_serializations() {
        let converter = OaiOreConverter::new(Arc::new(Vocabulary::default()));
        let map = ResourceMap {
            map_uri: "urn:uuid:bag-1/oai-ore".to_string(),
            aggregation_uri: "urn:uuid:bag-1".to_string(),
            title: Some("A <title>".to_string()),
            creators: vec!["J. Doe".to_string()],
            pid: "doi:10.5072/abc".to_string(),
            created: None,
            statements: vec![
                ("dcterms:subject".to_string(), "Archaeology".to_string()),
                ("dcterms:subject".to_string(), "Excavation".to_string()),
                ("dcterms:language".to_string(), "nl".to_string()),
            ],
            resources: vec![AggregatedResource {
                uri: "urn:uuid:bag-1/file-0001".to_string(),
                id: "file-0001".to_string(),
                path: "data/a.txt".to_string(),
                access_right: Some("http://purl.org/coar/access_right/c_abf2".to_string()),
                restricted: Some(false),
            }],
        };

        let outputs = converter.serialize(&map).unwrap();
        let paths: Vec<&str> = outputs.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(paths, vec!["metadata/oai-ore.rdf", "metadata/oai-ore.jsonld"]);

        let rdf = String::from_utf8(outputs[0].bytes.clone()).unwrap();
        assert!(rdf.contains(r#"<ore:aggregates rdf:resource="urn:uuid:bag-1/file-0001"/>"#));
        assert!(rdf.contains("A &lt;title&gt;"));
        assert!(rdf.contains("<dcterms:subject>Excavation</dcterms:subject>"));

        let json: serde_json::Value = serde_json::from_slice(&outputs[1].bytes).unwrap();
        assert_eq!(json["ore:describes"]["@id"], "urn:uuid:bag-1");
        assert_eq!(json["ore:describes"]["ore:aggregates"][0]["dcterms:identifier"], "file-0001");
        assert_eq!(json["ore:describes"]["ore:aggregates"][0]["restricted"], false);
        assert_eq!(
            json["ore:describes"]["dcterms:subject"],
            serde_json::json!(["Archaeology", "Excavation"])
        );
        assert_eq!(json["ore:describes"]["dcterms:language"], serde_json::json!(["nl"]));
    }
}
