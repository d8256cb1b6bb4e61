// src/deposit/metadata.rs

//! Descriptive metadata documents of a deposit
//!
//! Only the fields the pipeline and the built-in converters look at are
//! extracted. Matching is on local element names so that namespace prefixes
//! chosen by the depositing client do not matter.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;

/// Dataset-level access right category allowing anonymous downloads
pub const OPEN_ACCESS: &str = "OPEN_ACCESS";
/// File-level access right category allowing anonymous downloads
pub const ANONYMOUS: &str = "ANONYMOUS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    /// Local part of the `xsi:type` attribute, e.g. `DOI`
    pub scheme: Option<String>,
    pub value: String,
}

/// Fields extracted from `metadata/dataset.xml`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub titles: Vec<String>,
    pub alternative_titles: Vec<String>,
    pub creators: Vec<String>,
    pub descriptions: Vec<String>,
    pub audiences: Vec<String>,
    pub subjects: Vec<String>,
    pub languages: Vec<String>,
    pub rights_holders: Vec<String>,
    pub access_rights: Option<String>,
    pub license: Option<String>,
    pub created: Option<String>,
    pub available: Option<String>,
    pub identifiers: Vec<Identifier>,
}

/// Per-file entry of `metadata/files.xml`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    /// Logical path, bag-relative (`data/...`)
    pub filepath: String,
    pub accessible_to_rights: Option<String>,
    pub visible_to_rights: Option<String>,
    pub format: Option<String>,
}

#[derive(Default)]
struct AuthorParts {
    titles: Option<String>,
    initials: Option<String>,
    insertions: Option<String>,
    surname: Option<String>,
}

impl AuthorParts {
    fn display_name(self) -> Option<String> {
        let parts: Vec<String> = [self.titles, self.initials, self.insertions, self.surname]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() { None } else { Some(parts.join(" ")) }
    }
}

struct OpenElement {
    name: String,
    scheme: Option<String>,
    text: String,
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, wanted: &str) -> Result<Option<String>, quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == wanted.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn scheme_of(e: &BytesStart<'_>) -> Result<Option<String>, quick_xml::Error> {
    Ok(attribute(e, "type")?.map(|t| match t.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => t,
    }))
}

impl DatasetMetadata {
    pub fn parse(xml: &str) -> Result<Self, quick_xml::Error> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut meta = DatasetMetadata::default();
        let mut stack: Vec<OpenElement> = Vec::new();
        let mut author: Option<AuthorParts> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = local_name(&e);
                    if name == "author" {
                        author = Some(AuthorParts::default());
                    }
                    stack.push(OpenElement {
                        scheme: scheme_of(&e)?,
                        name,
                        text: String::new(),
                    });
                }
                Event::Text(t) => {
                    if let Some(open) = stack.last_mut() {
                        open.text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(open) = stack.last_mut() {
                        open.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::End(_) => {
                    let Some(open) = stack.pop() else { continue };
                    let text = open.text.trim().to_string();
                    if open.name == "author" {
                        if let Some(name) = author.take().and_then(AuthorParts::display_name) {
                            meta.creators.push(name);
                        }
                        continue;
                    }
                    if let Some(parts) = author.as_mut() {
                        match open.name.as_str() {
                            "titles" => parts.titles = Some(text),
                            "initials" => parts.initials = Some(text),
                            "insertions" => parts.insertions = Some(text),
                            "surname" => parts.surname = Some(text),
                            _ => {}
                        }
                        continue;
                    }
                    if text.is_empty() {
                        continue;
                    }
                    match open.name.as_str() {
                        "title" => meta.titles.push(text),
                        "alternative" => meta.alternative_titles.push(text),
                        "creator" => meta.creators.push(text),
                        "description" => meta.descriptions.push(text),
                        "audience" => meta.audiences.push(text),
                        "subject" => meta.subjects.push(text),
                        "language" => meta.languages.push(text),
                        "rightsHolder" => meta.rights_holders.push(text),
                        "accessRights" => meta.access_rights = Some(text),
                        "license" => meta.license = Some(text),
                        "created" => meta.created = Some(text),
                        "available" => meta.available = Some(text),
                        "identifier" => meta.identifiers.push(Identifier {
                            scheme: open.scheme,
                            value: text,
                        }),
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(meta)
    }

    /// Main title, if any
    pub fn title(&self) -> Option<&str> {
        self.titles.first().map(String::as_str)
    }

    /// DOI declared among the identifiers
    pub fn doi(&self) -> Option<&str> {
        self.identifiers
            .iter()
            .find(|id| {
                id.scheme
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case("doi"))
            })
            .map(|id| id.value.as_str())
    }
}

/// Parse `metadata/files.xml`
pub fn parse_files_xml(xml: &str) -> Result<Vec<FileMetadata>, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut files: Vec<FileMetadata> = Vec::new();
    let mut current: Option<FileMetadata> = None;
    let mut stack: Vec<OpenElement> = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                if name == "file" {
                    current = Some(file_entry(&e)?);
                }
                stack.push(OpenElement {
                    name,
                    scheme: None,
                    text: String::new(),
                });
            }
            Event::Empty(e) => {
                if local_name(&e) == "file" {
                    files.push(file_entry(&e)?);
                }
            }
            Event::Text(t) => {
                if let Some(open) = stack.last_mut() {
                    let text: Cow<'_, str> = t.unescape().map_err(|e| e.to_string())?;
                    open.text.push_str(&text);
                }
            }
            Event::End(_) => {
                let Some(open) = stack.pop() else { continue };
                if open.name == "file" {
                    if let Some(file) = current.take() {
                        files.push(file);
                    }
                    continue;
                }
                let text = open.text.trim().to_string();
                let Some(file) = current.as_mut() else { continue };
                if text.is_empty() {
                    continue;
                }
                match open.name.as_str() {
                    "accessibleToRights" => file.accessible_to_rights = Some(text),
                    "visibleToRights" => file.visible_to_rights = Some(text),
                    "format" => file.format = Some(text),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(files)
}

fn file_entry(e: &BytesStart<'_>) -> Result<FileMetadata, String> {
    let filepath = attribute(e, "filepath")
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "<file> element without filepath attribute".to_string())?;
    Ok(FileMetadata {
        filepath,
        ..Default::default()
    })
}

/// File-level access category of a payload file
///
/// A file-level `accessibleToRights` always wins over the dataset-level
/// `accessRights`. Without a file-level value the dataset category is mapped
/// onto its file-level counterpart.
pub fn effective_access_rights(file_level: Option<&str>, dataset_level: Option<&str>) -> Option<String> {
    if let Some(rights) = file_level {
        return Some(rights.to_string());
    }
    let mapped = match dataset_level? {
        OPEN_ACCESS => ANONYMOUS,
        "OPEN_ACCESS_FOR_REGISTERED_USERS" => "KNOWN",
        "REQUEST_PERMISSION" => "RESTRICTED_REQUEST",
        "NO_ACCESS" => "NONE",
        other => other,
    };
    Some(mapped.to_string())
}
