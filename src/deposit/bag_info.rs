// src/deposit/bag_info.rs

//! Tag file parsing for `bagit.txt` and `bag-info.txt`
//!
//! Both files use `Label: value` lines. A line starting with whitespace
//! continues the previous value. Labels may repeat.

use std::collections::BTreeMap;

pub const IS_VERSION_OF: &str = "Is-Version-Of";
pub const CREATED: &str = "Created";
pub const BAGIT_VERSION: &str = "BagIt-Version";

/// Repeatable bag-level metadata fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BagInfo {
    fields: BTreeMap<String, Vec<String>>,
}

impl BagInfo {
    /// Parse tag file content, reporting the first malformed line
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut entries: Vec<(String, String)> = Vec::new();

        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                match entries.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                    None => {
                        return Err(format!("line {}: continuation without a label", lineno + 1));
                    }
                }
                continue;
            }
            let Some((label, value)) = line.split_once(':') else {
                return Err(format!("line {}: expected 'Label: value'", lineno + 1));
            };
            entries.push((label.trim().to_string(), value.trim().to_string()));
        }

        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (label, value) in entries {
            fields.entry(label).or_default().push(value);
        }
        Ok(Self { fields })
    }

    /// All values recorded for a label, in file order
    pub fn values(&self, label: &str) -> &[String] {
        self.fields.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value recorded for a label
    pub fn first(&self, label: &str) -> Option<&str> {
        self.values(label).first().map(String::as_str)
    }
}
