//! JSON Lines record source: every `*.jsonl` file in a directory is one type group.

use anyhow::{Context, Result, bail};
use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;
use std::path::Path;

use crate::pipeline::document::DocumentBuilder;
use crate::types::{Document, Record, RecordId, TypeGroup};

use super::{IdentifierCursor, RecordSource, VecIdentifierCursor};

struct GroupData {
    /// Identifiers in first-seen file order.
    order: Vec<RecordId>,
    records: HashMap<RecordId, serde_json::Value>,
}

/// Records held in memory, read from JSON Lines. Each line is an object with an `"id"`
/// (string or integer). A later line with the same id replaces the earlier one.
#[derive(Default)]
pub struct JsonLinesSource {
    groups: BTreeMap<String, GroupData>,
}

fn record_id(value: &serde_json::Value) -> Option<RecordId> {
    match value.get("id")? {
        serde_json::Value::String(s) => Some(RecordId(s.clone())),
        serde_json::Value::Number(n) => Some(RecordId(n.to_string())),
        _ => None,
    }
}

impl JsonLinesSource {
    /// Load every `*.jsonl` file directly under `dir`, in file-name order.
    pub fn open_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("read data directory {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        paths.sort();

        let mut source = Self::default();
        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let file = std::fs::File::open(&path)
                .with_context(|| format!("open {}", path.display()))?;
            source
                .add_group(name, std::io::BufReader::new(file))
                .with_context(|| format!("load {}", path.display()))?;
        }
        Ok(source)
    }

    /// Add (or extend) a group from JSON Lines text.
    pub fn add_group<R: BufRead>(&mut self, name: &str, reader: R) -> Result<usize> {
        let group = self
            .groups
            .entry(name.to_string())
            .or_insert_with(|| GroupData {
                order: Vec::new(),
                records: HashMap::new(),
            });
        let mut count = 0_usize;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("read line {}", lineno + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(&line)
                .with_context(|| format!("parse line {}", lineno + 1))?;
            let Some(id) = record_id(&value) else {
                bail!("line {}: record has no string or integer \"id\"", lineno + 1);
            };
            if group.records.insert(id.clone(), value).is_none() {
                group.order.push(id);
            }
            count += 1;
        }
        log::debug!("loaded {} lines into type group '{}'", count, name);
        Ok(count)
    }

    /// One single-index type group per loaded file.
    pub fn type_groups(&self) -> Vec<TypeGroup> {
        self.groups.keys().map(|name| TypeGroup::single(name)).collect()
    }

    fn group(&self, group: &TypeGroup) -> Result<&GroupData> {
        self.groups
            .get(&group.name)
            .with_context(|| format!("unknown type group '{}'", group.name))
    }
}

impl RecordSource for JsonLinesSource {
    fn total_count(&self, group: &TypeGroup) -> Result<u64> {
        Ok(self.group(group)?.order.len() as u64)
    }

    fn open_identifiers(&self, group: &TypeGroup, batch_size: usize) -> Result<Box<dyn IdentifierCursor>> {
        let ids = self.group(group)?.order.clone();
        Ok(Box::new(VecIdentifierCursor::new(ids, batch_size)))
    }

    fn load_records(&self, group: &TypeGroup, ids: &[RecordId]) -> Result<Vec<Record>> {
        let data = self.group(group)?;
        let entity_type = group.primary_type();
        Ok(ids
            .iter()
            .filter_map(|id| {
                data.records.get(id).map(|body| Record {
                    id: id.clone(),
                    entity_type: entity_type.to_string(),
                    body: body.clone(),
                })
            })
            .collect())
    }
}

/// Copies the top-level fields of a JSON object record into the document.
#[derive(Clone, Debug, Default)]
pub struct JsonDocumentBuilder {
    /// When set, only these fields are copied.
    pub fields: Option<Vec<String>>,
}

impl DocumentBuilder for JsonDocumentBuilder {
    fn build(&self, _group: &TypeGroup, record: &Record) -> Result<Document> {
        let Some(obj) = record.body.as_object() else {
            bail!("record {} is not a JSON object", record.id);
        };
        let doc = obj
            .iter()
            .filter(|(k, _)| {
                self.fields
                    .as_ref()
                    .is_none_or(|allowed| allowed.iter().any(|a| a == *k))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(doc)
    }
}
