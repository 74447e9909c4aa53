//! Directory-of-segments backend: each index is a directory of JSON Lines segment files.
//!
//! Bulk writes append to the index's open segment. `MergeSegments` folds every segment into one
//! (last write per id wins, deletes dropped), `Flush` fsyncs the open segment, `Refresh`
//! rewrites `manifest.json`, the list of segments a reader should see.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::types::{
    BulkResponse, BulkSubmission, CommitStrategy, Document, IndexScaleOp, IndexScaleWork,
    ItemResult, RefreshStrategy, WriteOp,
};
use crate::utils::lock_or_recover;

use super::IndexBackend;

const SEGMENT_PREFIX: &str = "seg-";
const SEGMENT_EXT: &str = "jsonl";
const MANIFEST: &str = "manifest.json";

#[derive(Debug, Serialize, Deserialize)]
struct SegmentLine {
    id: String,
    op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    doc: Option<Document>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub segments: Vec<String>,
}

#[derive(Default)]
struct IndexFiles {
    next_seq: u64,
    open: Option<BufWriter<File>>,
}

pub struct SegmentDirBackend {
    root: PathBuf,
    indexes: Mutex<HashMap<String, IndexFiles>>,
}

fn segment_name(seq: u64) -> String {
    format!("{SEGMENT_PREFIX}{seq:08}.{SEGMENT_EXT}")
}

/// Segment files of an index directory, oldest first.
fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut segs: Vec<(u64, PathBuf)> = fs::read_dir(dir)
        .with_context(|| format!("list segments in {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?;
            let seq = name
                .strip_prefix(SEGMENT_PREFIX)?
                .strip_suffix(&format!(".{SEGMENT_EXT}"))?
                .parse()
                .ok()?;
            Some((seq, p))
        })
        .collect();
    segs.sort_by_key(|(seq, _)| *seq);
    Ok(segs)
}

fn replay_segments(dir: &Path) -> Result<BTreeMap<String, Document>> {
    let mut live = BTreeMap::new();
    for (_, path) in list_segments(dir)? {
        let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: SegmentLine = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
            match entry.doc {
                Some(doc) if entry.op != "delete" => {
                    live.insert(entry.id, doc);
                }
                _ => {
                    live.remove(&entry.id);
                }
            }
        }
    }
    Ok(live)
}

impl SegmentDirBackend {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("create index root {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            indexes: Mutex::new(HashMap::new()),
        })
    }

    pub fn index_dir(&self, index: &str) -> PathBuf {
        self.root.join(index)
    }

    /// Live documents of `index`, replayed from its segments.
    pub fn read_documents(&self, index: &str) -> Result<BTreeMap<String, Document>> {
        replay_segments(&self.index_dir(index))
    }

    pub fn read_manifest(&self, index: &str) -> Result<Manifest> {
        let path = self.index_dir(index).join(MANIFEST);
        if !path.exists() {
            return Ok(Manifest::default());
        }
        let s = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))
    }

    pub fn segment_count(&self, index: &str) -> Result<usize> {
        Ok(list_segments(&self.index_dir(index))?.len())
    }

    fn files_for<'a>(&self, map: &'a mut HashMap<String, IndexFiles>, index: &str) -> Result<&'a mut IndexFiles> {
        if !map.contains_key(index) {
            let dir = self.index_dir(index);
            fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
            let next_seq = list_segments(&dir)?.last().map(|(s, _)| s + 1).unwrap_or(0);
            map.insert(
                index.to_string(),
                IndexFiles {
                    next_seq,
                    open: None,
                },
            );
        }
        map.get_mut(index)
            .with_context(|| format!("index '{index}' state missing"))
    }

    fn writer<'a>(&self, files: &'a mut IndexFiles, index: &str) -> Result<&'a mut BufWriter<File>> {
        if files.open.is_none() {
            let path = self.index_dir(index).join(segment_name(files.next_seq));
            files.next_seq += 1;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open segment {}", path.display()))?;
            files.open = Some(BufWriter::new(file));
        }
        files
            .open
            .as_mut()
            .with_context(|| format!("no open segment for '{index}'"))
    }

    fn sync_open(files: &mut IndexFiles) -> Result<()> {
        if let Some(w) = files.open.as_mut() {
            w.flush().context("flush segment")?;
            w.get_ref().sync_data().context("sync segment")?;
        }
        Ok(())
    }

    fn close_open(files: &mut IndexFiles) -> Result<()> {
        Self::sync_open(files)?;
        files.open = None;
        Ok(())
    }

    fn write_manifest(&self, index: &str) -> Result<()> {
        let dir = self.index_dir(index);
        let manifest = Manifest {
            segments: list_segments(&dir)?
                .into_iter()
                .filter_map(|(_, p)| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .collect(),
        };
        let tmp = dir.join(format!("{MANIFEST}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(&manifest)?)
            .with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, dir.join(MANIFEST)).context("replace manifest")?;
        Ok(())
    }

    fn merge(&self, files: &mut IndexFiles, index: &str) -> Result<()> {
        Self::close_open(files)?;
        let dir = self.index_dir(index);
        let old = list_segments(&dir)?;
        if old.len() <= 1 {
            return Ok(());
        }
        let live = replay_segments(&dir)?;
        let merged_path = dir.join(segment_name(files.next_seq));
        files.next_seq += 1;
        {
            let mut w = BufWriter::new(
                File::create(&merged_path)
                    .with_context(|| format!("create {}", merged_path.display()))?,
            );
            for (id, doc) in live {
                let line = SegmentLine {
                    id,
                    op: "add".to_string(),
                    doc: Some(doc),
                };
                serde_json::to_writer(&mut w, &line)?;
                w.write_all(b"\n")?;
            }
            w.flush()?;
            w.get_ref().sync_data().context("sync merged segment")?;
        }
        for (_, path) in old {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
        log::debug!("merged segments of '{}' into {}", index, merged_path.display());
        Ok(())
    }
}

impl IndexBackend for SegmentDirBackend {
    fn submit(&self, bulk: &BulkSubmission) -> Result<BulkResponse> {
        let mut map = lock_or_recover(&self.indexes);
        let mut commit: Vec<&str> = Vec::new();
        let mut refresh: Vec<&str> = Vec::new();
        for item in &bulk.items {
            let files = self.files_for(&mut map, &item.index)?;
            let w = self.writer(files, &item.index)?;
            let doc = match &item.op {
                WriteOp::Add(doc) | WriteOp::Update(doc) => Some(doc.clone()),
                WriteOp::Delete => None,
            };
            let line = SegmentLine {
                id: item.id.0.clone(),
                op: item.op.name().to_string(),
                doc,
            };
            serde_json::to_writer(&mut *w, &line)
                .with_context(|| format!("write {} to '{}'", item.id, item.index))?;
            w.write_all(b"\n")?;
            if item.commit == CommitStrategy::Force && !commit.contains(&item.index.as_str()) {
                commit.push(&item.index);
            }
            if item.refresh == RefreshStrategy::Force && !refresh.contains(&item.index.as_str()) {
                refresh.push(&item.index);
            }
        }
        for index in commit {
            Self::sync_open(self.files_for(&mut map, index)?)?;
        }
        for index in refresh {
            if let Some(w) = self.files_for(&mut map, index)?.open.as_mut() {
                w.flush().context("flush segment")?;
            }
            self.write_manifest(index)?;
        }
        Ok(BulkResponse {
            items: bulk.items.iter().map(|_| ItemResult::ok()).collect(),
        })
    }

    fn execute(&self, work: &IndexScaleWork) -> Result<()> {
        if let Some(tenant) = &work.tenant {
            log::debug!("{} on '{}' for tenant '{}'", work.op, work.index, tenant);
        }
        let mut map = lock_or_recover(&self.indexes);
        let files = self.files_for(&mut map, &work.index)?;
        match work.op {
            IndexScaleOp::Purge => {
                files.open = None;
                for (_, path) in list_segments(&self.index_dir(&work.index))? {
                    fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
                }
                self.write_manifest(&work.index)
            }
            IndexScaleOp::MergeSegments => self.merge(files, &work.index),
            IndexScaleOp::Flush => Self::sync_open(files),
            IndexScaleOp::Refresh => {
                if let Some(w) = files.open.as_mut() {
                    w.flush().context("flush segment")?;
                }
                self.write_manifest(&work.index)
            }
        }
    }

    fn reset_schema(&self, index: &str) -> Result<()> {
        let mut map = lock_or_recover(&self.indexes);
        map.remove(index);
        let dir = self.index_dir(index);
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        }
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(())
    }
}
