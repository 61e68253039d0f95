use crate::model::{StudentRecord, CURRENT_SCHEMA_VERSION};
use crate::schema::SchemaVersion;
use anyhow::Context;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Persistence boundary for the record collection. The pipeline only ever
/// needs "read everything" and "write one record".
pub trait RecordStore {
    fn load_all(&self) -> anyhow::Result<Vec<StudentRecord>>;
    fn save(&self, record: &StudentRecord) -> anyhow::Result<()>;
}

/// One pretty-printed JSON document per student in a flat directory.
/// Files with a `_` prefix are collection-level artifacts, not records.
pub struct JsonDirStore {
    dir: PathBuf,
    expected: SchemaVersion,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonDirStore {
            dir: dir.into(),
            expected: SchemaVersion::CURRENT,
        }
    }

    pub fn with_expected_version(mut self, version: SchemaVersion) -> Self {
        self.expected = version;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, record: &StudentRecord) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", record.first_name, record.last_name))
    }
}

impl RecordStore for JsonDirStore {
    /// A record that cannot be read or is on the wrong schema version is
    /// skipped with a warning; only an unreadable directory is fatal.
    fn load_all(&self) -> anyhow::Result<Vec<StudentRecord>> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create store directory {}", self.dir.display()))?;

        let mut names: Vec<String> = Vec::new();
        for ent in std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read store directory {}", self.dir.display()))?
        {
            let ent = ent?;
            let name = ent.file_name().to_string_lossy().to_string();
            if !name.ends_with(".json") || name.starts_with('_') {
                continue;
            }
            names.push(name);
        }
        names.sort();

        let mut records = Vec::new();
        for name in names {
            let path = self.dir.join(&name);
            let text = match std::fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("failed to read {}: {}; skipping", path.display(), e);
                    continue;
                }
            };
            let value: serde_json::Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("{} is not valid JSON ({}); skipping", name, e);
                    continue;
                }
            };

            // A missing version is tolerated (early exports carried none);
            // a present-but-different one is another processor's file.
            if let Some(v) = value
                .get("metadata")
                .and_then(|m| m.get("schema_version"))
                .and_then(|v| v.as_str())
            {
                if SchemaVersion::parse(v) != Some(self.expected) {
                    tracing::warn!(
                        "{} has schema version {} but this run expects {}; skipping",
                        name,
                        v,
                        self.expected.as_str()
                    );
                    continue;
                }
            }

            match serde_json::from_value::<StudentRecord>(value) {
                Ok(r) => records.push(r),
                Err(e) => {
                    tracing::warn!("{} does not parse as a student record ({}); skipping", name, e);
                }
            }
        }

        tracing::info!("loaded {} student records from {}", records.len(), self.dir.display());
        Ok(records)
    }

    fn save(&self, record: &StudentRecord) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create store directory {}", self.dir.display()))?;
        let path = self.record_path(record);
        let text = serde_json::to_string_pretty(record).context("failed to serialize record")?;
        std::fs::write(&path, text)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Aggregate the collection into one export document, students ordered by
/// class then last name.
pub fn export_master(records: &[StudentRecord]) -> serde_json::Value {
    let mut sorted: Vec<&StudentRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        (a.class_name.as_str(), a.last_name.as_str(), a.first_name.as_str()).cmp(&(
            b.class_name.as_str(),
            b.last_name.as_str(),
            b.first_name.as_str(),
        ))
    });

    json!({
        "metadata": {
            "exported_at": chrono::Utc::now().to_rfc3339(),
            "schema_version": CURRENT_SCHEMA_VERSION,
            "total_students": sorted.len(),
        },
        "students": sorted,
    })
}

/// Write the master export to a file. Returns the number of students
/// exported.
pub fn write_master(records: &[StudentRecord], out_path: &Path) -> anyhow::Result<usize> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let doc = export_master(records);
    let text = serde_json::to_string_pretty(&doc).context("failed to serialize master export")?;
    std::fs::write(out_path, text)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    tracing::info!("exported {} students to {}", records.len(), out_path.display());
    Ok(records.len())
}
