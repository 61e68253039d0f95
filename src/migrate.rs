use crate::curriculum;
use crate::model::StudentRecord;
use crate::schema::{FieldAdapter, SchemaVersion};
use anyhow::Context;
use chrono::NaiveDate;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const SNAPSHOT_FORMAT: &str = "progressbook-collection-v1";

#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped_current: usize,
    pub skipped_unknown: usize,
    pub errors: usize,
    pub snapshot: Option<PathBuf>,
}

/// Migrate every record document in `dir` to `target`, one schema step at a
/// time. Offline batch operation, not part of normal ingestion. The
/// collection is zipped (with per-file checksums) before the first file is
/// touched; already-current and unrecognized files are left alone.
pub fn migrate_collection(
    dir: &Path,
    target: SchemaVersion,
    today: NaiveDate,
) -> anyhow::Result<MigrationReport> {
    let mut report = MigrationReport::default();

    let files = record_files(dir)?;
    if files.is_empty() {
        tracing::info!("no record files in {}; nothing to migrate", dir.display());
        return Ok(report);
    }

    let snapshot_path = dir.join(format!("_snapshot_{}.zip", today));
    snapshot_collection(dir, &snapshot_path)?;
    report.snapshot = Some(snapshot_path);

    for name in files {
        let path = dir.join(&name);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("{} is not valid JSON ({}); skipping", name, e);
                report.skipped_unknown += 1;
                continue;
            }
        };

        let version = value
            .get("metadata")
            .and_then(|m| m.get("schema_version"))
            .and_then(Value::as_str)
            .and_then(SchemaVersion::parse);
        let Some(mut version) = version else {
            tracing::warn!("{} has no recognizable schema version; skipping", name);
            report.skipped_unknown += 1;
            continue;
        };

        if version == target {
            report.skipped_current += 1;
            continue;
        }
        if version > target {
            tracing::warn!(
                "{} is already past {} ({}); skipping",
                name,
                target.as_str(),
                version.as_str()
            );
            report.skipped_unknown += 1;
            continue;
        }

        while version < target {
            match version {
                SchemaVersion::V3 => migrate_v3_to_v4(&mut value, today),
                SchemaVersion::V4 => migrate_v4_to_v5(&mut value, today),
                SchemaVersion::V5 => unreachable!("V5 is the last version"),
            }
            version = version.next().expect("next version below target");
        }

        // Derived fields are recomputed at the destination version, never
        // copied through, and the round-trip doubles as shape validation.
        let value = if target == SchemaVersion::CURRENT {
            match serde_json::from_value::<StudentRecord>(value) {
                Ok(mut record) => {
                    curriculum::recompute_objective_summary(&mut record);
                    serde_json::to_value(&record).context("failed to reserialize record")?
                }
                Err(e) => {
                    tracing::warn!("{} failed validation after migration ({}); not written", name, e);
                    report.errors += 1;
                    continue;
                }
            }
        } else {
            value
        };

        let text =
            serde_json::to_string_pretty(&value).context("failed to serialize migrated record")?;
        std::fs::write(&path, text)
            .with_context(|| format!("failed to write {}", path.display()))?;
        report.migrated += 1;
    }

    tracing::info!(
        "migration to {} complete: {} migrated, {} already current, {} skipped, {} errors",
        target.as_str(),
        report.migrated,
        report.skipped_current,
        report.skipped_unknown,
        report.errors
    );
    Ok(report)
}

/// Zip every record file with a manifest of SHA-256 checksums. The bundle
/// lands inside the collection directory under a `_` name so the store
/// ignores it.
pub fn snapshot_collection(dir: &Path, out_path: &Path) -> anyhow::Result<usize> {
    let files = record_files(dir)?;

    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create snapshot {}", out_path.display()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries: Vec<(String, Vec<u8>, String)> = Vec::new();
    for name in &files {
        let bytes = std::fs::read(dir.join(name))
            .with_context(|| format!("failed to read {}", name))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        entries.push((name.clone(), bytes, digest));
    }

    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": SNAPSHOT_FORMAT,
        "app_version": env!("CARGO_PKG_VERSION"),
        "created_at": created_at,
        "files": entries
            .iter()
            .map(|(name, _, sha)| json!({ "name": name, "sha256": sha }))
            .collect::<Vec<_>>(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    for (name, bytes, _) in &entries {
        zip.start_file(format!("records/{}", name), opts)
            .with_context(|| format!("failed to start entry for {}", name))?;
        zip.write_all(bytes)
            .with_context(|| format!("failed to write entry for {}", name))?;
    }

    zip.finish().context("failed to finalize snapshot")?;
    tracing::info!(
        "snapshot of {} records written to {}",
        entries.len(),
        out_path.display()
    );
    Ok(entries.len())
}

fn record_files(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for ent in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read collection directory {}", dir.display()))?
    {
        let ent = ent?;
        let name = ent.file_name().to_string_lossy().to_string();
        if name.ends_with(".json") && !name.starts_with('_') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// v3 → v4: rename the detail bag, retype board participation and SD topic
/// tests, fill in assessment labels, null the enrolled date.
fn migrate_v3_to_v4(value: &mut Value, today: NaiveDate) {
    let from = FieldAdapter::new(SchemaVersion::V3);
    let to = FieldAdapter::new(SchemaVersion::V4);

    if let Some(assessments) = value.get_mut("assessments").and_then(Value::as_array_mut) {
        for assessment in assessments {
            let Some(obj) = assessment.as_object_mut() else {
                continue;
            };

            let column = obj
                .get("column")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let mut kind = obj
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if kind == from.board_solving_name() {
                kind = to.board_solving_name().to_string();
            }
            if kind == from.topic_test_name() && is_sd_column(&column) {
                kind = to.topic_test_name().to_string();
            }
            obj.insert("type".into(), json!(kind));

            if let Some(details) = obj.remove(from.details_field()) {
                obj.insert(to.details_field().into(), normalize_details(details));
            }

            if to.has_assessment_labels() {
                if obj.get("assessment_id").map_or(true, Value::is_null) {
                    if let Some(id) = assessment_id_for(&column, &kind) {
                        obj.insert("assessment_id".into(), json!(id));
                    }
                }
                if obj.get("assessment_title").map_or(true, Value::is_null) {
                    let task_name = obj.get("task_name").and_then(Value::as_str);
                    obj.insert(
                        "assessment_title".into(),
                        json!(assessment_title_for(&column, task_name)),
                    );
                }
            }
        }
    }

    if let Some(academic) = value.get_mut("academic").and_then(Value::as_object_mut) {
        academic.insert("enrolled_date".into(), Value::Null);
    }

    stamp_version(value, SchemaVersion::V4, today);
}

/// v4 → v5: scaffold the containers the dynamic-column pipeline writes
/// into. Purely additive; existing data is untouched.
fn migrate_v4_to_v5(value: &mut Value, today: NaiveDate) {
    let Some(root) = value.as_object_mut() else {
        return;
    };

    let profile = ensure_object(root, "profile");
    let attrs = ensure_object(profile, "learning_attributes");
    for key in [
        "writing_quality",
        "notebook_organization",
        "reflective_practice",
        "math_communication",
    ] {
        attrs.entry(key).or_insert_with(|| json!("developing"));
    }
    attrs.entry("seeks_tutoring").or_insert_with(|| json!(false));
    ensure_object(profile, "notes");

    let progress = ensure_object(root, "curriculum_progress");
    ensure_object(progress, "cambridge_objectives");
    ensure_object(progress, "material_completion");

    // Early exports kept social hours at the top level.
    let legacy_hours = root.remove("social_hours");
    let engagement = ensure_object(root, "engagement");
    for key in ["attendance_records", "attendance_notes", "consultations"] {
        engagement.entry(key).or_insert_with(|| json!([]));
    }
    match legacy_hours {
        Some(hours) if !engagement.contains_key("social_hours") => {
            engagement.insert("social_hours".into(), hours);
        }
        _ => {
            engagement.entry("social_hours").or_insert_with(|| json!(0.0));
        }
    }

    root.entry("cambridge_missions").or_insert_with(|| json!([]));

    stamp_version(value, SchemaVersion::V5, today);
}

fn ensure_object<'a>(
    obj: &'a mut serde_json::Map<String, Value>,
    key: &str,
) -> &'a mut serde_json::Map<String, Value> {
    let entry = obj.entry(key).or_insert_with(|| json!({}));
    if !entry.is_object() {
        *entry = json!({});
    }
    entry.as_object_mut().expect("just ensured object")
}

fn stamp_version(value: &mut Value, version: SchemaVersion, today: NaiveDate) {
    if let Some(root) = value.as_object_mut() {
        let metadata = ensure_object(root, "metadata");
        metadata.insert("schema_version".into(), json!(version.as_str()));
        metadata.insert("updated_at".into(), json!(today.to_string()));
    }
}

fn is_sd_column(column: &str) -> bool {
    column
        .strip_prefix("SD")
        .map_or(false, |rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// The v3 detail bag was written sparsely; v4 carries all three slots.
fn normalize_details(details: Value) -> Value {
    let mut out = serde_json::Map::new();
    let source = details.as_object().cloned().unwrap_or_default();
    for key in ["percentage_score", "myp_score", "cambridge_score"] {
        out.insert(
            key.into(),
            source.get(key).cloned().unwrap_or(Value::Null),
        );
    }
    for (key, v) in source {
        if !out.contains_key(&key) && key != "max_points" {
            out.insert(key, v);
        }
    }
    Value::Object(out)
}

fn assessment_id_for(column: &str, kind: &str) -> Option<String> {
    let col = column.to_lowercase();
    let id = match kind {
        "homework" => format!("homework-{}", col),
        "classwork" => format!("classwork-{}", col),
        "diagnostic" => format!("diagnostic-{}", col.replace("diag", "")),
        "board_solving" => format!("board-solving-{}", col),
        "consultation" => format!("consultation-{}", col),
        "summative" => format!("summative-{}", col),
        "test" => format!("test-{}", col),
        _ => return None,
    };
    Some(id)
}

fn assessment_title_for(column: &str, task_name: Option<&str>) -> String {
    if let Some(task) = task_name {
        if !task.is_empty() && task != column {
            return task.to_string();
        }
    }
    let col = column.to_uppercase();
    if col.starts_with("ND") {
        format!("Homework {}", col)
    } else if col.starts_with("EXT") {
        format!("Classwork {}", col)
    } else if col.starts_with("LNT") {
        format!("Board Solving {}", col)
    } else if col.starts_with("KONS") {
        format!("Consultation {}", col)
    } else if col.starts_with("KD") {
        format!("Summative {}", col)
    } else if col.starts_with("SD") {
        format!("Test {}", col.replace("SD", ""))
    } else {
        column.to_string()
    }
}
