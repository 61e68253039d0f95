use chrono::NaiveDate;
use progressbook::migrate::{migrate_collection, snapshot_collection};
use progressbook::schema::SchemaVersion;
use progressbook::store::{JsonDirStore, RecordStore};
use serde_json::json;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
}

fn write_v3_record(dir: &PathBuf) {
    let record = json!({
        "id": "ST00001",
        "first_name": "Jonas",
        "last_name": "Petraitis",
        "class_name": "8A",
        "academic": {
            "year": "2024-2025",
            "grade": 8,
            "class_id": "8a",
            "enrolled_date": "2024-09-01"
        },
        "assessments": [
            {
                "date": "2024-10-01",
                "column": "LNT2",
                "type": "participation",
                "task_name": "LNT2: Board Participation",
                "score": "2",
                "comment": "",
                "added": "2024-10-02"
            },
            {
                "date": "2024-10-05",
                "column": "SD1",
                "type": "summative",
                "task_name": "Summative assessment 1",
                "score": "75",
                "comment": "",
                "added": "2024-10-06",
                "summative_details": {
                    "percentage_score": 75.0,
                    "cambridge_score": 0.5
                }
            }
        ],
        "social_hours": 3.0,
        "metadata": { "schema_version": "3.0" }
    });
    std::fs::write(
        dir.join("Jonas_Petraitis.json"),
        serde_json::to_string_pretty(&record).unwrap(),
    )
    .expect("write v3 record");
}

#[test]
fn v3_collection_migrates_to_current_and_rerun_is_noop() {
    let dir = temp_dir("progressbook-migrate");
    write_v3_record(&dir);

    let report =
        migrate_collection(&dir, SchemaVersion::CURRENT, d("2025-07-01")).expect("migrate");
    assert_eq!(report.migrated, 1);
    assert_eq!(report.errors, 0);
    let snapshot = report.snapshot.expect("snapshot path");
    assert!(snapshot.exists(), "pre-migration snapshot must be written");

    // The migrated file loads as a current-version record with every
    // assessment preserved and the derived summary recomputed.
    let records = JsonDirStore::new(&dir).load_all().expect("load");
    assert_eq!(records.len(), 1);
    let student = &records[0];
    assert_eq!(student.metadata.schema_version, "5.0");
    assert_eq!(student.assessments.len(), 2);
    assert_eq!(student.engagement.social_hours, 3.0);

    let lnt = student
        .assessments
        .iter()
        .find(|a| a.column == "LNT2")
        .expect("lnt2");
    assert_eq!(lnt.kind, progressbook::model::AssessmentKind::BoardSolving);

    let sd = student
        .assessments
        .iter()
        .find(|a| a.column == "SD1")
        .expect("sd1");
    assert_eq!(sd.kind, progressbook::model::AssessmentKind::Test);
    let details = sd.evaluation_details.as_ref().expect("details");
    assert_eq!(details.percentage_score, Some(75.0));
    assert_eq!(details.cambridge_score, Some(0.5));

    // Second pass finds nothing left to do.
    let report =
        migrate_collection(&dir, SchemaVersion::CURRENT, d("2025-07-02")).expect("re-migrate");
    assert_eq!(report.migrated, 0);
    assert_eq!(report.skipped_current, 1);
}

#[test]
fn unknown_versions_are_skipped_not_failed() {
    let dir = temp_dir("progressbook-migrate-unknown");
    write_v3_record(&dir);
    std::fs::write(
        dir.join("Strange_File.json"),
        serde_json::to_string_pretty(&json!({
            "first_name": "X",
            "metadata": { "schema_version": "9.9" }
        }))
        .unwrap(),
    )
    .expect("write odd file");

    let report =
        migrate_collection(&dir, SchemaVersion::CURRENT, d("2025-07-01")).expect("migrate");
    assert_eq!(report.migrated, 1);
    assert_eq!(report.skipped_unknown, 1);
}

#[test]
fn snapshot_lists_every_record_with_a_checksum() {
    let dir = temp_dir("progressbook-snapshot");
    write_v3_record(&dir);

    let out = dir.join("_snapshot_test.zip");
    let count = snapshot_collection(&dir, &out).expect("snapshot");
    assert_eq!(count, 1);

    let file = std::fs::File::open(&out).expect("open snapshot");
    let mut archive = zip::ZipArchive::new(file).expect("zip");
    let manifest: serde_json::Value = {
        use std::io::Read;
        let mut entry = archive.by_name("manifest.json").expect("manifest entry");
        let mut text = String::new();
        entry.read_to_string(&mut text).expect("read manifest");
        serde_json::from_str(&text).expect("manifest json")
    };
    assert_eq!(manifest["format"], "progressbook-collection-v1");
    let files = manifest["files"].as_array().expect("files");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], "Jonas_Petraitis.json");
    assert_eq!(
        files[0]["sha256"].as_str().map(str::len),
        Some(64),
        "sha256 hex digest expected"
    );
    assert!(archive.by_name("records/Jonas_Petraitis.json").is_ok());
}
