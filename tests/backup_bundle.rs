mod test_support;

use serde_json::json;
use test_support::{approve_class, seed, submit, temp_dir, transition, Sidecar, ADMIN};

#[test]
fn published_workspace_survives_bundle_round_trip() {
    let workspace = temp_dir();
    let restored = temp_dir();
    let out_dir = temp_dir();
    let bundle = out_dir.path().join("term1.reportcard.zip");

    let mut sc = Sidecar::spawn();
    sc.select_workspace(workspace.path());
    let seeded = seed(&mut sc, &["Asha", "Bilal"]);
    submit(&mut sc, &seeded, "math", &[Some(90.0), Some(30.0)]);
    submit(&mut sc, &seeded, "sci", &[Some(80.0), Some(20.0)]);
    approve_class(&mut sc, &seeded);
    assert_eq!(transition(&mut sc, &seeded, "publish", ADMIN, "admin")["ok"], json!(true));
    let card = sc.request_ok(
        "reportCards.get",
        json!({ "examId": seeded.exam_id, "studentId": seeded.students[1] }),
    );

    let export = sc.request_ok(
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"], json!("reportcard-workspace-v1"));
    assert_eq!(export["dbSha256"].as_str().map(|s| s.len()), Some(64));

    let import = sc.request_ok(
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy(), "workspacePath": restored.path().to_string_lossy() }),
    );
    assert_eq!(import["dbSha256"], export["dbSha256"]);
    let health = sc.request_ok("health", json!({}));
    assert_eq!(
        health["workspacePath"],
        json!(restored.path().to_string_lossy())
    );

    let again = sc.request_ok(
        "reportCards.get",
        json!({ "examId": seeded.exam_id, "studentId": seeded.students[1] }),
    );
    assert_eq!(again, card);
    assert_eq!(again["overallGrade"], json!("F"));

    let missing = sc.request_err(
        "backup.importWorkspaceBundle",
        json!({ "inPath": out_dir.path().join("nope.zip").to_string_lossy() }),
    );
    assert_eq!(missing["code"], json!("not_found"));
}

fn write_bundle(path: &std::path::Path, manifest: serde_json::Value, db_bytes: &[u8]) {
    use std::io::Write;
    let file = std::fs::File::create(path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(file);
    let opts = zip::write::FileOptions::default();
    zip.start_file("manifest.json", opts).expect("start manifest");
    zip.write_all(manifest.to_string().as_bytes()).expect("write manifest");
    zip.start_file("db/reportcard.sqlite3", opts).expect("start db entry");
    zip.write_all(db_bytes).expect("write db entry");
    zip.finish().expect("finish bundle");
}

#[test]
fn rejected_import_keeps_the_open_workspace() {
    let workspace = temp_dir();
    let out_dir = temp_dir();
    let mut sc = Sidecar::spawn();
    sc.select_workspace(workspace.path());
    let seeded = seed(&mut sc, &["Asha"]);
    let db_before = std::fs::read(test_support::db_path(workspace.path())).expect("read db");

    let not_a_zip = out_dir.path().join("notes.txt");
    std::fs::write(&not_a_zip, b"plain text").expect("write file");
    let e = sc.request_err(
        "backup.importWorkspaceBundle",
        json!({ "inPath": not_a_zip.to_string_lossy() }),
    );
    assert_eq!(e["code"], json!("io_failed"));
    let exams = sc.request_ok("exams.list", json!({}));
    assert_eq!(exams["exams"][0]["id"], json!(seeded.exam_id));

    let tampered = out_dir.path().join("tampered.zip");
    write_bundle(
        &tampered,
        json!({
            "format": "reportcard-workspace-v1",
            "version": 1,
            "db": { "entry": "db/reportcard.sqlite3", "sha256": "0".repeat(64) }
        }),
        b"not the database the manifest describes",
    );
    let e = sc.request_err(
        "backup.importWorkspaceBundle",
        json!({ "inPath": tampered.to_string_lossy() }),
    );
    assert_eq!(e["code"], json!("io_failed"));
    assert!(
        e["message"].as_str().unwrap_or("").contains("checksum mismatch"),
        "{}",
        e
    );

    let health = sc.request_ok("health", json!({}));
    assert_eq!(health["workspacePath"], json!(workspace.path().to_string_lossy()));
    assert_eq!(
        std::fs::read(test_support::db_path(workspace.path())).expect("read db"),
        db_before
    );
    let progress = sc.request_ok(
        "progress.get",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    assert_eq!(progress["status"], json!("MARKS_ENTRY"));
}
