mod test_support;

use serde_json::json;
use test_support::{seed, temp_dir, Sidecar};

#[test]
fn protocol_errors_are_reported_not_fatal() {
    let mut sc = Sidecar::spawn();

    let health = sc.request_ok("health", json!({}));
    assert_eq!(health["workspacePath"], json!(null));
    assert!(health["version"].as_str().is_some());

    let resp = sc.send_raw("{not json");
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_json"));

    assert_eq!(sc.error_code("exams.list", json!({})), "no_workspace");
    assert_eq!(sc.error_code("grid.get", json!({})), "not_implemented");
    assert_eq!(sc.error_code("workspace.select", json!({})), "bad_params");

    // Still serving after the failures above.
    sc.request_ok("health", json!({}));
}

#[test]
fn setup_defaults_and_validated_updates() {
    let workspace = temp_dir();
    let mut sc = Sidecar::spawn();
    sc.select_workspace(workspace.path());

    let setup = sc.request_ok("setup.get", json!({}));
    assert_eq!(setup["grading"]["scale"], json!("standard"));
    assert_eq!(setup["workflow"]["autoSubmitForReview"], json!(false));
    assert_eq!(setup["workflow"]["enforceAssignment"], json!(true));
    assert_eq!(setup["marks"]["maxEntriesPerSubmission"], json!(5000));

    for (section, patch) in [
        ("grading", json!({ "scale": "letters" })),
        ("grading", json!({ "thresholds": [] })),
        ("workflow", json!({ "autoSubmitForReview": "yes" })),
        ("marks", json!({ "maxEntriesPerSubmission": 9000 })),
        ("printing", json!({})),
    ] {
        let code = sc.error_code("setup.update", json!({ "section": section, "patch": patch }));
        assert_eq!(code, "bad_params", "{} {}", section, patch);
    }

    let updated = sc.request_ok(
        "setup.update",
        json!({ "section": "grading", "patch": { "scale": "extended" } }),
    );
    assert_eq!(updated["value"]["scale"], json!("extended"));

    // Settings live in the workspace and survive a restart.
    drop(sc);
    let mut sc = Sidecar::spawn_with_args(&["--workspace", &workspace.path().to_string_lossy()]);
    let setup = sc.request_ok("setup.get", json!({}));
    assert_eq!(setup["grading"]["scale"], json!("extended"));
}

#[test]
fn registry_calls_round_trip() {
    let workspace = temp_dir();
    let mut sc = Sidecar::spawn();
    sc.select_workspace(workspace.path());
    let seeded = seed(&mut sc, &["Asha"]);

    let exams = sc.request_ok("exams.list", json!({ "gradeId": "g7" }));
    assert_eq!(exams["exams"][0]["status"], json!("DRAFT"));
    assert_eq!(sc.request_ok("exams.list", json!({ "gradeId": "g9" }))["exams"], json!([]));

    let exam = sc.request_ok(
        "exams.setStatus",
        json!({ "examId": seeded.exam_id, "status": "ongoing" }),
    );
    assert_eq!(exam["status"], json!("ONGOING"));
    assert_eq!(
        sc.error_code("exams.setStatus", json!({ "examId": seeded.exam_id, "status": "ARCHIVED" })),
        "bad_params"
    );
    assert_eq!(
        sc.error_code("exams.setStatus", json!({ "examId": "missing", "status": "DRAFT" })),
        "not_found"
    );

    let subjects = sc.request_ok("examSubjects.list", json!({ "examId": seeded.exam_id }));
    let names: Vec<&str> = subjects["subjects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["subjectId"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["math", "sci"]);

    let dup = sc.request_err(
        "examSubjects.add",
        json!({
            "examId": seeded.exam_id,
            "subjectId": "math",
            "subjectName": "Maths again",
            "maxMarks": 50
        }),
    );
    assert_eq!(dup["code"], json!("validation_error"));
    let zero = sc.request_err(
        "examSubjects.add",
        json!({
            "examId": seeded.exam_id,
            "subjectId": "art",
            "subjectName": "Art",
            "maxMarks": 0
        }),
    );
    assert_eq!(zero["code"], json!("validation_error"));

    let classes = sc.request_ok("classes.list", json!({}));
    assert_eq!(classes["classes"][0]["classTeacherId"], json!("ct-1"));
}
