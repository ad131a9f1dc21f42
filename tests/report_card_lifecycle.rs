mod test_support;

use serde_json::json;
use test_support::{approve_class, seed, submit, temp_dir, transition, Sidecar, ADMIN};

#[test]
fn marks_to_published_report_card() {
    let workspace = temp_dir();
    let mut sc = Sidecar::spawn();
    sc.select_workspace(workspace.path());
    let seeded = seed(&mut sc, &["Asha", "Bilal", "Chen"]);
    let (s1, s2, s3) = (&seeded.students[0], &seeded.students[1], &seeded.students[2]);

    submit(&mut sc, &seeded, "math", &[Some(90.0), Some(70.0), Some(50.0)]);
    let out = submit(&mut sc, &seeded, "sci", &[Some(80.0), Some(60.0), Some(40.0)]);
    assert_eq!(out["allSubjectsCompleted"], json!(true));
    assert_eq!(out["classes"][0]["newlyCompleted"], json!(true));

    let progress = sc.request_ok(
        "progress.get",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    assert_eq!(progress["ready"], json!(true));
    assert_eq!(progress["completedSubjects"], json!(2));
    assert_eq!(progress["status"], json!("MARKS_ENTRY"));

    let agg = sc.request_ok(
        "results.aggregate",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    let rows = agg["results"].as_array().expect("results");
    let ids: Vec<&str> = rows.iter().map(|r| r["studentId"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![s1.as_str(), s2.as_str(), s3.as_str()]);
    let totals: Vec<f64> = rows.iter().map(|r| r["total"].as_f64().unwrap()).collect();
    assert_eq!(totals, vec![170.0, 130.0, 90.0]);
    let pcts: Vec<f64> = rows.iter().map(|r| r["percentage"].as_f64().unwrap()).collect();
    assert_eq!(pcts, vec![85.0, 65.0, 45.0]);
    let grades: Vec<&str> = rows.iter().map(|r| r["grade"].as_str().unwrap()).collect();
    assert_eq!(grades, vec!["A", "B", "C"]);
    let ranks: Vec<u64> = rows.iter().map(|r| r["rank"].as_u64().unwrap()).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
    assert_eq!(agg["classAverage"].as_f64(), Some(65.0));

    // Nothing readable until the class is published.
    let e = sc.request_err("reportCards.get", json!({ "examId": seeded.exam_id, "studentId": s1 }));
    assert_eq!(e["code"], json!("not_found"));

    approve_class(&mut sc, &seeded);
    let e = sc.request_err("reportCards.get", json!({ "examId": seeded.exam_id, "studentId": s1 }));
    assert_eq!(e["code"], json!("not_found"));

    let published = transition(&mut sc, &seeded, "publish", ADMIN, "admin");
    assert_eq!(published["ok"], json!(true), "{}", published);
    assert_eq!(published["result"]["newStatus"], json!("PUBLISHED"));
    assert_eq!(published["result"]["version"], json!(4));
    assert_eq!(published["result"]["reportCardsGenerated"], json!(3));

    let card = sc.request_ok("reportCards.get", json!({ "examId": seeded.exam_id, "studentId": s1 }));
    assert_eq!(card["percentage"].as_f64(), Some(85.0));
    assert_eq!(card["overallGrade"], json!("A"));
    assert_eq!(card["classRank"], json!(1));
    assert_eq!(card["classSize"], json!(3));
    assert_eq!(card["gradeScale"], json!("standard"));
    assert_eq!(card["subjects"].as_array().map(|s| s.len()), Some(2));
    assert_eq!(card["subjects"][0]["subjectId"], json!("math"));
    assert_eq!(card["subjects"][0]["classAverage"].as_f64(), Some(70.0));

    let list = sc.request_ok(
        "reportCards.listForClass",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    assert_eq!(list["reportCards"].as_array().map(|c| c.len()), Some(3));

    let wf = sc.request_ok(
        "workflow.get",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    assert_eq!(wf["publishedBy"], json!(ADMIN));
    assert_eq!(wf["submittedBy"], json!("ct-1"));

    let history = sc.request_ok(
        "workflow.history",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    let actions: Vec<&str> = history["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["submit_for_review", "review", "approve", "publish"]);
}

#[test]
fn aggregation_is_read_only_and_repeatable() {
    let workspace = temp_dir();
    let mut sc = Sidecar::spawn();
    sc.select_workspace(workspace.path());
    let seeded = seed(&mut sc, &["Asha", "Bilal", "Chen", "Dana"]);

    // Asha and Bilal tie; Dana is absent from sci.
    submit(&mut sc, &seeded, "math", &[Some(80.0), Some(90.0), Some(10.0), Some(60.0)]);
    submit(&mut sc, &seeded, "sci", &[Some(90.0), Some(80.0), Some(10.0), None]);

    let params = json!({ "examId": seeded.exam_id, "classId": seeded.class_id });
    let first = sc.request_ok("results.aggregate", params.clone());
    let second = sc.request_ok("results.aggregate", params);
    assert_eq!(first, second);

    let rows = first["results"].as_array().unwrap();
    let ranks: Vec<u64> = rows.iter().map(|r| r["rank"].as_u64().unwrap()).collect();
    assert_eq!(ranks, vec![1, 1, 3, 4]);
    // Roster order breaks the tie.
    assert_eq!(rows[0]["studentId"], json!(seeded.students[0]));
    assert_eq!(rows[1]["studentId"], json!(seeded.students[1]));

    let dana = &rows[2];
    assert_eq!(dana["studentId"], json!(seeded.students[3]));
    assert_eq!(dana["maxTotal"].as_f64(), Some(100.0));
    assert_eq!(dana["percentage"].as_f64(), Some(60.0));
    assert_eq!(dana["subjects"][1]["grade"], json!(null));

    let one = sc.request_ok(
        "results.aggregate",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id, "studentId": seeded.students[2] }),
    );
    assert_eq!(one["results"].as_array().map(|r| r.len()), Some(1));
    assert_eq!(one["results"][0]["rank"], json!(4));
    assert_eq!(one["classSize"], json!(4));

    let e = sc.request_err(
        "results.aggregate",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id, "studentId": "nobody" }),
    );
    assert_eq!(e["code"], json!("not_found"));

    let wf = sc.request_ok(
        "workflow.get",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    assert_eq!(wf["version"], json!(0));
}

#[test]
fn republish_regenerates_snapshots() {
    let workspace = temp_dir();
    let mut sc = Sidecar::spawn();
    sc.select_workspace(workspace.path());
    let seeded = seed(&mut sc, &["Asha", "Bilal"]);
    submit(&mut sc, &seeded, "math", &[Some(40.0), Some(60.0)]);
    submit(&mut sc, &seeded, "sci", &[Some(40.0), Some(60.0)]);
    approve_class(&mut sc, &seeded);
    assert_eq!(transition(&mut sc, &seeded, "publish", ADMIN, "admin")["ok"], json!(true));

    let params = json!({ "examId": seeded.exam_id, "studentId": seeded.students[0] });
    let before = sc.request_ok("reportCards.get", params.clone());

    sc.request_ok("setup.update", json!({ "section": "grading", "patch": { "scale": "extended" } }));
    let resp = transition(&mut sc, &seeded, "republish", ADMIN, "admin");
    assert_eq!(resp["result"]["newStatus"], json!("PUBLISHED"));
    assert_eq!(resp["result"]["reportCardsGenerated"], json!(2));

    let after = sc.request_ok("reportCards.get", params);
    assert_ne!(before["id"], after["id"]);
    assert_ne!(before["contentHash"], after["contentHash"]);
    assert_eq!(before["overallGrade"], json!("S"));
    assert_eq!(after["overallGrade"], json!("C"));
    assert_eq!(after["gradeScale"], json!("extended"));

    let e = sc.request_err(
        "workflow.transition",
        json!({
            "examId": seeded.exam_id,
            "classId": seeded.class_id,
            "action": "reject",
            "actorId": ADMIN,
            "actorRole": "admin"
        }),
    );
    assert_eq!(e["code"], json!("guard_violation"));
}
