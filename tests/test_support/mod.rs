#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub const CLASS_TEACHER: &str = "ct-1";
pub const ADMIN: &str = "admin-1";
pub const DB_FILE_NAME: &str = "reportcard.sqlite3";

pub fn temp_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("reportcardd-test-")
        .tempdir()
        .expect("create temp dir")
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        Self::spawn_with_args(&[])
    }

    pub fn spawn_with_args(args: &[&str]) -> Self {
        let exe = env!("CARGO_BIN_EXE_reportcardd");
        let mut child = Command::new(exe)
            .args(args)
            .env_remove("REPORTCARDD_WORKSPACE")
            .env_remove("REPORTCARDD_BUSY_TIMEOUT_MS")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn reportcardd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    pub fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Expect a failure and return its `error` object.
    pub fn request_err(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error object")
    }

    pub fn error_code(&mut self, method: &str, params: Value) -> String {
        self.request_err(method, params)["code"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    pub fn select_workspace(&mut self, path: &Path) {
        self.request_ok("workspace.select", json!({ "path": path.to_string_lossy() }));
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// One exam for grade g7 with `math` and `sci` (out of 100, taught by `t-math` and
/// `t-sci`) and class 7A led by [`CLASS_TEACHER`].
pub struct Seeded {
    pub exam_id: String,
    pub class_id: String,
    pub students: Vec<String>,
}

pub fn seed(sc: &mut Sidecar, student_names: &[&str]) -> Seeded {
    let exam = sc.request_ok(
        "exams.create",
        json!({
            "name": "Term 1 Midterm",
            "gradeId": "g7",
            "year": 2026,
            "term": 1,
            "examType": "midterm"
        }),
    );
    let exam_id = exam["id"].as_str().expect("exam id").to_string();
    for subject in ["math", "sci"] {
        sc.request_ok(
            "examSubjects.add",
            json!({
                "examId": exam_id,
                "subjectId": subject,
                "subjectName": subject.to_uppercase(),
                "maxMarks": 100,
                "teacherId": format!("t-{subject}")
            }),
        );
    }
    let class = sc.request_ok(
        "classes.create",
        json!({ "name": "7A", "gradeId": "g7", "classTeacherId": CLASS_TEACHER }),
    );
    let class_id = class["id"].as_str().expect("class id").to_string();
    let students = student_names
        .iter()
        .map(|name| {
            sc.request_ok(
                "students.create",
                json!({ "classId": class_id, "displayName": name }),
            )["id"]
                .as_str()
                .expect("student id")
                .to_string()
        })
        .collect();
    Seeded {
        exam_id,
        class_id,
        students,
    }
}

/// Submit one subject's marks as its subject teacher, index-aligned with the roster.
pub fn submit(sc: &mut Sidecar, seeded: &Seeded, subject: &str, marks: &[Option<f64>]) -> Value {
    let entries: Vec<Value> = marks
        .iter()
        .zip(&seeded.students)
        .map(|(m, s)| json!({ "studentId": s, "marksObtained": m }))
        .collect();
    sc.request_ok(
        "marks.submit",
        json!({
            "examId": seeded.exam_id,
            "subjectId": subject,
            "entries": entries,
            "actorId": format!("t-{subject}"),
            "actorRole": "subject_teacher"
        }),
    )
}

pub fn transition(sc: &mut Sidecar, seeded: &Seeded, action: &str, actor_id: &str, role: &str) -> Value {
    sc.request(
        "workflow.transition",
        json!({
            "examId": seeded.exam_id,
            "classId": seeded.class_id,
            "action": action,
            "actorId": actor_id,
            "actorRole": role
        }),
    )
}

/// Walk a fully marked class from MARKS_ENTRY to APPROVED.
pub fn approve_class(sc: &mut Sidecar, seeded: &Seeded) {
    for (action, actor, role) in [
        ("submit_for_review", CLASS_TEACHER, "class_teacher"),
        ("review", CLASS_TEACHER, "class_teacher"),
        ("approve", ADMIN, "admin"),
    ] {
        let resp = transition(sc, seeded, action, actor, role);
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", action, resp);
    }
}

pub fn workflow_status(sc: &mut Sidecar, seeded: &Seeded) -> String {
    sc.request_ok(
        "workflow.get",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    )["status"]
        .as_str()
        .expect("status")
        .to_string()
}

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE_NAME)
}
