use crate::ipc::helpers::{actor_param, settings, str_param, to_json, with_conn, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::marks::{self, MarkEntry};
use rusqlite::Connection;
use serde_json::json;

fn parse_entries(req: &Request) -> Result<Vec<MarkEntry>, HandlerErr> {
    let Some(raw) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("entries must be an array"));
    };
    let mut out = Vec::with_capacity(raw.len());
    for (i, item) in raw.iter().enumerate() {
        let Some(student_id) = item.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "entry missing studentId".into(),
                details: Some(json!({ "index": i })),
            });
        };
        // Explicit null is an absence; a missing key is a malformed entry.
        let marks_obtained = match item.get("marksObtained") {
            Some(serde_json::Value::Null) => None,
            Some(v) => match v.as_f64() {
                Some(n) => Some(n),
                None => {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: "marksObtained must be a number or null".into(),
                        details: Some(json!({ "index": i })),
                    })
                }
            },
            None => {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: "entry missing marksObtained".into(),
                    details: Some(json!({ "index": i })),
                })
            }
        };
        out.push(MarkEntry {
            student_id: student_id.to_string(),
            marks_obtained,
        });
    }
    Ok(out)
}

fn marks_submit(conn: &Connection, req: &Request) -> HandlerResult {
    let exam_id = str_param(req, "examId")?;
    let subject_ref = str_param(req, "subjectId")?;
    let entries = parse_entries(req)?;
    let actor = actor_param(req)?;
    let settings = settings(conn)?;
    let outcome = marks::submit_marks(conn, &settings, exam_id, subject_ref, &entries, &actor)?;
    to_json(&outcome)
}

fn marks_get(conn: &Connection, req: &Request) -> HandlerResult {
    let rows = marks::list_marks(conn, str_param(req, "examId")?, str_param(req, "classId")?)?;
    Ok(json!({ "marks": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.submit" => Some(with_conn(state, req, |conn| marks_submit(conn, req))),
        "marks.get" => Some(with_conn(state, req, |conn| marks_get(conn, req))),
        _ => None,
    }
}
