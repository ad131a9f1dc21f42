use crate::completion;
use crate::ipc::helpers::{
    actor_param, opt_i64_param, opt_str_param, settings, str_param, to_json, with_conn, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::registry;
use crate::workflow::{self, TransitionRequest, WorkflowAction};
use rusqlite::Connection;
use serde_json::json;

fn workflow_transition(conn: &Connection, req: &Request) -> HandlerResult {
    let exam_id = str_param(req, "examId")?;
    let class_id = str_param(req, "classId")?;
    let raw_action = str_param(req, "action")?;
    let Some(action) = WorkflowAction::parse(raw_action) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "unknown workflow action".into(),
            details: Some(json!({ "action": raw_action })),
        });
    };
    let actor = actor_param(req)?;
    let settings = settings(conn)?;
    let outcome = workflow::transition(
        conn,
        &settings,
        exam_id,
        class_id,
        &TransitionRequest {
            action,
            actor: &actor,
            reason: opt_str_param(req, "reason")?,
            expected_version: opt_i64_param(req, "expectedVersion")?,
        },
    )?;
    to_json(&outcome)
}

fn workflow_get(conn: &Connection, req: &Request) -> HandlerResult {
    let exam_id = str_param(req, "examId")?;
    let class_id = str_param(req, "classId")?;
    registry::exam_and_class(conn, exam_id, class_id)?;
    to_json(&workflow::load(conn, exam_id, class_id)?)
}

fn workflow_history(conn: &Connection, req: &Request) -> HandlerResult {
    let exam_id = str_param(req, "examId")?;
    let class_id = str_param(req, "classId")?;
    registry::exam_and_class(conn, exam_id, class_id)?;
    let events = workflow::history(conn, exam_id, class_id)?;
    Ok(json!({ "events": events }))
}

fn progress_get(conn: &Connection, req: &Request) -> HandlerResult {
    let exam_id = str_param(req, "examId")?;
    let class_id = str_param(req, "classId")?;
    let progress = completion::class_progress(conn, exam_id, class_id)?;
    let wf = workflow::load(conn, exam_id, class_id)?;
    let mut out = to_json(&progress)?;
    out["status"] = json!(wf.status);
    out["version"] = json!(wf.version);
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Request) -> HandlerResult = match req.method.as_str() {
        "workflow.transition" => workflow_transition,
        "workflow.get" => workflow_get,
        "workflow.history" => workflow_history,
        "progress.get" => progress_get,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, req)))
}
