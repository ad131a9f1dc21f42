use crate::calc::{self, CalcContext};
use crate::ipc::helpers::{opt_str_param, settings, str_param, to_json, with_conn, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::reportcards;
use rusqlite::Connection;
use serde_json::json;

fn results_aggregate(conn: &Connection, req: &Request) -> HandlerResult {
    let exam_id = str_param(req, "examId")?;
    let class_id = str_param(req, "classId")?;
    let scale = settings(conn)?.grade_scale;
    let mut results = calc::compute_class_results(
        &CalcContext {
            conn,
            exam_id,
            class_id,
        },
        scale,
    )?;
    if let Some(student_id) = opt_str_param(req, "studentId")? {
        results = calc::only_student(results, student_id)?;
    }
    to_json(&results)
}

fn report_cards_get(conn: &Connection, req: &Request) -> HandlerResult {
    let card = reportcards::get_report_card(conn, str_param(req, "examId")?, str_param(req, "studentId")?)?;
    to_json(&card)
}

fn report_cards_list_for_class(conn: &Connection, req: &Request) -> HandlerResult {
    let cards =
        reportcards::list_for_class(conn, str_param(req, "examId")?, str_param(req, "classId")?)?;
    Ok(json!({ "reportCards": cards }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Request) -> HandlerResult = match req.method.as_str() {
        "results.aggregate" => results_aggregate,
        "reportCards.get" => report_cards_get,
        "reportCards.listForClass" => report_cards_list_for_class,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, req)))
}
