use crate::ipc::helpers::{
    bool_param, f64_param, i64_param, opt_str_param, str_param, to_json, with_conn, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::registry::{self, ExamStatus, NewExam};
use rusqlite::Connection;
use serde_json::json;

fn exams_create(conn: &Connection, req: &Request) -> HandlerResult {
    let exam = registry::create_exam(
        conn,
        &NewExam {
            name: str_param(req, "name")?,
            grade_id: str_param(req, "gradeId")?,
            year: i64_param(req, "year")?,
            term: i64_param(req, "term")?,
            exam_type: str_param(req, "examType")?,
        },
    )?;
    tracing::info!(exam_id = %exam.id, grade_id = %exam.grade_id, "exam created");
    to_json(&exam)
}

fn exams_list(conn: &Connection, req: &Request) -> HandlerResult {
    let exams = registry::list_exams(conn, opt_str_param(req, "gradeId")?)?;
    Ok(json!({ "exams": exams }))
}

fn exams_set_status(conn: &Connection, req: &Request) -> HandlerResult {
    let exam_id = str_param(req, "examId")?;
    let raw = str_param(req, "status")?;
    let Some(status) = ExamStatus::parse(raw) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "status must be one of: DRAFT, PUBLISHED, ONGOING, COMPLETED".into(),
            details: Some(json!({ "status": raw })),
        });
    };
    to_json(&registry::set_exam_status(conn, exam_id, status)?)
}

fn exam_subjects_add(conn: &Connection, req: &Request) -> HandlerResult {
    let subject = registry::add_exam_subject(
        conn,
        str_param(req, "examId")?,
        str_param(req, "subjectId")?,
        str_param(req, "subjectName")?,
        f64_param(req, "maxMarks")?,
        opt_str_param(req, "teacherId")?,
    )?;
    to_json(&subject)
}

fn exam_subjects_list(conn: &Connection, req: &Request) -> HandlerResult {
    let exam_id = str_param(req, "examId")?;
    registry::get_exam(conn, exam_id)?;
    let subjects = registry::exam_subjects(conn, exam_id)?;
    Ok(json!({ "subjects": subjects }))
}

fn classes_create(conn: &Connection, req: &Request) -> HandlerResult {
    let class = registry::create_class(
        conn,
        str_param(req, "name")?,
        str_param(req, "gradeId")?,
        opt_str_param(req, "classTeacherId")?,
    )?;
    to_json(&class)
}

fn classes_list(conn: &Connection, req: &Request) -> HandlerResult {
    let classes = registry::list_classes(conn, opt_str_param(req, "gradeId")?)?;
    Ok(json!({ "classes": classes }))
}

fn students_create(conn: &Connection, req: &Request) -> HandlerResult {
    let student = registry::create_student(
        conn,
        str_param(req, "classId")?,
        str_param(req, "displayName")?,
    )?;
    to_json(&student)
}

fn students_list(conn: &Connection, req: &Request) -> HandlerResult {
    let class_id = str_param(req, "classId")?;
    registry::get_class(conn, class_id)?;
    let students =
        registry::list_students(conn, class_id, bool_param(req, "includeInactive", false)?)?;
    Ok(json!({ "students": students }))
}

fn students_set_active(conn: &Connection, req: &Request) -> HandlerResult {
    let student_id = str_param(req, "studentId")?;
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::bad_params("active must be boolean"));
    };
    registry::set_student_active(conn, student_id, active)?;
    Ok(json!({ "studentId": student_id, "active": active }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Request) -> HandlerResult = match req.method.as_str() {
        "exams.create" => exams_create,
        "exams.list" => exams_list,
        "exams.setStatus" => exams_set_status,
        "examSubjects.add" => exam_subjects_add,
        "examSubjects.list" => exam_subjects_list,
        "classes.create" => classes_create,
        "classes.list" => classes_list,
        "students.create" => students_create,
        "students.list" => students_list,
        "students.setActive" => students_set_active,
        _ => return None,
    };
    Some(with_conn(state, req, |conn| f(conn, req)))
}
