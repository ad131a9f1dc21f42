//! Exams, subjects, classes and rosters.
//!
//! The school's admin application owns these records; the daemon keeps just enough
//! of them to scope marks and workflows, and exposes thin create/list calls.

use crate::db::now_rfc3339;
use crate::error::{EngineError, EngineResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

/// Exam-level lifecycle. Independent of the per-class report-card workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamStatus {
    Draft,
    Published,
    Ongoing,
    Completed,
}

impl ExamStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(Self::Draft),
            "PUBLISHED" => Some(Self::Published),
            "ONGOING" => Some(Self::Ongoing),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Published => "PUBLISHED",
            Self::Ongoing => "ONGOING",
            Self::Completed => "COMPLETED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    pub name: String,
    pub grade_id: String,
    pub year: i64,
    pub term: i64,
    pub exam_type: String,
    pub status: ExamStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSubject {
    pub id: String,
    pub exam_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub max_marks: f64,
    pub teacher_id: Option<String>,
    pub marks_entered: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    pub grade_id: String,
    pub class_teacher_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub class_id: String,
    pub display_name: String,
    pub active: bool,
    pub sort_order: i64,
}

pub struct NewExam<'a> {
    pub name: &'a str,
    pub grade_id: &'a str,
    pub year: i64,
    pub term: i64,
    pub exam_type: &'a str,
}

fn non_empty<'a>(value: &'a str, field: &str) -> EngineResult<&'a str> {
    let t = value.trim();
    if t.is_empty() {
        return Err(EngineError::validation(format!("{} must not be empty", field)));
    }
    Ok(t)
}

pub fn create_exam(conn: &Connection, new: &NewExam<'_>) -> EngineResult<Exam> {
    let name = non_empty(new.name, "name")?;
    let grade_id = non_empty(new.grade_id, "gradeId")?;
    let exam_type = non_empty(new.exam_type, "examType")?;
    if new.term < 1 {
        return Err(EngineError::validation_with(
            "term must be >= 1",
            json!({ "term": new.term }),
        ));
    }

    let exam = Exam {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        grade_id: grade_id.to_string(),
        year: new.year,
        term: new.term,
        exam_type: exam_type.to_string(),
        status: ExamStatus::Draft,
    };
    conn.execute(
        "INSERT INTO exams(id, name, grade_id, year, term, exam_type, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &exam.id,
            &exam.name,
            &exam.grade_id,
            exam.year,
            exam.term,
            &exam.exam_type,
            exam.status.as_str(),
            now_rfc3339(),
        ),
    )?;
    Ok(exam)
}

fn exam_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Exam> {
    let status: String = r.get(6)?;
    Ok(Exam {
        id: r.get(0)?,
        name: r.get(1)?,
        grade_id: r.get(2)?,
        year: r.get(3)?,
        term: r.get(4)?,
        exam_type: r.get(5)?,
        status: ExamStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown exam status {status:?}").into(),
            )
        })?,
    })
}

pub fn get_exam(conn: &Connection, exam_id: &str) -> EngineResult<Exam> {
    conn.query_row(
        "SELECT id, name, grade_id, year, term, exam_type, status FROM exams WHERE id = ?",
        [exam_id],
        exam_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("exam"))
}

pub fn list_exams(conn: &Connection, grade_id: Option<&str>) -> EngineResult<Vec<Exam>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, grade_id, year, term, exam_type, status
         FROM exams
         WHERE (?1 IS NULL OR grade_id = ?1)
         ORDER BY year DESC, term DESC, name",
    )?;
    let rows = stmt
        .query_map([grade_id], exam_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_exam_status(conn: &Connection, exam_id: &str, status: ExamStatus) -> EngineResult<Exam> {
    let changed = conn.execute(
        "UPDATE exams SET status = ? WHERE id = ?",
        (status.as_str(), exam_id),
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("exam"));
    }
    get_exam(conn, exam_id)
}

pub fn add_exam_subject(
    conn: &Connection,
    exam_id: &str,
    subject_id: &str,
    subject_name: &str,
    max_marks: f64,
    teacher_id: Option<&str>,
) -> EngineResult<ExamSubject> {
    get_exam(conn, exam_id)?;
    let subject_id = non_empty(subject_id, "subjectId")?;
    let subject_name = non_empty(subject_name, "subjectName")?;
    if !max_marks.is_finite() || max_marks <= 0.0 {
        return Err(EngineError::validation_with(
            "maxMarks must be > 0",
            json!({ "maxMarks": max_marks }),
        ));
    }
    let exists: Option<String> = conn
        .query_row(
            "SELECT id FROM exam_subjects WHERE exam_id = ? AND subject_id = ?",
            (exam_id, subject_id),
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(EngineError::validation_with(
            "subject already assigned to exam",
            json!({ "subjectId": subject_id }),
        ));
    }

    let sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM exam_subjects WHERE exam_id = ?",
        [exam_id],
        |r| r.get(0),
    )?;
    let row = ExamSubject {
        id: Uuid::new_v4().to_string(),
        exam_id: exam_id.to_string(),
        subject_id: subject_id.to_string(),
        subject_name: subject_name.to_string(),
        max_marks,
        teacher_id: teacher_id.map(|s| s.to_string()),
        marks_entered: false,
        sort_order,
    };
    conn.execute(
        "INSERT INTO exam_subjects(id, exam_id, subject_id, subject_name, max_marks, teacher_id, marks_entered, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &row.id,
            &row.exam_id,
            &row.subject_id,
            &row.subject_name,
            row.max_marks,
            &row.teacher_id,
            row.sort_order,
        ),
    )?;
    Ok(row)
}

fn exam_subject_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ExamSubject> {
    Ok(ExamSubject {
        id: r.get(0)?,
        exam_id: r.get(1)?,
        subject_id: r.get(2)?,
        subject_name: r.get(3)?,
        max_marks: r.get(4)?,
        teacher_id: r.get(5)?,
        marks_entered: r.get::<_, i64>(6)? != 0,
        sort_order: r.get(7)?,
    })
}

pub fn exam_subjects(conn: &Connection, exam_id: &str) -> EngineResult<Vec<ExamSubject>> {
    let mut stmt = conn.prepare(
        "SELECT id, exam_id, subject_id, subject_name, max_marks, teacher_id, marks_entered, sort_order
         FROM exam_subjects
         WHERE exam_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([exam_id], exam_subject_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Resolve either an exam-subject id or a subject id within the exam.
pub fn resolve_exam_subject(
    conn: &Connection,
    exam_id: &str,
    subject_ref: &str,
) -> EngineResult<ExamSubject> {
    conn.query_row(
        "SELECT id, exam_id, subject_id, subject_name, max_marks, teacher_id, marks_entered, sort_order
         FROM exam_subjects
         WHERE exam_id = ?1 AND (id = ?2 OR subject_id = ?2)",
        (exam_id, subject_ref),
        exam_subject_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("exam subject"))
}

pub fn create_class(
    conn: &Connection,
    name: &str,
    grade_id: &str,
    class_teacher_id: Option<&str>,
) -> EngineResult<Class> {
    let class = Class {
        id: Uuid::new_v4().to_string(),
        name: non_empty(name, "name")?.to_string(),
        grade_id: non_empty(grade_id, "gradeId")?.to_string(),
        class_teacher_id: class_teacher_id.map(|s| s.to_string()),
    };
    conn.execute(
        "INSERT INTO classes(id, name, grade_id, class_teacher_id) VALUES(?, ?, ?, ?)",
        (&class.id, &class.name, &class.grade_id, &class.class_teacher_id),
    )?;
    Ok(class)
}

fn class_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: r.get(0)?,
        name: r.get(1)?,
        grade_id: r.get(2)?,
        class_teacher_id: r.get(3)?,
    })
}

pub fn get_class(conn: &Connection, class_id: &str) -> EngineResult<Class> {
    conn.query_row(
        "SELECT id, name, grade_id, class_teacher_id FROM classes WHERE id = ?",
        [class_id],
        class_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("class"))
}

pub fn list_classes(conn: &Connection, grade_id: Option<&str>) -> EngineResult<Vec<Class>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, grade_id, class_teacher_id
         FROM classes
         WHERE (?1 IS NULL OR grade_id = ?1)
         ORDER BY name",
    )?;
    let rows = stmt
        .query_map([grade_id], class_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Load the exam and class, rejecting a class outside the exam's grade.
pub fn exam_and_class(conn: &Connection, exam_id: &str, class_id: &str) -> EngineResult<(Exam, Class)> {
    let exam = get_exam(conn, exam_id)?;
    let class = get_class(conn, class_id)?;
    if class.grade_id != exam.grade_id {
        return Err(EngineError::validation_with(
            "class is not in the exam's grade",
            json!({ "examGradeId": exam.grade_id, "classGradeId": class.grade_id }),
        ));
    }
    Ok((exam, class))
}

pub fn create_student(conn: &Connection, class_id: &str, display_name: &str) -> EngineResult<Student> {
    get_class(conn, class_id)?;
    let display_name = non_empty(display_name, "displayName")?;
    let sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )?;
    let student = Student {
        id: Uuid::new_v4().to_string(),
        class_id: class_id.to_string(),
        display_name: display_name.to_string(),
        active: true,
        sort_order,
    };
    conn.execute(
        "INSERT INTO students(id, class_id, display_name, active, sort_order, updated_at)
         VALUES(?, ?, ?, 1, ?, ?)",
        (
            &student.id,
            &student.class_id,
            &student.display_name,
            student.sort_order,
            now_rfc3339(),
        ),
    )?;
    Ok(student)
}

pub fn set_student_active(conn: &Connection, student_id: &str, active: bool) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE students SET active = ?, updated_at = ? WHERE id = ?",
        (active as i64, now_rfc3339(), student_id),
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("student"));
    }
    Ok(())
}

pub fn list_students(conn: &Connection, class_id: &str, include_inactive: bool) -> EngineResult<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT id, class_id, display_name, active, sort_order
         FROM students
         WHERE class_id = ? AND (? OR active = 1)
         ORDER BY sort_order, id",
    )?;
    let rows = stmt
        .query_map((class_id, include_inactive), |r| {
            Ok(Student {
                id: r.get(0)?,
                class_id: r.get(1)?,
                display_name: r.get(2)?,
                active: r.get::<_, i64>(3)? != 0,
                sort_order: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active students of the class, in roster order.
pub fn class_roster(conn: &Connection, class_id: &str) -> EngineResult<Vec<Student>> {
    list_students(conn, class_id, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[test]
    fn unknown_exam_status_is_not_read_as_draft() {
        let fx = Fixture::new(&[("math", 100.0)], 1);
        fx.conn
            .execute("UPDATE exams SET status = 'ARCHIVED' WHERE id = ?", [&fx.exam_id])
            .unwrap();
        let e = get_exam(&fx.conn, &fx.exam_id).unwrap_err();
        assert_eq!(e.code(), "db_error");
    }
}
