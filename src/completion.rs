use crate::error::EngineResult;
use crate::registry::{self, ExamSubject, Student};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProgress {
    pub exam_subject_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub marks_entered: bool,
    pub covered_students: usize,
    pub roster_size: usize,
    pub missing_student_ids: Vec<String>,
}

impl SubjectProgress {
    pub fn completed(&self) -> bool {
        self.marks_entered && self.missing_student_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassProgress {
    pub exam_id: String,
    pub class_id: String,
    pub total_subjects: usize,
    pub completed_subjects: usize,
    pub ready: bool,
    pub subjects: Vec<SubjectProgress>,
}

fn covered_student_ids(
    conn: &Connection,
    exam_subject_id: &str,
    class_id: &str,
) -> EngineResult<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT m.student_id
         FROM marks m
         JOIN students s ON s.id = m.student_id
         WHERE m.exam_subject_id = ? AND s.class_id = ?",
    )?;
    let ids = stmt
        .query_map((exam_subject_id, class_id), |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

fn class_entry_flag(conn: &Connection, exam_subject_id: &str, class_id: &str) -> EngineResult<bool> {
    let flag: Option<i64> = conn
        .query_row(
            "SELECT marks_entered FROM subject_class_entries WHERE exam_subject_id = ? AND class_id = ?",
            (exam_subject_id, class_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(flag.unwrap_or(0) != 0)
}

fn missing_from_roster(roster: &[Student], covered: &HashSet<String>) -> Vec<String> {
    roster
        .iter()
        .filter(|s| !covered.contains(&s.id))
        .map(|s| s.id.clone())
        .collect()
}

fn subject_progress(
    conn: &Connection,
    subject: &ExamSubject,
    class_id: &str,
    roster: &[Student],
) -> EngineResult<SubjectProgress> {
    let covered = covered_student_ids(conn, &subject.id, class_id)?;
    let missing = missing_from_roster(roster, &covered);
    Ok(SubjectProgress {
        exam_subject_id: subject.id.clone(),
        subject_id: subject.subject_id.clone(),
        subject_name: subject.subject_name.clone(),
        marks_entered: class_entry_flag(conn, &subject.id, class_id)?,
        covered_students: roster.len() - missing.len(),
        roster_size: roster.len(),
        missing_student_ids: missing,
    })
}

/// Whether every subject of the exam has complete marks for this class.
pub fn class_progress(conn: &Connection, exam_id: &str, class_id: &str) -> EngineResult<ClassProgress> {
    registry::exam_and_class(conn, exam_id, class_id)?;
    let subjects = registry::exam_subjects(conn, exam_id)?;
    let roster = registry::class_roster(conn, class_id)?;

    let mut rows = Vec::with_capacity(subjects.len());
    for subject in &subjects {
        rows.push(subject_progress(conn, subject, class_id, &roster)?);
    }
    let total_subjects = rows.len();
    let completed_subjects = rows.iter().filter(|r| r.completed()).count();

    Ok(ClassProgress {
        exam_id: exam_id.to_string(),
        class_id: class_id.to_string(),
        total_subjects,
        completed_subjects,
        ready: total_subjects > 0 && completed_subjects == total_subjects,
        subjects: rows,
    })
}

/// Recompute the per-class entry flag for one subject after a submission. Returns the
/// roster students still lacking a record.
pub fn refresh_class_entry(
    conn: &Connection,
    subject: &ExamSubject,
    class_id: &str,
    actor_id: &str,
    now: &str,
) -> EngineResult<Vec<String>> {
    let roster = registry::class_roster(conn, class_id)?;
    let covered = covered_student_ids(conn, &subject.id, class_id)?;
    let missing = missing_from_roster(&roster, &covered);
    let entered = missing.is_empty();

    conn.execute(
        "INSERT INTO subject_class_entries(exam_subject_id, class_id, marks_entered, entered_by, entered_at)
         VALUES(?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(exam_subject_id, class_id) DO UPDATE SET
           marks_entered = excluded.marks_entered,
           entered_by = CASE WHEN excluded.marks_entered = 1 THEN excluded.entered_by ELSE entered_by END,
           entered_at = CASE WHEN excluded.marks_entered = 1 THEN excluded.entered_at ELSE entered_at END",
        (&subject.id, class_id, entered as i64, actor_id, now),
    )?;
    Ok(missing)
}

/// Derive the exam-subject flag: true once every populated class of the exam's grade
/// has complete entry for the subject.
pub fn refresh_exam_subject_flag(conn: &Connection, subject: &ExamSubject, grade_id: &str) -> EngineResult<bool> {
    let pending: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM classes c
         WHERE c.grade_id = ?1
           AND EXISTS (SELECT 1 FROM students s WHERE s.class_id = c.id AND s.active = 1)
           AND NOT EXISTS (
             SELECT 1 FROM subject_class_entries e
             WHERE e.exam_subject_id = ?2 AND e.class_id = c.id AND e.marks_entered = 1
           )",
        (grade_id, &subject.id),
        |r| r.get(0),
    )?;
    let entered = pending == 0;
    conn.execute(
        "UPDATE exam_subjects SET marks_entered = ? WHERE id = ?",
        (entered as i64, &subject.id),
    )?;
    Ok(entered)
}
