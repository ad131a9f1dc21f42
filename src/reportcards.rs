use crate::calc::{self, CalcContext, StudentResult};
use crate::error::{EngineError, EngineResult};
use crate::grading::GradeScale;
use crate::workflow::{self, WorkflowStatus};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardSubject {
    pub exam_subject_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub marks: Option<f64>,
    pub max_marks: f64,
    pub percentage: Option<f64>,
    pub grade: Option<String>,
    pub class_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardSnapshot {
    pub id: String,
    pub exam_id: String,
    pub class_id: String,
    pub student_id: String,
    pub total_marks: f64,
    pub max_marks: f64,
    pub percentage: f64,
    pub overall_grade: String,
    pub grade_scale: String,
    pub class_rank: i64,
    pub class_size: i64,
    pub class_average: f64,
    pub subjects: Vec<ReportCardSubject>,
    pub generated_at: String,
    pub content_hash: String,
}

fn content_hash(snapshot: &ReportCardSnapshot) -> String {
    // Identity and timestamps are excluded so a republish of unchanged marks hashes
    // the same.
    let body = json!({
        "examId": snapshot.exam_id,
        "classId": snapshot.class_id,
        "studentId": snapshot.student_id,
        "totalMarks": snapshot.total_marks,
        "maxMarks": snapshot.max_marks,
        "percentage": snapshot.percentage,
        "overallGrade": snapshot.overall_grade,
        "gradeScale": snapshot.grade_scale,
        "classRank": snapshot.class_rank,
        "classSize": snapshot.class_size,
        "classAverage": snapshot.class_average,
        "subjects": snapshot.subjects,
    });
    let mut hasher = Sha256::new();
    hasher.update(body.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn snapshot_from_result(
    r: &StudentResult,
    exam_id: &str,
    class_id: &str,
    scale: GradeScale,
    class_size: usize,
    class_average: f64,
    now: &str,
) -> ReportCardSnapshot {
    let mut snapshot = ReportCardSnapshot {
        id: Uuid::new_v4().to_string(),
        exam_id: exam_id.to_string(),
        class_id: class_id.to_string(),
        student_id: r.student_id.clone(),
        total_marks: r.total,
        max_marks: r.max_total,
        percentage: r.percentage,
        overall_grade: r.grade.as_str().to_string(),
        grade_scale: scale.as_str().to_string(),
        class_rank: r.rank as i64,
        class_size: class_size as i64,
        class_average,
        subjects: r
            .subjects
            .iter()
            .map(|s| ReportCardSubject {
                exam_subject_id: s.exam_subject_id.clone(),
                subject_id: s.subject_id.clone(),
                subject_name: s.subject_name.clone(),
                marks: s.marks,
                max_marks: s.max_marks,
                percentage: s.percentage,
                grade: s.grade.map(|g| g.as_str().to_string()),
                class_average: s.class_average,
            })
            .collect(),
        generated_at: now.to_string(),
        content_hash: String::new(),
    };
    snapshot.content_hash = content_hash(&snapshot);
    snapshot
}

fn insert_snapshot(conn: &Connection, s: &ReportCardSnapshot) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO report_cards(id, exam_id, class_id, student_id, total_marks, max_marks, percentage,
                                  overall_grade, grade_scale, class_rank, class_size, class_average,
                                  generated_at, content_hash)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &s.id,
            &s.exam_id,
            &s.class_id,
            &s.student_id,
            s.total_marks,
            s.max_marks,
            s.percentage,
            &s.overall_grade,
            &s.grade_scale,
            s.class_rank,
            s.class_size,
            s.class_average,
            &s.generated_at,
            &s.content_hash,
        ),
    )?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO report_card_subjects(report_card_id, exam_subject_id, subject_id, subject_name,
                                          marks_obtained, max_marks, percentage, grade, class_average, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (i, subj) in s.subjects.iter().enumerate() {
        stmt.execute((
            &s.id,
            &subj.exam_subject_id,
            &subj.subject_id,
            &subj.subject_name,
            subj.marks,
            subj.max_marks,
            subj.percentage,
            &subj.grade,
            subj.class_average,
            i as i64,
        ))?;
    }
    Ok(())
}

/// Freeze the class aggregate into one snapshot per roster student, replacing any
/// earlier snapshots of the class. Must run inside the publishing transaction; an
/// error anywhere leaves the caller to roll back every write.
pub fn generate_for_class(
    conn: &Connection,
    scale: GradeScale,
    exam_id: &str,
    class_id: &str,
    now: &str,
) -> EngineResult<usize> {
    let wf = workflow::load(conn, exam_id, class_id)?;
    if wf.status != WorkflowStatus::Published {
        return Err(EngineError::guard(
            "report cards can only be generated for a published class",
            json!({ "status": wf.status.as_str() }),
        ));
    }

    let results = calc::compute_class_results(
        &CalcContext {
            conn,
            exam_id,
            class_id,
        },
        scale,
    )?;

    // Students who moved here from another class take their old snapshot with them.
    conn.execute(
        "DELETE FROM report_card_subjects
         WHERE report_card_id IN (
           SELECT rc.id FROM report_cards rc
           WHERE rc.exam_id = ?1
             AND (rc.class_id = ?2
                  OR rc.student_id IN (SELECT id FROM students WHERE class_id = ?2 AND active = 1))
         )",
        (exam_id, class_id),
    )?;
    let replaced = conn.execute(
        "DELETE FROM report_cards
         WHERE exam_id = ?1
           AND (class_id = ?2
                OR student_id IN (SELECT id FROM students WHERE class_id = ?2 AND active = 1))",
        (exam_id, class_id),
    )?;

    for r in &results.results {
        let snapshot = snapshot_from_result(
            r,
            exam_id,
            class_id,
            scale,
            results.class_size,
            results.class_average,
            now,
        );
        insert_snapshot(conn, &snapshot)?;
    }

    tracing::debug!(
        exam_id,
        class_id,
        generated = results.results.len(),
        replaced,
        "report cards generated"
    );
    Ok(results.results.len())
}

fn load_subjects(conn: &Connection, report_card_id: &str) -> EngineResult<Vec<ReportCardSubject>> {
    let mut stmt = conn.prepare_cached(
        "SELECT exam_subject_id, subject_id, subject_name, marks_obtained, max_marks, percentage, grade, class_average
         FROM report_card_subjects
         WHERE report_card_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([report_card_id], |r| {
            Ok(ReportCardSubject {
                exam_subject_id: r.get(0)?,
                subject_id: r.get(1)?,
                subject_name: r.get(2)?,
                marks: r.get(3)?,
                max_marks: r.get(4)?,
                percentage: r.get(5)?,
                grade: r.get(6)?,
                class_average: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const SNAPSHOT_COLUMNS: &str = "rc.id, rc.exam_id, rc.class_id, rc.student_id, rc.total_marks, rc.max_marks,
    rc.percentage, rc.overall_grade, rc.grade_scale, rc.class_rank, rc.class_size, rc.class_average,
    rc.generated_at, rc.content_hash";

fn snapshot_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ReportCardSnapshot> {
    Ok(ReportCardSnapshot {
        id: r.get(0)?,
        exam_id: r.get(1)?,
        class_id: r.get(2)?,
        student_id: r.get(3)?,
        total_marks: r.get(4)?,
        max_marks: r.get(5)?,
        percentage: r.get(6)?,
        overall_grade: r.get(7)?,
        grade_scale: r.get(8)?,
        class_rank: r.get(9)?,
        class_size: r.get(10)?,
        class_average: r.get(11)?,
        subjects: Vec::new(),
        generated_at: r.get(12)?,
        content_hash: r.get(13)?,
    })
}

/// `getReportCard`: only published classes have readable snapshots.
pub fn get_report_card(conn: &Connection, exam_id: &str, student_id: &str) -> EngineResult<ReportCardSnapshot> {
    let sql = format!(
        "SELECT {}
         FROM report_cards rc
         JOIN class_workflows w ON w.exam_id = rc.exam_id AND w.class_id = rc.class_id
         WHERE rc.exam_id = ? AND rc.student_id = ? AND w.status = 'PUBLISHED'",
        SNAPSHOT_COLUMNS
    );
    let mut snapshot = conn
        .query_row(&sql, (exam_id, student_id), snapshot_from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("report card"))?;
    snapshot.subjects = load_subjects(conn, &snapshot.id)?;
    Ok(snapshot)
}

pub fn list_for_class(conn: &Connection, exam_id: &str, class_id: &str) -> EngineResult<Vec<ReportCardSnapshot>> {
    let sql = format!(
        "SELECT {}
         FROM report_cards rc
         JOIN class_workflows w ON w.exam_id = rc.exam_id AND w.class_id = rc.class_id
         WHERE rc.exam_id = ? AND rc.class_id = ? AND w.status = 'PUBLISHED'
         ORDER BY rc.class_rank, rc.student_id",
        SNAPSHOT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map((exam_id, class_id), snapshot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for snapshot in rows.iter_mut() {
        snapshot.subjects = load_subjects(conn, &snapshot.id)?;
    }
    Ok(rows)
}
