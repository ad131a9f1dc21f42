use crate::error::{EngineError, EngineResult};
use crate::grading::{Grade, GradeScale};
use crate::registry::{self, ExamSubject, Student};
use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Totals closer than this are treated as a tie.
const TIE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub exam_id: &'a str,
    pub class_id: &'a str,
}

/// Marks recorded for one student, keyed by exam-subject id. A key mapped to `None`
/// is an explicit absence; a missing key means nothing was entered.
#[derive(Debug, Clone, Default)]
pub struct StudentMarks {
    pub student_id: String,
    pub display_name: String,
    pub marks: HashMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub exam_subject_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub marks: Option<f64>,
    pub max_marks: f64,
    pub percentage: Option<f64>,
    pub grade: Option<Grade>,
    pub class_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub student_id: String,
    pub display_name: String,
    pub total: f64,
    pub max_total: f64,
    pub percentage: f64,
    pub grade: Grade,
    pub rank: u32,
    pub subjects: Vec<SubjectResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassResults {
    pub exam_id: String,
    pub class_id: String,
    pub grade_scale: &'static str,
    pub class_size: usize,
    pub class_average: f64,
    pub results: Vec<StudentResult>,
}

/// Standard competition ranking ("1224") over totals, highest first. The returned
/// ranks are index-aligned with `totals`.
pub fn competition_ranks(totals: &[f64]) -> Vec<u32> {
    let mut order: Vec<usize> = (0..totals.len()).collect();
    order.sort_by(|&a, &b| {
        totals[b]
            .partial_cmp(&totals[a])
            .unwrap_or(Ordering::Equal)
    });

    let mut ranks = vec![0u32; totals.len()];
    for (pos, &idx) in order.iter().enumerate() {
        let rank = if pos > 0 && (totals[order[pos - 1]] - totals[idx]).abs() < TIE_EPSILON {
            ranks[order[pos - 1]]
        } else {
            (pos + 1) as u32
        };
        ranks[idx] = rank;
    }
    ranks
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / (values.len() as f64)
}

fn percent(obtained: f64, out_of: f64) -> f64 {
    if out_of > 0.0 {
        // Marks never exceed their maximum; the clamp only absorbs rounding.
        (obtained * 100.0 / out_of).min(100.0)
    } else {
        0.0
    }
}

/// Aggregate a class from already-loaded marks. Students are expected in roster order;
/// that order breaks ties in the output.
pub fn aggregate(
    exam_id: &str,
    class_id: &str,
    subjects: &[ExamSubject],
    students: &[StudentMarks],
    scale: GradeScale,
) -> EngineResult<ClassResults> {
    let mut subject_percents: HashMap<&str, Vec<f64>> = HashMap::new();
    let mut partial: Vec<(f64, f64, Vec<(Option<f64>, Option<f64>)>)> =
        Vec::with_capacity(students.len());

    for st in students {
        let mut total = 0.0;
        let mut max_total = 0.0;
        let mut cells = Vec::with_capacity(subjects.len());
        for subj in subjects {
            let mark = st.marks.get(&subj.id).copied().flatten();
            match mark {
                Some(m) => {
                    total += m;
                    max_total += subj.max_marks;
                    let p = percent(m, subj.max_marks);
                    subject_percents.entry(subj.id.as_str()).or_default().push(p);
                    cells.push((Some(m), Some(p)));
                }
                None => cells.push((None, None)),
            }
        }
        partial.push((total, max_total, cells));
    }

    let subject_averages: HashMap<&str, f64> = subjects
        .iter()
        .map(|s| {
            let avg = subject_percents
                .get(s.id.as_str())
                .map(|v| mean(v))
                .unwrap_or(0.0);
            (s.id.as_str(), avg)
        })
        .collect();

    let totals: Vec<f64> = partial.iter().map(|(t, _, _)| *t).collect();
    let ranks = competition_ranks(&totals);

    let mut results = Vec::with_capacity(students.len());
    for ((st, (total, max_total, cells)), rank) in students.iter().zip(partial).zip(ranks) {
        let percentage = percent(total, max_total);
        let mut subject_rows = Vec::with_capacity(subjects.len());
        for (subj, (marks, pct)) in subjects.iter().zip(cells) {
            let grade = match pct {
                Some(p) => Some(scale.classify(p)?),
                None => None,
            };
            subject_rows.push(SubjectResult {
                exam_subject_id: subj.id.clone(),
                subject_id: subj.subject_id.clone(),
                subject_name: subj.subject_name.clone(),
                marks,
                max_marks: subj.max_marks,
                percentage: pct,
                grade,
                class_average: subject_averages
                    .get(subj.id.as_str())
                    .copied()
                    .unwrap_or(0.0),
            });
        }
        results.push(StudentResult {
            student_id: st.student_id.clone(),
            display_name: st.display_name.clone(),
            total,
            max_total,
            percentage,
            grade: scale.classify(percentage)?,
            rank,
            subjects: subject_rows,
        });
    }

    let class_average = mean(&results.iter().map(|r| r.percentage).collect::<Vec<_>>());
    // Stable: equal ranks keep roster order.
    results.sort_by_key(|r| r.rank);

    Ok(ClassResults {
        exam_id: exam_id.to_string(),
        class_id: class_id.to_string(),
        grade_scale: scale.as_str(),
        class_size: students.len(),
        class_average,
        results,
    })
}

fn load_class_marks(
    ctx: &CalcContext<'_>,
    roster: &[Student],
) -> EngineResult<Vec<StudentMarks>> {
    let mut stmt = ctx.conn.prepare(
        "SELECT m.student_id, m.exam_subject_id, m.marks_obtained
         FROM marks m
         JOIN students s ON s.id = m.student_id
         WHERE m.exam_id = ? AND s.class_id = ?",
    )?;
    let rows = stmt
        .query_map((ctx.exam_id, ctx.class_id), |r| {
            let student_id: String = r.get(0)?;
            let exam_subject_id: String = r.get(1)?;
            let marks: Option<f64> = r.get(2)?;
            Ok((student_id, exam_subject_id, marks))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_student: HashMap<String, HashMap<String, Option<f64>>> = HashMap::new();
    for (student_id, exam_subject_id, marks) in rows {
        by_student
            .entry(student_id)
            .or_default()
            .insert(exam_subject_id, marks);
    }

    Ok(roster
        .iter()
        .map(|s| StudentMarks {
            student_id: s.id.clone(),
            display_name: s.display_name.clone(),
            marks: by_student.remove(&s.id).unwrap_or_default(),
        })
        .collect())
}

/// Read-only aggregation for one exam and class.
pub fn compute_class_results(ctx: &CalcContext<'_>, scale: GradeScale) -> EngineResult<ClassResults> {
    registry::exam_and_class(ctx.conn, ctx.exam_id, ctx.class_id)?;
    let subjects = registry::exam_subjects(ctx.conn, ctx.exam_id)?;
    let roster = registry::class_roster(ctx.conn, ctx.class_id)?;
    let students = load_class_marks(ctx, &roster)?;
    aggregate(ctx.exam_id, ctx.class_id, &subjects, &students, scale)
}

/// Narrow a class aggregate to one student. Ranks stay class-wide.
pub fn only_student(mut results: ClassResults, student_id: &str) -> EngineResult<ClassResults> {
    results.results.retain(|r| r.student_id == student_id);
    if results.results.is_empty() {
        return Err(EngineError::not_found("student on class roster"));
    }
    Ok(results)
}
