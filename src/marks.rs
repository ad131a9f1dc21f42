use crate::completion;
use crate::db::now_rfc3339;
use crate::error::{EngineError, EngineResult};
use crate::registry::{self, Class, Exam, ExamSubject};
use crate::settings::EngineSettings;
use crate::workflow::{self, Actor, ActorRole, TransitionRequest, WorkflowAction, WorkflowStatus};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkEntry {
    pub student_id: String,
    /// `None` records an explicit absence.
    pub marks_obtained: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSubmission {
    pub class_id: String,
    pub subject_completed: bool,
    pub all_subjects_completed: bool,
    pub newly_completed: bool,
    pub missing_student_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_submitted: Option<WorkflowStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub class_id: String,
    pub student_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub accepted: usize,
    pub exam_subject_id: String,
    pub subject_marks_entered: bool,
    pub all_subjects_completed: bool,
    pub classes: Vec<ClassSubmission>,
    pub gaps: Vec<Gap>,
}

struct RosterHit {
    class_id: String,
    active: bool,
}

fn student_class(conn: &Connection, student_id: &str) -> EngineResult<Option<RosterHit>> {
    let hit = conn
        .query_row(
            "SELECT class_id, active FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(RosterHit {
                    class_id: r.get(0)?,
                    active: r.get::<_, i64>(1)? != 0,
                })
            },
        )
        .optional()?;
    Ok(hit)
}

/// Check every entry before anything is written. Returns the touched classes keyed by id.
fn validate_entries(
    conn: &Connection,
    settings: &EngineSettings,
    exam: &Exam,
    subject: &ExamSubject,
    entries: &[MarkEntry],
) -> EngineResult<BTreeMap<String, Class>> {
    if entries.is_empty() {
        return Err(EngineError::validation("entries must not be empty"));
    }
    if entries.len() > settings.max_entries_per_submission {
        return Err(EngineError::validation_with(
            "too many entries in one submission",
            json!({ "count": entries.len(), "max": settings.max_entries_per_submission }),
        ));
    }

    let mut seen = HashSet::new();
    let mut classes: BTreeMap<String, Class> = BTreeMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if !seen.insert(entry.student_id.as_str()) {
            return Err(EngineError::validation_with(
                "duplicate student in submission",
                json!({ "index": i, "studentId": entry.student_id }),
            ));
        }
        if let Some(v) = entry.marks_obtained {
            if !v.is_finite() || v < 0.0 || v > subject.max_marks {
                return Err(EngineError::validation_with(
                    format!("marksObtained must be within 0..={}", subject.max_marks),
                    json!({ "index": i, "studentId": entry.student_id, "marksObtained": v }),
                ));
            }
        }

        let Some(hit) = student_class(conn, &entry.student_id)? else {
            return Err(EngineError::validation_with(
                "unknown student",
                json!({ "index": i, "studentId": entry.student_id }),
            ));
        };
        if !hit.active {
            return Err(EngineError::validation_with(
                "student is not on an active roster",
                json!({ "index": i, "studentId": entry.student_id }),
            ));
        }
        if !classes.contains_key(&hit.class_id) {
            let class = registry::get_class(conn, &hit.class_id)?;
            if class.grade_id != exam.grade_id {
                return Err(EngineError::validation_with(
                    "student is not in the exam's grade",
                    json!({ "index": i, "studentId": entry.student_id, "classId": class.id }),
                ));
            }
            classes.insert(class.id.clone(), class);
        }
    }
    Ok(classes)
}

fn check_submitter(
    settings: &EngineSettings,
    subject: &ExamSubject,
    classes: &BTreeMap<String, Class>,
    actor: &Actor,
) -> EngineResult<()> {
    if !settings.enforce_assignment {
        return Ok(());
    }
    match actor.role {
        ActorRole::Admin => Ok(()),
        ActorRole::SubjectTeacher => match subject.teacher_id.as_deref() {
            Some(teacher) if teacher != actor.id => Err(EngineError::guard(
                "actor is not the teacher of this subject",
                json!({ "actorId": actor.id, "examSubjectId": subject.id }),
            )),
            _ => Ok(()),
        },
        ActorRole::ClassTeacher => {
            for class in classes.values() {
                if let Some(teacher) = class.class_teacher_id.as_deref() {
                    if teacher != actor.id {
                        return Err(EngineError::guard(
                            "actor is not the class teacher of every touched class",
                            json!({ "actorId": actor.id, "classId": class.id }),
                        ));
                    }
                }
            }
            Ok(())
        }
    }
}

fn upsert_mark(
    conn: &Connection,
    exam_id: &str,
    exam_subject_id: &str,
    entry: &MarkEntry,
    actor_id: &str,
    now: &str,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO marks(id, exam_id, exam_subject_id, student_id, marks_obtained, entered_by, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(exam_subject_id, student_id) DO UPDATE SET
           marks_obtained = excluded.marks_obtained,
           entered_by = excluded.entered_by,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            exam_id,
            exam_subject_id,
            &entry.student_id,
            entry.marks_obtained,
            actor_id,
            now,
        ),
    )?;
    Ok(())
}

/// `submitMarks`: validate everything, then write all entries, refresh completion and
/// optionally auto-submit newly completed classes, all in one transaction.
pub fn submit_marks(
    conn: &Connection,
    settings: &EngineSettings,
    exam_id: &str,
    subject_ref: &str,
    entries: &[MarkEntry],
    actor: &Actor,
) -> EngineResult<SubmitOutcome> {
    let exam = registry::get_exam(conn, exam_id)?;
    let subject = registry::resolve_exam_subject(conn, exam_id, subject_ref)?;
    let classes = validate_entries(conn, settings, &exam, &subject, entries)?;
    check_submitter(settings, &subject, &classes, actor)?;

    let tx = workflow::begin_write(conn)?;
    let now = now_rfc3339();

    let mut ready_before = BTreeMap::new();
    for class in classes.values() {
        let wf = workflow::load(&tx, &exam.id, &class.id)?;
        if wf.status != WorkflowStatus::MarksEntry {
            return Err(EngineError::guard(
                "marks are locked once the class has left MARKS_ENTRY",
                json!({ "classId": class.id, "status": wf.status.as_str() }),
            ));
        }
        let progress = completion::class_progress(&tx, &exam.id, &class.id)?;
        ready_before.insert(class.id.clone(), progress.ready);
    }

    for entry in entries {
        upsert_mark(&tx, &exam.id, &subject.id, entry, &actor.id, &now)?;
    }

    let mut rows = Vec::with_capacity(classes.len());
    let mut gaps = Vec::new();
    for class in classes.values() {
        let missing = completion::refresh_class_entry(&tx, &subject, &class.id, &actor.id, &now)?;
        gaps.extend(missing.iter().map(|student_id| Gap {
            class_id: class.id.clone(),
            student_id: student_id.clone(),
        }));
        rows.push((class, missing));
    }
    let subject_marks_entered = completion::refresh_exam_subject_flag(&tx, &subject, &exam.grade_id)?;

    let mut class_rows = Vec::with_capacity(rows.len());
    for (class, missing) in rows {
        let ready = completion::class_progress(&tx, &exam.id, &class.id)?.ready;
        let newly_completed = ready && !ready_before.get(&class.id).copied().unwrap_or(false);

        let auto_submitted = if newly_completed
            && settings.auto_submit_for_review
            && may_auto_submit(&tx, settings, &exam, class, actor)?
        {
            let outcome = workflow::apply_in_tx(
                &tx,
                settings,
                &exam,
                class,
                &TransitionRequest {
                    action: WorkflowAction::SubmitForReview,
                    actor,
                    reason: Some("auto-submitted on completion"),
                    expected_version: None,
                },
            )?;
            Some(outcome.new_status)
        } else {
            None
        };

        class_rows.push(ClassSubmission {
            class_id: class.id.clone(),
            subject_completed: missing.is_empty(),
            all_subjects_completed: ready,
            newly_completed,
            missing_student_ids: missing,
            auto_submitted,
        });
    }

    workflow::commit(tx)?;

    let all_subjects_completed = class_rows.iter().all(|c| c.all_subjects_completed);
    tracing::info!(
        exam_id,
        exam_subject_id = %subject.id,
        actor = %actor.id,
        accepted = entries.len(),
        classes = class_rows.len(),
        gaps = gaps.len(),
        "marks submitted"
    );
    Ok(SubmitOutcome {
        accepted: entries.len(),
        exam_subject_id: subject.id,
        subject_marks_entered,
        all_subjects_completed,
        classes: class_rows,
        gaps,
    })
}

/// Auto-submit only happens for an actor the workflow would accept; otherwise the
/// marks are kept and the class simply stays in MARKS_ENTRY.
fn may_auto_submit(
    conn: &Connection,
    settings: &EngineSettings,
    exam: &Exam,
    class: &Class,
    actor: &Actor,
) -> EngineResult<bool> {
    if !matches!(actor.role, ActorRole::ClassTeacher | ActorRole::SubjectTeacher) {
        return Ok(false);
    }
    match workflow::check_assignment(conn, settings, exam, class, actor) {
        Ok(()) => Ok(true),
        Err(EngineError::GuardViolation { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRow {
    pub exam_subject_id: String,
    pub student_id: String,
    pub marks_obtained: Option<f64>,
    pub entered_by: String,
    pub updated_at: String,
}

/// Raw mark records of a class for one exam, in roster then subject order.
pub fn list_marks(conn: &Connection, exam_id: &str, class_id: &str) -> EngineResult<Vec<MarkRow>> {
    registry::exam_and_class(conn, exam_id, class_id)?;
    let mut stmt = conn.prepare(
        "SELECT m.exam_subject_id, m.student_id, m.marks_obtained, m.entered_by, m.updated_at
         FROM marks m
         JOIN students s ON s.id = m.student_id
         JOIN exam_subjects es ON es.id = m.exam_subject_id
         WHERE m.exam_id = ? AND s.class_id = ?
         ORDER BY s.sort_order, s.id, es.sort_order",
    )?;
    let rows = stmt
        .query_map((exam_id, class_id), |r| {
            Ok(MarkRow {
                exam_subject_id: r.get(0)?,
                student_id: r.get(1)?,
                marks_obtained: r.get(2)?,
                entered_by: r.get(3)?,
                updated_at: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
