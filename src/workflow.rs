//! Per (exam, class) report-card approval pipeline.
//!
//! `MARKS_ENTRY → READY_FOR_REVIEW → REVIEWED → APPROVED → PUBLISHED`, with `reject`
//! stepping back exactly one state and `republish` regenerating snapshots of a
//! published class. Every mutation runs in one `IMMEDIATE` transaction and bumps the
//! row version, so a stale `expectedVersion` or a competing writer is a conflict.

use crate::completion;
use crate::db::now_rfc3339;
use crate::error::{EngineError, EngineResult};
use crate::registry::{self, Class, Exam};
use crate::reportcards;
use crate::settings::EngineSettings;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    MarksEntry,
    ReadyForReview,
    Reviewed,
    Approved,
    Published,
}

impl WorkflowStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MARKS_ENTRY" => Some(Self::MarksEntry),
            "READY_FOR_REVIEW" => Some(Self::ReadyForReview),
            "REVIEWED" => Some(Self::Reviewed),
            "APPROVED" => Some(Self::Approved),
            "PUBLISHED" => Some(Self::Published),
            _ => None,
        }
    }

    /// Decode a stored status. An unknown value is a storage error, never a default.
    pub fn from_column(s: &str, idx: usize) -> rusqlite::Result<Self> {
        Self::parse(s).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("unknown workflow status {s:?}").into(),
            )
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarksEntry => "MARKS_ENTRY",
            Self::ReadyForReview => "READY_FOR_REVIEW",
            Self::Reviewed => "REVIEWED",
            Self::Approved => "APPROVED",
            Self::Published => "PUBLISHED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    SubmitForReview,
    Review,
    Approve,
    Publish,
    Reject,
    Republish,
}

impl WorkflowAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "submit_for_review" => Some(Self::SubmitForReview),
            "review" => Some(Self::Review),
            "approve" => Some(Self::Approve),
            "publish" => Some(Self::Publish),
            "reject" => Some(Self::Reject),
            "republish" => Some(Self::Republish),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SubmitForReview => "submit_for_review",
            Self::Review => "review",
            Self::Approve => "approve",
            Self::Publish => "publish",
            Self::Reject => "reject",
            Self::Republish => "republish",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    ClassTeacher,
    SubjectTeacher,
    Admin,
}

impl ActorRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "class_teacher" => Some(Self::ClassTeacher),
            "subject_teacher" => Some(Self::SubjectTeacher),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClassTeacher => "class_teacher",
            Self::SubjectTeacher => "subject_teacher",
            Self::Admin => "admin",
        }
    }
}

/// The caller, as vouched for by the identity provider in front of the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

/// The transition table. Returns the target status or a guard violation.
pub fn next_status(
    from: WorkflowStatus,
    action: WorkflowAction,
    role: ActorRole,
) -> EngineResult<WorkflowStatus> {
    use ActorRole::*;
    use WorkflowAction::*;
    use WorkflowStatus::*;

    let (to, allowed): (WorkflowStatus, &[ActorRole]) = match (action, from) {
        (SubmitForReview, MarksEntry) => (ReadyForReview, &[ClassTeacher, SubjectTeacher]),
        (Review, ReadyForReview) => (Reviewed, &[ClassTeacher]),
        (Approve, Reviewed) => (Approved, &[Admin]),
        (Publish, Approved) => (Published, &[Admin]),
        (Reject, ReadyForReview) => (MarksEntry, &[ClassTeacher, SubjectTeacher]),
        (Reject, Reviewed) => (ReadyForReview, &[Admin]),
        (Reject, Approved) => (Reviewed, &[Admin]),
        (Republish, Published) => (Published, &[Admin]),
        _ => {
            return Err(EngineError::guard(
                format!("cannot {} from {}", action.as_str(), from.as_str()),
                json!({ "action": action.as_str(), "status": from.as_str() }),
            ))
        }
    };

    if !allowed.contains(&role) {
        return Err(EngineError::guard(
            format!(
                "role {} may not {} from {}",
                role.as_str(),
                action.as_str(),
                from.as_str()
            ),
            json!({
                "action": action.as_str(),
                "status": from.as_str(),
                "role": role.as_str(),
                "allowedRoles": allowed.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
            }),
        ));
    }
    Ok(to)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassWorkflow {
    pub exam_id: String,
    pub class_id: String,
    pub status: WorkflowStatus,
    pub version: i64,
    pub submitted_by: Option<String>,
    pub submitted_at: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
    pub published_by: Option<String>,
    pub published_at: Option<String>,
}

impl ClassWorkflow {
    fn initial(exam_id: &str, class_id: &str) -> Self {
        Self {
            exam_id: exam_id.to_string(),
            class_id: class_id.to_string(),
            status: WorkflowStatus::MarksEntry,
            version: 0,
            submitted_by: None,
            submitted_at: None,
            reviewed_by: None,
            reviewed_at: None,
            approved_by: None,
            approved_at: None,
            published_by: None,
            published_at: None,
        }
    }
}

/// Current workflow state. A class nobody has touched yet is in `MARKS_ENTRY` at
/// version 0; reading never creates the row.
pub fn load(conn: &Connection, exam_id: &str, class_id: &str) -> EngineResult<ClassWorkflow> {
    let row = conn
        .query_row(
            "SELECT status, version, submitted_by, submitted_at, reviewed_by, reviewed_at,
                    approved_by, approved_at, published_by, published_at
             FROM class_workflows
             WHERE exam_id = ? AND class_id = ?",
            (exam_id, class_id),
            |r| {
                let status: String = r.get(0)?;
                Ok(ClassWorkflow {
                    exam_id: exam_id.to_string(),
                    class_id: class_id.to_string(),
                    status: WorkflowStatus::from_column(&status, 0)?,
                    version: r.get(1)?,
                    submitted_by: r.get(2)?,
                    submitted_at: r.get(3)?,
                    reviewed_by: r.get(4)?,
                    reviewed_at: r.get(5)?,
                    approved_by: r.get(6)?,
                    approved_at: r.get(7)?,
                    published_by: r.get(8)?,
                    published_at: r.get(9)?,
                })
            },
        )
        .optional()?;
    Ok(row.unwrap_or_else(|| ClassWorkflow::initial(exam_id, class_id)))
}

fn ensure_row(conn: &Connection, exam_id: &str, class_id: &str, now: &str) -> EngineResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO class_workflows(exam_id, class_id, status, version, updated_at)
         VALUES(?, ?, ?, 0, ?)",
        (exam_id, class_id, WorkflowStatus::MarksEntry.as_str(), now),
    )?;
    Ok(())
}

/// Open the write transaction every class mutation runs in. The lock is taken up
/// front; contention maps to a conflict.
pub fn begin_write(conn: &Connection) -> EngineResult<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(EngineError::from_write)
}

pub fn commit(tx: Transaction<'_>) -> EngineResult<()> {
    tx.commit().map_err(EngineError::from_write)
}

/// Capability check beyond the role table: teachers must hold the assignment they
/// claim, when assignments are enforced and recorded.
pub fn check_assignment(
    conn: &Connection,
    settings: &EngineSettings,
    exam: &Exam,
    class: &Class,
    actor: &Actor,
) -> EngineResult<()> {
    if !settings.enforce_assignment {
        return Ok(());
    }
    match actor.role {
        ActorRole::Admin => Ok(()),
        ActorRole::ClassTeacher => match &class.class_teacher_id {
            Some(teacher) if teacher != &actor.id => Err(EngineError::guard(
                "actor is not the class teacher of this class",
                json!({ "actorId": actor.id, "classId": class.id }),
            )),
            _ => Ok(()),
        },
        ActorRole::SubjectTeacher => {
            let teaches = registry::exam_subjects(conn, &exam.id)?
                .iter()
                .any(|s| s.teacher_id.as_deref() == Some(actor.id.as_str()));
            if teaches {
                Ok(())
            } else {
                Err(EngineError::guard(
                    "actor teaches no subject of this exam",
                    json!({ "actorId": actor.id, "examId": exam.id }),
                ))
            }
        }
    }
}

pub struct TransitionRequest<'a> {
    pub action: WorkflowAction,
    pub actor: &'a Actor,
    pub reason: Option<&'a str>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub previous_status: WorkflowStatus,
    pub new_status: WorkflowStatus,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_cards_generated: Option<usize>,
}

/// Apply one transition on a connection that is already inside a write transaction.
pub fn apply_in_tx(
    conn: &Connection,
    settings: &EngineSettings,
    exam: &Exam,
    class: &Class,
    req: &TransitionRequest<'_>,
) -> EngineResult<TransitionOutcome> {
    check_assignment(conn, settings, exam, class, req.actor)?;

    let now = now_rfc3339();
    ensure_row(conn, &exam.id, &class.id, &now)?;
    let current = load(conn, &exam.id, &class.id)?;
    if let Some(expected) = req.expected_version {
        if expected != current.version {
            return Err(EngineError::conflict(format!(
                "workflow changed: expected version {}, found {}",
                expected, current.version
            )));
        }
    }

    let to = next_status(current.status, req.action, req.actor.role)?;
    // Roster and subjects can change after submission, so every forward move re-checks
    // coverage. Reject stays open so the class can be walked back and completed.
    if req.action != WorkflowAction::Reject {
        let progress = completion::class_progress(conn, &exam.id, &class.id)?;
        if !progress.ready {
            return Err(EngineError::NotReady {
                completed: progress.completed_subjects,
                total: progress.total_subjects,
            });
        }
    }

    // Forward moves stamp their audit pair; reject clears the pair of the state left.
    let audit_sql = match (req.action, current.status) {
        (WorkflowAction::SubmitForReview, _) => "submitted_by = ?1, submitted_at = ?2",
        (WorkflowAction::Review, _) => "reviewed_by = ?1, reviewed_at = ?2",
        (WorkflowAction::Approve, _) => "approved_by = ?1, approved_at = ?2",
        (WorkflowAction::Publish, _) | (WorkflowAction::Republish, _) => {
            "published_by = ?1, published_at = ?2"
        }
        (WorkflowAction::Reject, WorkflowStatus::ReadyForReview) => {
            "submitted_by = NULL, submitted_at = NULL"
        }
        (WorkflowAction::Reject, WorkflowStatus::Reviewed) => {
            "reviewed_by = NULL, reviewed_at = NULL"
        }
        (WorkflowAction::Reject, _) => "approved_by = NULL, approved_at = NULL",
    };
    let sql = format!(
        "UPDATE class_workflows
         SET status = ?3, version = version + 1, updated_at = ?2, {}
         WHERE exam_id = ?4 AND class_id = ?5 AND version = ?6",
        audit_sql
    );
    let changed = conn.execute(
        &sql,
        (
            &req.actor.id,
            &now,
            to.as_str(),
            &exam.id,
            &class.id,
            current.version,
        ),
    )?;
    if changed == 0 {
        return Err(EngineError::conflict("workflow changed concurrently; retry"));
    }

    let report_cards_generated = match req.action {
        WorkflowAction::Publish | WorkflowAction::Republish => Some(
            reportcards::generate_for_class(conn, settings.grade_scale, &exam.id, &class.id, &now)?,
        ),
        _ => None,
    };

    record_event(conn, &exam.id, &class.id, req, current.status, to, &now)?;

    Ok(TransitionOutcome {
        previous_status: current.status,
        new_status: to,
        version: current.version + 1,
        report_cards_generated,
    })
}

/// `transitionWorkflow`: validate, lock, apply, commit. Nothing is written unless the
/// whole transition (including snapshot generation on publish) succeeds.
pub fn transition(
    conn: &Connection,
    settings: &EngineSettings,
    exam_id: &str,
    class_id: &str,
    req: &TransitionRequest<'_>,
) -> EngineResult<TransitionOutcome> {
    let (exam, class) = registry::exam_and_class(conn, exam_id, class_id)?;
    let tx = begin_write(conn)?;
    let outcome = apply_in_tx(&tx, settings, &exam, &class, req)?;
    commit(tx)?;

    tracing::info!(
        exam_id,
        class_id,
        action = req.action.as_str(),
        actor = %req.actor.id,
        from = outcome.previous_status.as_str(),
        to = outcome.new_status.as_str(),
        version = outcome.version,
        "workflow transition"
    );
    Ok(outcome)
}

fn record_event(
    conn: &Connection,
    exam_id: &str,
    class_id: &str,
    req: &TransitionRequest<'_>,
    from: WorkflowStatus,
    to: WorkflowStatus,
    now: &str,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO workflow_events(id, exam_id, class_id, seq, action, from_status, to_status, actor_id, actor_role, reason, at)
         VALUES(?1, ?2, ?3,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM workflow_events WHERE exam_id = ?2 AND class_id = ?3),
                ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        (
            Uuid::new_v4().to_string(),
            exam_id,
            class_id,
            req.action.as_str(),
            from.as_str(),
            to.as_str(),
            &req.actor.id,
            req.actor.role.as_str(),
            req.reason,
            now,
        ),
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub seq: i64,
    pub action: String,
    pub from_status: String,
    pub to_status: String,
    pub actor_id: String,
    pub actor_role: String,
    pub reason: Option<String>,
    pub at: String,
}

pub fn history(conn: &Connection, exam_id: &str, class_id: &str) -> EngineResult<Vec<WorkflowEvent>> {
    let mut stmt = conn.prepare(
        "SELECT seq, action, from_status, to_status, actor_id, actor_role, reason, at
         FROM workflow_events
         WHERE exam_id = ? AND class_id = ?
         ORDER BY seq",
    )?;
    let rows = stmt
        .query_map((exam_id, class_id), |r| {
            Ok(WorkflowEvent {
                seq: r.get(0)?,
                action: r.get(1)?,
                from_status: r.get(2)?,
                to_status: r.get(3)?,
                actor_id: r.get(4)?,
                actor_role: r.get(5)?,
                reason: r.get(6)?,
                at: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
