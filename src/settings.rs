use crate::db;
use crate::grading::GradeScale;
use serde_json::{json, Map, Value};

pub const MAX_ENTRIES_PER_SUBMISSION: i64 = 5000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Grading,
    Workflow,
    Marks,
}

impl SetupSection {
    pub const ALL: [SetupSection; 3] = [Self::Grading, Self::Workflow, Self::Marks];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "workflow" => Some(Self::Workflow),
            "marks" => Some(Self::Marks),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Workflow => "workflow",
            Self::Marks => "marks",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Workflow => "setup.workflow",
            Self::Marks => "setup.marks",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({ "scale": "standard" }),
        SetupSection::Workflow => json!({
            "autoSubmitForReview": false,
            "enforceAssignment": true
        }),
        SetupSection::Marks => json!({
            "maxEntriesPerSubmission": MAX_ENTRIES_PER_SUBMISSION
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "scale" => {
                    let raw = v.as_str().ok_or_else(|| format!("{} must be string", k))?;
                    let Some(scale) = GradeScale::parse(raw) else {
                        return Err("scale must be one of: standard, extended".into());
                    };
                    obj.insert(k.clone(), Value::String(scale.as_str().to_string()));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Workflow => match k.as_str() {
                "autoSubmitForReview" | "enforceAssignment" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown workflow field: {}", k)),
            },
            SetupSection::Marks => match k.as_str() {
                "maxEntriesPerSubmission" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, MAX_ENTRIES_PER_SUBMISSION)?),
                    );
                }
                _ => return Err(format!("unknown marks field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Stored values were validated on write; a field this build no longer
            // knows keeps its default.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

/// Typed view of the workspace settings the engine consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub grade_scale: GradeScale,
    pub auto_submit_for_review: bool,
    pub enforce_assignment: bool,
    pub max_entries_per_submission: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            grade_scale: GradeScale::Standard,
            auto_submit_for_review: false,
            enforce_assignment: true,
            max_entries_per_submission: MAX_ENTRIES_PER_SUBMISSION as usize,
        }
    }
}

impl EngineSettings {
    pub fn load(conn: &rusqlite::Connection) -> anyhow::Result<Self> {
        let grading = load_section(conn, SetupSection::Grading)?;
        let workflow = load_section(conn, SetupSection::Workflow)?;
        let marks = load_section(conn, SetupSection::Marks)?;
        let defaults = Self::default();
        Ok(Self {
            grade_scale: grading
                .get("scale")
                .and_then(|v| v.as_str())
                .and_then(GradeScale::parse)
                .unwrap_or(defaults.grade_scale),
            auto_submit_for_review: workflow
                .get("autoSubmitForReview")
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.auto_submit_for_review),
            enforce_assignment: workflow
                .get("enforceAssignment")
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.enforce_assignment),
            max_entries_per_submission: marks
                .get("maxEntriesPerSubmission")
                .and_then(|v| v.as_i64())
                .map(|n| n as usize)
                .unwrap_or(defaults.max_entries_per_submission),
        })
    }
}
