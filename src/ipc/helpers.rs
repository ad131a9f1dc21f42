use super::error::err;
use super::types::{AppState, Request};
use crate::error::EngineError;
use crate::settings::EngineSettings;
use crate::workflow::{Actor, ActorRole};
use rusqlite::Connection;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        Self {
            code: "db_error",
            message: format!("{e:#}"),
            details: None,
        }
    }
}

pub type HandlerResult = Result<serde_json::Value, HandlerErr>;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Run a handler body against the open workspace and wrap the outcome.
pub fn with_conn<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection) -> HandlerResult,
{
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match f(conn) {
        Ok(v) => super::error::ok(&req.id, v),
        Err(e) => {
            if e.code == "db_error" {
                tracing::warn!(method = %req.method, error = %e.message, "request failed");
            }
            e.response(&req.id)
        }
    }
}

pub fn str_param<'a>(req: &'a Request, key: &str) -> Result<&'a str, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

pub fn opt_str_param<'a>(req: &'a Request, key: &str) -> Result<Option<&'a str>, HandlerErr> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.trim()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn f64_param(req: &Request, key: &str) -> Result<f64, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))
}

pub fn i64_param(req: &Request, key: &str) -> Result<i64, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key)))
}

pub fn opt_i64_param(req: &Request, key: &str) -> Result<Option<i64>, HandlerErr> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn bool_param(req: &Request, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

/// The `(actorId, actorRole)` pair every mutating call carries.
pub fn actor_param(req: &Request) -> Result<Actor, HandlerErr> {
    let id = str_param(req, "actorId")?;
    let raw_role = str_param(req, "actorRole")?;
    let Some(role) = ActorRole::parse(raw_role) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "actorRole must be one of: class_teacher, subject_teacher, admin".into(),
            details: Some(json!({ "actorRole": raw_role })),
        });
    };
    Ok(Actor {
        id: id.to_string(),
        role,
    })
}

pub fn settings(conn: &Connection) -> Result<EngineSettings, HandlerErr> {
    Ok(EngineSettings::load(conn)?)
}

pub fn to_json<T: serde::Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "db_error",
        message: format!("failed to serialize result: {e}"),
        details: None,
    })
}
