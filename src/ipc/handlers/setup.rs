use crate::ipc::helpers::{str_param, with_conn, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::settings::{self, SetupSection};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

fn setup_get(conn: &Connection) -> HandlerResult {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        out.insert(
            section.name().to_string(),
            settings::load_section(conn, section)?,
        );
    }
    Ok(Value::Object(out))
}

fn setup_update(conn: &Connection, req: &Request) -> HandlerResult {
    let section_raw = str_param(req, "section")?;
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "unknown section".into(),
            details: Some(json!({ "section": section_raw })),
        });
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    match settings::update_section(conn, section, patch)? {
        Ok(current) => {
            tracing::info!(section = section.name(), "setup updated");
            Ok(json!({ "section": section.name(), "value": current }))
        }
        Err(msg) => Err(HandlerErr::bad_params(msg)),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_conn(state, req, setup_get)),
        "setup.update" => Some(with_conn(state, req, |conn| setup_update(conn, req))),
        _ => None,
    }
}
