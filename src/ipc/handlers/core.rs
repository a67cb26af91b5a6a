use crate::db::PoolOptions;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Workspace};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace().map(|ws| ws.path.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match Workspace::open(&path, PoolOptions::from(&state.config)) {
        Ok(ws) => {
            let ws = state.replace_workspace(ws);
            tracing::info!(workspace = %ws.path.to_string_lossy(), "workspace selected");
            ok(
                &req.id,
                json!({
                    "workspacePath": ws.path.to_string_lossy(),
                    "activeYear": ws.periods.cached_year().ok(),
                    "activeTerm": ws.periods.cached_term().ok(),
                }),
            )
        }
        Err(e) => {
            tracing::error!(error = ?e, "failed to open workspace");
            err(&req.id, "db_open_failed", format!("{e:#}"), None)
        }
    }
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
