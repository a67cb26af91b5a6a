use crate::academics::PeriodDraft;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request, Workspace};
use chrono::NaiveDate;
use std::sync::Arc;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, None)
    }
}

pub fn workspace(state: &AppState) -> Result<Arc<Workspace>, HandlerErr> {
    state.workspace().ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
    })
}

pub fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str<'a>(req: &'a Request, key: &str) -> Result<Option<&'a str>, HandlerErr> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string", key))),
    }
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = required_str(req, key)?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be a YYYY-MM-DD date", key)))
}

/// Reads `name`, `startDate` and `endDate`.
pub fn period_draft(req: &Request) -> Result<PeriodDraft, HandlerErr> {
    Ok(PeriodDraft {
        name: required_str(req, "name")?.to_string(),
        start_date: required_date(req, "startDate")?,
        end_date: required_date(req, "endDate")?,
    })
}
