use crate::error::SchoolError;
use crate::ipc::error::{fail, ok, respond};
use crate::ipc::helpers::{period_draft, required_str, workspace};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_years_list(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(_) => return ok(&req.id, json!({ "years": [] })),
    };
    respond(
        &req.id,
        &req.method,
        ws.periods.list_years().map(|years| json!({ "years": years })),
    )
}

fn handle_years_create(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let draft = match period_draft(req) {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };
    respond(&req.id, &req.method, ws.periods.create_year(&draft))
}

fn handle_years_update(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let (year_id, draft) = match required_str(req, "academicYearId").and_then(|id| Ok((id, period_draft(req)?))) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(&req.id, &req.method, ws.periods.update_year(year_id, &draft))
}

fn handle_years_activate(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(&req.id, &req.method, ws.periods.activate_year(year_id))
}

fn handle_terms_list(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(
        &req.id,
        &req.method,
        ws.periods.list_terms(year_id).map(|terms| json!({ "terms": terms })),
    )
}

fn handle_terms_create(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let (year_id, draft) = match required_str(req, "academicYearId").and_then(|id| Ok((id, period_draft(req)?))) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(&req.id, &req.method, ws.periods.create_term(year_id, &draft))
}

fn handle_terms_update(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let (term_id, draft) = match required_str(req, "termId").and_then(|id| Ok((id, period_draft(req)?))) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(&req.id, &req.method, ws.periods.update_term(term_id, &draft))
}

fn handle_terms_activate(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(&req.id, &req.method, ws.periods.activate_term(term_id))
}

// A missing term is reported only when the year itself is set, so a fresh
// workspace answers year_not_set first.
fn handle_period_current(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let year = match ws.periods.cached_year() {
        Ok(y) => y,
        Err(e) => return fail(&req.id, &req.method, &e),
    };
    match ws.periods.cached_term() {
        Ok(term) => ok(&req.id, json!({ "year": year, "term": term })),
        Err(SchoolError::TermNotSet) => ok(&req.id, json!({ "year": year, "term": null })),
        Err(e) => fail(&req.id, &req.method, &e),
    }
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "years.list" => Some(handle_years_list(state, req)),
        "years.create" => Some(handle_years_create(state, req)),
        "years.update" => Some(handle_years_update(state, req)),
        "years.activate" => Some(handle_years_activate(state, req)),
        "terms.list" => Some(handle_terms_list(state, req)),
        "terms.create" => Some(handle_terms_create(state, req)),
        "terms.update" => Some(handle_terms_update(state, req)),
        "terms.activate" => Some(handle_terms_activate(state, req)),
        "period.current" => Some(handle_period_current(state, req)),
        _ => None,
    }
}
