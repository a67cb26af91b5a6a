use crate::ipc::error::respond;
use crate::ipc::helpers::{optional_str, required_str, workspace};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_submit_rule(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let next_class_id = match optional_str(req, "nextClassId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(
        &req.id,
        &req.method,
        ws.promotions.submit_promotion(class_id, next_class_id),
    )
}

fn handle_list_rules(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    respond(
        &req.id,
        &req.method,
        ws.promotions
            .list_promotion_rules()
            .map(|rules| json!({ "rules": rules })),
    )
}

fn handle_reset_rules(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    respond(
        &req.id,
        &req.method,
        ws.promotions
            .reset_promotion_rules()
            .map(|removed| json!({ "removed": removed })),
    )
}

fn handle_promote(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(&req.id, &req.method, ws.promotions.promote_students(term_id))
}

fn handle_undo(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let term_id = match required_str(req, "previousTermId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(&req.id, &req.method, ws.promotions.undo_promotion(term_id))
}

fn handle_last(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    respond(
        &req.id,
        &req.method,
        ws.promotions
            .last_promotion()
            .map(|event| json!({ "event": event })),
    )
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "promotions.submitRule" => Some(handle_submit_rule(state, req)),
        "promotions.listRules" => Some(handle_list_rules(state, req)),
        "promotions.resetRules" => Some(handle_reset_rules(state, req)),
        "promotions.promote" => Some(handle_promote(state, req)),
        "promotions.undo" => Some(handle_undo(state, req)),
        "promotions.last" => Some(handle_last(state, req)),
        _ => None,
    }
}
