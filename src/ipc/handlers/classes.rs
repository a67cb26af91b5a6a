use crate::ipc::error::respond;
use crate::ipc::helpers::{required_str, workspace, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster::StudentStatus;
use serde_json::json;

fn handle_classes_list(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(_) => return crate::ipc::error::ok(&req.id, json!({ "classes": [] })),
    };
    respond(
        &req.id,
        &req.method,
        ws.roster.list_classes().map(|classes| json!({ "classes": classes })),
    )
}

fn handle_classes_create(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(&req.id, &req.method, ws.roster.create_class(name))
}

fn handle_students_create(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let fields = (|| {
        Ok::<_, HandlerErr>((
            required_str(req, "firstName")?,
            required_str(req, "lastName")?,
            required_str(req, "classId")?,
        ))
    })();
    let (first, last, class_id) = match fields {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(
        &req.id,
        &req.method,
        ws.roster.create_student(first, last, class_id),
    )
}

fn handle_students_set_status(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let status = match required_str(req, "status").and_then(|s| {
        StudentStatus::parse(s).ok_or_else(|| {
            HandlerErr::bad_params("status must be one of active, withdrawn, graduated")
        })
    }) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    respond(
        &req.id,
        &req.method,
        ws.roster
            .set_student_status(student_id, status)
            .map(|()| json!({ "studentId": student_id, "status": status })),
    )
}

fn handle_students_assignments(state: &AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state) {
        Ok(ws) => ws,
        Err(e) => return e.response(&req.id),
    };
    respond(
        &req.id,
        &req.method,
        ws.roster
            .assignments()
            .map(|assignments| json!({ "assignments": assignments })),
    )
}

fn handle_graduates_list(state: &AppState, req: &Request) -> serde_json::Value {
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
        ws.roster
            .graduates(year_id)
            .map(|graduates| json!({ "graduates": graduates })),
    )
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.setStatus" => Some(handle_students_set_status(state, req)),
        "students.assignments" => Some(handle_students_assignments(state, req)),
        "graduates.list" => Some(handle_graduates_list(state, req)),
        _ => None,
    }
}
