use crate::academics::{find_year, parse_id, PeriodService};
use crate::db::Store;
use crate::error::{Result, SchoolError};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Active,
    Withdrawn,
    Graduated,
}

impl StudentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "withdrawn" => Some(Self::Withdrawn),
            "graduated" => Some(Self::Graduated),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Withdrawn => "withdrawn",
            Self::Graduated => "graduated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub id: String,
    pub name: String,
    pub is_graduate: bool,
    pub student_count: i64,
}

/// A student's current placement, as moved by promotion and undo.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub student_id: String,
    pub display_name: String,
    pub status: String,
    pub class_id: String,
    pub class_name: String,
    pub previous_class_id: Option<String>,
    pub term_id: String,
}

const ASSIGNMENT_SELECT: &str = "SELECT
       sc.id,
       s.id,
       s.last_name || ', ' || s.first_name,
       s.status,
       sc.class_id,
       c.name,
       sc.previous_class_id,
       sc.term_id
     FROM student_classes sc
     JOIN students s ON s.id = sc.student_id
     JOIN classes c ON c.id = sc.class_id";

fn assignment_from_row(r: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: r.get(0)?,
        student_id: r.get(1)?,
        display_name: r.get(2)?,
        status: r.get(3)?,
        class_id: r.get(4)?,
        class_name: r.get(5)?,
        previous_class_id: r.get(6)?,
        term_id: r.get(7)?,
    })
}

pub fn class_exists(conn: &Connection, class_id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

fn query_assignments(conn: &Connection, filter: &str, param: Option<&str>) -> Result<Vec<Assignment>> {
    let sql = format!("{ASSIGNMENT_SELECT} {filter} ORDER BY s.last_name, s.first_name, s.id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = match param {
        Some(p) => stmt
            .query_map([p], assignment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        None => stmt
            .query_map([], assignment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
    };
    Ok(rows)
}

/// Classes, students and their class assignments.
#[derive(Clone)]
pub struct Roster {
    store: Arc<Store>,
    periods: PeriodService,
}

impl Roster {
    pub fn new(store: Arc<Store>, periods: PeriodService) -> Self {
        Self { store, periods }
    }

    pub fn create_class(&self, name: &str) -> Result<ClassSummary> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SchoolError::validation("name must not be empty"));
        }
        let conn = self.store.acquire()?;
        let class_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO classes(id, name, is_graduate) VALUES(?, ?, 0)",
            (&class_id, name),
        )?;
        info!(class_id = %class_id, name, "class created");
        Ok(ClassSummary {
            id: class_id,
            name: name.to_string(),
            is_graduate: false,
            student_count: 0,
        })
    }

    pub fn list_classes(&self) -> Result<Vec<ClassSummary>> {
        let conn = self.store.acquire()?;
        // Correlated subquery so the join cannot double count.
        let mut stmt = conn.prepare(
            "SELECT
               c.id,
               c.name,
               c.is_graduate,
               (SELECT COUNT(*) FROM student_classes sc WHERE sc.class_id = c.id) AS student_count
             FROM classes c
             ORDER BY c.is_graduate, c.name",
        )?;
        let classes = stmt
            .query_map([], |r| {
                Ok(ClassSummary {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    is_graduate: r.get(2)?,
                    student_count: r.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(classes)
    }

    /// Enrols a new active student into `class_id` for the active term.
    pub fn create_student(&self, first_name: &str, last_name: &str, class_id: &str) -> Result<Assignment> {
        let (first_name, last_name) = (first_name.trim(), last_name.trim());
        if first_name.is_empty() || last_name.is_empty() {
            return Err(SchoolError::validation("first and last name are required"));
        }
        let class_id = parse_id(class_id, "class")?;
        let term = self.periods.cached_term()?;

        let mut conn = self.store.acquire()?;
        let tx = conn.transaction()?;
        if !class_exists(&tx, &class_id)? {
            return Err(SchoolError::not_found("class", class_id));
        }
        let student_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO students(id, first_name, last_name, status) VALUES(?, ?, ?, 'active')",
            (&student_id, first_name, last_name),
        )?;
        tx.execute(
            "INSERT INTO student_classes(id, student_id, class_id, previous_class_id, term_id)
             VALUES(?, ?, ?, NULL, ?)",
            (Uuid::new_v4().to_string(), &student_id, &class_id, &term.term_id),
        )?;
        let assignment = query_assignments(&tx, "WHERE s.id = ?", Some(&student_id))?
            .into_iter()
            .next()
            .ok_or_else(|| SchoolError::not_found("student", student_id.as_str()))?;
        tx.commit()?;
        Ok(assignment)
    }

    pub fn set_student_status(&self, student_id: &str, status: StudentStatus) -> Result<()> {
        let student_id = parse_id(student_id, "student")?;
        let conn = self.store.acquire()?;
        let changed = conn.execute(
            "UPDATE students SET status = ? WHERE id = ?",
            (status.as_str(), &student_id),
        )?;
        if changed == 0 {
            return Err(SchoolError::not_found("student", student_id));
        }
        info!(student_id = %student_id, status = status.as_str(), "student status changed");
        Ok(())
    }

    pub fn assignments(&self) -> Result<Vec<Assignment>> {
        let conn = self.store.acquire()?;
        query_assignments(&conn, "", None)
    }

    pub fn assignment(&self, student_id: &str) -> Result<Assignment> {
        let student_id = parse_id(student_id, "student")?;
        let conn = self.store.acquire()?;
        query_assignments(&conn, "WHERE s.id = ?", Some(&student_id))?
            .into_iter()
            .next()
            .ok_or_else(|| SchoolError::not_found("student", student_id))
    }

    /// Students placed in the graduate class of `year_id`.
    pub fn graduates(&self, year_id: &str) -> Result<Vec<Assignment>> {
        let year_id = parse_id(year_id, "academic year")?;
        let conn = self.store.acquire()?;
        let year = find_year(&conn, &year_id)?
            .ok_or_else(|| SchoolError::not_found("academic year", year_id.as_str()))?;
        let Some(graduate_class_id) = year.graduate_class_id else {
            return Ok(Vec::new());
        };
        query_assignments(&conn, "WHERE sc.class_id = ?", Some(&graduate_class_id))
    }
}
