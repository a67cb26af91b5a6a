//! Academic years, terms and the school-wide active period.
//!
//! At most one year and one term carry `active = 1`. Switching either one is a
//! deactivate-then-activate sequence inside a single `BEGIN IMMEDIATE`
//! transaction; the period cache is written only after that transaction
//! commits, so it never runs ahead of the store.

use crate::cache::KeyValueCache;
use crate::db::Store;
use crate::error::{Result, SchoolError};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
    pub graduate_class_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub id: String,
    pub academic_year_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
    pub previous_term_id: Option<String>,
}

/// Snapshot of the active year as held in the period cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedAcademicYear {
    pub academic_year_id: String,
    pub graduate_class_id: Option<String>,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
}

/// Snapshot of the active term as held in the period cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTerm {
    pub term_id: String,
    pub academic_year_id: String,
    pub previous_term_id: Option<String>,
    pub name: String,
    pub opening_date: NaiveDate,
    pub closing_date: NaiveDate,
    pub active: bool,
}

impl From<&AcademicYear> for CachedAcademicYear {
    fn from(y: &AcademicYear) -> Self {
        Self {
            academic_year_id: y.id.clone(),
            graduate_class_id: y.graduate_class_id.clone(),
            name: y.name.clone(),
            start_date: y.start_date,
            end_date: y.end_date,
            active: y.active,
        }
    }
}

impl From<&Term> for CachedTerm {
    fn from(t: &Term) -> Self {
        Self {
            term_id: t.id.clone(),
            academic_year_id: t.academic_year_id.clone(),
            previous_term_id: t.previous_term_id.clone(),
            name: t.name.clone(),
            opening_date: t.start_date,
            closing_date: t.end_date,
            active: t.active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodKey {
    AcademicYear,
    Term,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedPeriod {
    AcademicYear(CachedAcademicYear),
    Term(CachedTerm),
}

pub type PeriodCache = dyn KeyValueCache<PeriodKey, CachedPeriod>;

/// Outcome of a switch: whichever row was active before, and the row now active.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation<T> {
    pub previous_id: Option<String>,
    pub current: T,
}

/// Name and date range shared by year and term create/edit requests.
#[derive(Debug, Clone)]
pub struct PeriodDraft {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

const YEAR_COLUMNS: &str = "id, name, start_date, end_date, active, graduate_class_id";
const TERM_COLUMNS: &str =
    "id, academic_year_id, name, start_date, end_date, active, previous_term_id";

fn year_from_row(r: &Row<'_>) -> rusqlite::Result<AcademicYear> {
    Ok(AcademicYear {
        id: r.get(0)?,
        name: r.get(1)?,
        start_date: r.get(2)?,
        end_date: r.get(3)?,
        active: r.get(4)?,
        graduate_class_id: r.get(5)?,
    })
}

fn term_from_row(r: &Row<'_>) -> rusqlite::Result<Term> {
    Ok(Term {
        id: r.get(0)?,
        academic_year_id: r.get(1)?,
        name: r.get(2)?,
        start_date: r.get(3)?,
        end_date: r.get(4)?,
        active: r.get(5)?,
        previous_term_id: r.get(6)?,
    })
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<String> {
    Uuid::parse_str(raw.trim())
        .map(|u| u.to_string())
        .map_err(|_| SchoolError::validation(format!("invalid {what} id: {raw:?}")))
}

pub fn find_year(conn: &Connection, year_id: &str) -> Result<Option<AcademicYear>> {
    let sql = format!("SELECT {YEAR_COLUMNS} FROM academic_years WHERE id = ?");
    Ok(conn.query_row(&sql, [year_id], year_from_row).optional()?)
}

pub fn find_term(conn: &Connection, term_id: &str) -> Result<Option<Term>> {
    let sql = format!("SELECT {TERM_COLUMNS} FROM terms WHERE id = ?");
    Ok(conn.query_row(&sql, [term_id], term_from_row).optional()?)
}

pub fn active_year(conn: &Connection) -> Result<Option<AcademicYear>> {
    let sql = format!("SELECT {YEAR_COLUMNS} FROM academic_years WHERE active = 1 LIMIT 1");
    Ok(conn.query_row(&sql, [], year_from_row).optional()?)
}

pub fn active_term(conn: &Connection) -> Result<Option<Term>> {
    let sql = format!("SELECT {TERM_COLUMNS} FROM terms WHERE active = 1 LIMIT 1");
    Ok(conn.query_row(&sql, [], term_from_row).optional()?)
}

/// Clears the active term and reports which one it was. No active term is not an error.
fn deactivate_term(conn: &Connection) -> Result<Option<String>> {
    let mut stmt = conn.prepare("UPDATE terms SET active = 0 WHERE active = 1 RETURNING id")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids.into_iter().next())
}

fn deactivate_year(conn: &Connection) -> Result<Option<String>> {
    let mut stmt =
        conn.prepare("UPDATE academic_years SET active = 0 WHERE active = 1 RETURNING id")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids.into_iter().next())
}

fn set_active_year(conn: &Connection, year_id: &str) -> Result<AcademicYear> {
    let sql = format!("UPDATE academic_years SET active = 1 WHERE id = ? RETURNING {YEAR_COLUMNS}");
    conn.query_row(&sql, [year_id], year_from_row)
        .optional()?
        .ok_or_else(|| SchoolError::not_found("academic year", year_id))
}

fn set_active_term(
    conn: &Connection,
    term_id: &str,
    previous_term_id: Option<&str>,
) -> Result<Term> {
    let sql = format!(
        "UPDATE terms SET active = 1, previous_term_id = ?2 WHERE id = ?1 RETURNING {TERM_COLUMNS}"
    );
    conn.query_row(&sql, (term_id, previous_term_id), term_from_row)
        .optional()?
        .ok_or_else(|| SchoolError::not_found("term", term_id))
}

fn validate_draft(draft: &PeriodDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        return Err(SchoolError::validation("name must not be empty"));
    }
    if draft.end_date < draft.start_date {
        return Err(SchoolError::validation("end date must not precede start date"));
    }
    Ok(())
}

fn validate_year_draft(conn: &Connection, draft: &PeriodDraft, exclude: Option<&str>) -> Result<()> {
    validate_draft(draft)?;
    if draft.end_date == draft.start_date {
        return Err(SchoolError::validation("academic year must span more than one day"));
    }
    let overlapping: Option<String> = conn
        .query_row(
            "SELECT name FROM academic_years
             WHERE start_date <= ?2 AND end_date >= ?1 AND id != COALESCE(?3, '')
             LIMIT 1",
            (draft.start_date, draft.end_date, exclude),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(name) = overlapping {
        return Err(SchoolError::validation(format!(
            "academic year overlaps with {name}"
        )));
    }
    Ok(())
}

fn validate_term_bounds(year: &AcademicYear, draft: &PeriodDraft) -> Result<()> {
    validate_draft(draft)?;
    if draft.start_date < year.start_date
        || draft.start_date > year.end_date
        || draft.end_date > year.end_date
    {
        return Err(SchoolError::validation(format!(
            "term dates must fall within {} ({} to {})",
            year.name, year.start_date, year.end_date
        )));
    }
    Ok(())
}

/// First term of `year_id` that the new date range would no longer cover.
fn term_outside(conn: &Connection, year_id: &str, draft: &PeriodDraft) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT name FROM terms
             WHERE academic_year_id = ?1 AND (start_date < ?2 OR end_date > ?3)
             ORDER BY start_date
             LIMIT 1",
            (year_id, draft.start_date, draft.end_date),
            |r| r.get(0),
        )
        .optional()?)
}

/// Loads a term whose academic year is the active one.
fn activatable_term(conn: &Connection, term_id: &str) -> Result<Term> {
    let term = find_term(conn, term_id)?.ok_or_else(|| SchoolError::not_found("term", term_id))?;
    let year_is_active = active_year(conn)?
        .map(|y| y.id == term.academic_year_id)
        .unwrap_or(false);
    if !year_is_active {
        warn!(term_id, academic_year_id = %term.academic_year_id, "term belongs to an inactive academic year");
        return Err(SchoolError::YearInactive {
            year_id: term.academic_year_id,
        });
    }
    Ok(term)
}

/// Period store operations plus the activation workflow.
#[derive(Clone)]
pub struct PeriodService {
    store: Arc<Store>,
    cache: Arc<PeriodCache>,
}

impl PeriodService {
    pub fn new(store: Arc<Store>, cache: Arc<PeriodCache>) -> Self {
        Self { store, cache }
    }

    /// Rebuilds both cache slots from the store. Run once when a workspace opens.
    pub fn warm_cache(&self) -> Result<()> {
        let conn = self.store.acquire()?;
        match active_year(&conn)? {
            Some(year) => {
                debug!(academic_year_id = %year.id, "cached active academic year");
                self.cache.set(
                    PeriodKey::AcademicYear,
                    CachedPeriod::AcademicYear(CachedAcademicYear::from(&year)),
                );
            }
            None => {
                warn!("no active academic year set");
                self.cache.remove(&PeriodKey::AcademicYear);
            }
        }
        match active_term(&conn)? {
            Some(term) => {
                debug!(term_id = %term.id, "cached active term");
                self.cache
                    .set(PeriodKey::Term, CachedPeriod::Term(CachedTerm::from(&term)));
            }
            None => {
                warn!("no active term set");
                self.cache.remove(&PeriodKey::Term);
            }
        }
        Ok(())
    }

    pub fn cached_year(&self) -> Result<CachedAcademicYear> {
        match self.cache.get(&PeriodKey::AcademicYear) {
            Some(CachedPeriod::AcademicYear(year)) => Ok(year),
            _ => Err(SchoolError::YearNotSet),
        }
    }

    pub fn cached_term(&self) -> Result<CachedTerm> {
        match self.cache.get(&PeriodKey::Term) {
            Some(CachedPeriod::Term(term)) => Ok(term),
            _ => Err(SchoolError::TermNotSet),
        }
    }

    /// Makes `year_id` the only active year. The active term, if any, is
    /// deactivated in the same transaction and dropped from the cache.
    pub fn activate_year(&self, year_id: &str) -> Result<Activation<CachedAcademicYear>> {
        let year_id = parse_id(year_id, "academic year")?;
        self.switch_year(&year_id).inspect_err(|e| {
            if e.is_internal() {
                error!(academic_year_id = %year_id, error = %e, "failed to activate academic year");
            }
        })
    }

    fn switch_year(&self, year_id: &str) -> Result<Activation<CachedAcademicYear>> {
        let mut conn = self.store.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(current) = active_year(&tx)? {
            if current.id == year_id {
                let snapshot = CachedAcademicYear::from(&current);
                self.cache.set(
                    PeriodKey::AcademicYear,
                    CachedPeriod::AcademicYear(snapshot.clone()),
                );
                return Ok(Activation {
                    previous_id: None,
                    current: snapshot,
                });
            }
        }

        let closed_term = deactivate_term(&tx)?;
        let previous_id = deactivate_year(&tx)?;
        let year = set_active_year(&tx, year_id)?;
        tx.commit()?;

        let snapshot = CachedAcademicYear::from(&year);
        self.cache.set(
            PeriodKey::AcademicYear,
            CachedPeriod::AcademicYear(snapshot.clone()),
        );
        self.cache.remove(&PeriodKey::Term);
        info!(
            academic_year_id = %year.id,
            previous = ?previous_id,
            closed_term = ?closed_term,
            "academic year activated"
        );

        Ok(Activation {
            previous_id,
            current: snapshot,
        })
    }

    /// Makes `term_id` the only active term, recording the term it replaces as
    /// its `previous_term_id`.
    pub fn activate_term(&self, term_id: &str) -> Result<Activation<CachedTerm>> {
        let term_id = parse_id(term_id, "term")?;
        self.switch_term(&term_id).inspect_err(|e| {
            if e.is_internal() {
                error!(term_id = %term_id, error = %e, "failed to activate term");
            }
        })
    }

    fn switch_term(&self, term_id: &str) -> Result<Activation<CachedTerm>> {
        let mut conn = self.store.acquire()?;
        activatable_term(&conn, term_id)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // A year switch may have committed since the check above.
        let term = activatable_term(&tx, term_id)?;
        if term.active {
            let snapshot = CachedTerm::from(&term);
            self.cache
                .set(PeriodKey::Term, CachedPeriod::Term(snapshot.clone()));
            return Ok(Activation {
                previous_id: term.previous_term_id,
                current: snapshot,
            });
        }

        let previous_id = deactivate_term(&tx)?;
        let activated = set_active_term(&tx, term_id, previous_id.as_deref())?;
        tx.commit()?;

        let snapshot = CachedTerm::from(&activated);
        self.cache
            .set(PeriodKey::Term, CachedPeriod::Term(snapshot.clone()));
        info!(term_id, previous = ?previous_id, "term activated");

        Ok(Activation {
            previous_id,
            current: snapshot,
        })
    }

    /// Creates an inactive year together with its `Graduates - <end year>` class.
    pub fn create_year(&self, draft: &PeriodDraft) -> Result<AcademicYear> {
        let mut conn = self.store.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        validate_year_draft(&tx, draft, None)?;

        let graduate_class_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO classes(id, name, is_graduate) VALUES(?, ?, 1)",
            (
                &graduate_class_id,
                format!("Graduates - {}", draft.end_date.year()),
            ),
        )?;

        let year = AcademicYear {
            id: Uuid::new_v4().to_string(),
            name: draft.name.trim().to_string(),
            start_date: draft.start_date,
            end_date: draft.end_date,
            active: false,
            graduate_class_id: Some(graduate_class_id),
        };
        tx.execute(
            "INSERT INTO academic_years(id, name, start_date, end_date, active, graduate_class_id)
             VALUES(?, ?, ?, ?, 0, ?)",
            (
                &year.id,
                &year.name,
                year.start_date,
                year.end_date,
                &year.graduate_class_id,
            ),
        )?;
        tx.commit()?;

        info!(academic_year_id = %year.id, name = %year.name, "academic year created");
        Ok(year)
    }

    /// Renames or re-dates a year. The `active` flag is never touched here.
    pub fn update_year(&self, year_id: &str, draft: &PeriodDraft) -> Result<AcademicYear> {
        let year_id = parse_id(year_id, "academic year")?;
        let mut conn = self.store.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if find_year(&tx, &year_id)?.is_none() {
            return Err(SchoolError::not_found("academic year", year_id));
        }
        validate_year_draft(&tx, draft, Some(&year_id))?;
        if let Some(term_name) = term_outside(&tx, &year_id, draft)? {
            return Err(SchoolError::validation(format!(
                "term {term_name} would fall outside the academic year"
            )));
        }
        tx.execute(
            "UPDATE academic_years SET name = ?, start_date = ?, end_date = ? WHERE id = ?",
            (draft.name.trim(), draft.start_date, draft.end_date, &year_id),
        )?;
        let year = find_year(&tx, &year_id)?
            .ok_or_else(|| SchoolError::not_found("academic year", year_id.as_str()))?;
        tx.commit()?;
        if year.active {
            self.cache.set(
                PeriodKey::AcademicYear,
                CachedPeriod::AcademicYear(CachedAcademicYear::from(&year)),
            );
        }
        Ok(year)
    }

    pub fn year(&self, year_id: &str) -> Result<AcademicYear> {
        let year_id = parse_id(year_id, "academic year")?;
        let conn = self.store.acquire()?;
        find_year(&conn, &year_id)?.ok_or_else(|| SchoolError::not_found("academic year", year_id))
    }

    pub fn list_years(&self) -> Result<Vec<AcademicYear>> {
        let conn = self.store.acquire()?;
        let sql = format!("SELECT {YEAR_COLUMNS} FROM academic_years ORDER BY start_date");
        let mut stmt = conn.prepare(&sql)?;
        let years = stmt
            .query_map([], year_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(years)
    }

    /// Adds an inactive term to the currently active year.
    pub fn create_term(&self, year_id: &str, draft: &PeriodDraft) -> Result<Term> {
        let year_id = parse_id(year_id, "academic year")?;
        let conn = self.store.acquire()?;
        let year = find_year(&conn, &year_id)?
            .ok_or_else(|| SchoolError::not_found("academic year", year_id.as_str()))?;
        if !year.active {
            return Err(SchoolError::YearInactive { year_id });
        }
        validate_term_bounds(&year, draft)?;

        let term = Term {
            id: Uuid::new_v4().to_string(),
            academic_year_id: year.id,
            name: draft.name.trim().to_string(),
            start_date: draft.start_date,
            end_date: draft.end_date,
            active: false,
            previous_term_id: None,
        };
        conn.execute(
            "INSERT INTO terms(id, academic_year_id, name, start_date, end_date, active)
             VALUES(?, ?, ?, ?, ?, 0)",
            (
                &term.id,
                &term.academic_year_id,
                &term.name,
                term.start_date,
                term.end_date,
            ),
        )?;
        info!(term_id = %term.id, academic_year_id = %term.academic_year_id, "term created");
        Ok(term)
    }

    pub fn update_term(&self, term_id: &str, draft: &PeriodDraft) -> Result<Term> {
        let term_id = parse_id(term_id, "term")?;
        let conn = self.store.acquire()?;
        let term =
            find_term(&conn, &term_id)?.ok_or_else(|| SchoolError::not_found("term", term_id.as_str()))?;
        let year = find_year(&conn, &term.academic_year_id)?
            .ok_or_else(|| SchoolError::not_found("academic year", term.academic_year_id.as_str()))?;
        validate_term_bounds(&year, draft)?;

        conn.execute(
            "UPDATE terms SET name = ?, start_date = ?, end_date = ? WHERE id = ?",
            (draft.name.trim(), draft.start_date, draft.end_date, &term_id),
        )?;
        let term =
            find_term(&conn, &term_id)?.ok_or_else(|| SchoolError::not_found("term", term_id.as_str()))?;
        if term.active {
            self.cache
                .set(PeriodKey::Term, CachedPeriod::Term(CachedTerm::from(&term)));
        }
        Ok(term)
    }

    pub fn term(&self, term_id: &str) -> Result<Term> {
        let term_id = parse_id(term_id, "term")?;
        let conn = self.store.acquire()?;
        find_term(&conn, &term_id)?.ok_or_else(|| SchoolError::not_found("term", term_id))
    }

    pub fn list_terms(&self, year_id: &str) -> Result<Vec<Term>> {
        let year_id = parse_id(year_id, "academic year")?;
        let conn = self.store.acquire()?;
        let sql = format!(
            "SELECT {TERM_COLUMNS} FROM terms WHERE academic_year_id = ? ORDER BY start_date"
        );
        let mut stmt = conn.prepare(&sql)?;
        let terms = stmt
            .query_map([&year_id], term_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(terms)
    }
}
