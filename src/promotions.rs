//! Promotion rules and the yearly bulk promotion of students.
//!
//! A rule maps a class onto the class its students move into; a class with no
//! rule keeps its students in place. Promotion happens once per term switch:
//! the newly active term remembers the term it replaced, and that pair is
//! what the promotion ledger guards against being promoted twice. Undo is
//! single-level and only ever targets the newest ledger entry.

use crate::academics::{find_term, parse_id};
use crate::db::Store;
use crate::error::{Result, SchoolError};
use crate::roster::class_exists;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRule {
    pub class_id: String,
    pub next_class_id: Option<String>,
}

/// A rule joined with human-readable class names.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleView {
    pub class_id: String,
    pub class_name: String,
    pub next_class_id: Option<String>,
    pub next_class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionEvent {
    pub id: String,
    pub previous_term_id: String,
    pub term_id: String,
    pub undone: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionSummary {
    pub event_id: String,
    pub previous_term_id: String,
    pub term_id: String,
    pub moved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoSummary {
    pub event_id: String,
    pub restored: usize,
}

/// Inserts a rule, replacing the target of any existing rule for the same class.
pub fn upsert_rule(conn: &Connection, rule: &PromotionRule) -> Result<()> {
    conn.execute(
        "INSERT INTO class_promotions(class_id, next_class_id) VALUES(?, ?)
         ON CONFLICT(class_id) DO UPDATE SET next_class_id = excluded.next_class_id",
        (&rule.class_id, &rule.next_class_id),
    )?;
    Ok(())
}

pub fn list_rules(conn: &Connection) -> Result<Vec<RuleView>> {
    let mut stmt = conn.prepare(
        "SELECT cp.class_id, c1.name, cp.next_class_id, c2.name
         FROM class_promotions cp
         JOIN classes c1 ON c1.id = cp.class_id
         LEFT JOIN classes c2 ON c2.id = cp.next_class_id
         ORDER BY c1.name",
    )?;
    let rules = stmt
        .query_map([], |r| {
            Ok(RuleView {
                class_id: r.get(0)?,
                class_name: r.get(1)?,
                next_class_id: r.get(2)?,
                next_class_name: r.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rules)
}

pub fn reset_rules(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM class_promotions", [])?)
}

fn reverse_rule_exists(conn: &Connection, class_id: &str, next_class_id: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM class_promotions WHERE class_id = ? AND next_class_id = ?",
            [next_class_id, class_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn event_from_row(r: &Row<'_>) -> rusqlite::Result<PromotionEvent> {
    Ok(PromotionEvent {
        id: r.get(0)?,
        previous_term_id: r.get(1)?,
        term_id: r.get(2)?,
        undone: r.get(3)?,
        created_at: r.get(4)?,
    })
}

/// Newest entry of the promotion ledger, if any promotion ever ran.
pub fn latest_event(conn: &Connection) -> Result<Option<PromotionEvent>> {
    Ok(conn
        .query_row(
            "SELECT id, previous_term_id, term_id, undone, created_at
             FROM promotion_events
             ORDER BY seq DESC
             LIMIT 1",
            [],
            event_from_row,
        )
        .optional()?)
}

fn ensure_not_promoted(conn: &Connection, previous_term_id: &str) -> Result<()> {
    match latest_event(conn)? {
        Some(last) if last.previous_term_id == previous_term_id => {
            Err(SchoolError::AlreadyPromoted)
        }
        _ => Ok(()),
    }
}

fn undo_target(conn: &Connection, term_id: &str) -> Result<PromotionEvent> {
    let Some(last) = latest_event(conn)? else {
        return Err(SchoolError::UndoRejected("no promotion to undo".into()));
    };
    if last.previous_term_id != term_id {
        return Err(SchoolError::UndoRejected(
            "term does not match the last promotion".into(),
        ));
    }
    if last.undone {
        return Err(SchoolError::UndoRejected(
            "last promotion was already undone".into(),
        ));
    }
    Ok(last)
}

fn log_failure<'a>(action: &'static str, term_id: &'a str) -> impl FnOnce(&SchoolError) + 'a {
    move |e| {
        if e.is_internal() {
            error!(term_id, error = %e, "failed to {action}");
        } else {
            warn!(term_id, code = e.code(), "{action} rejected: {e}");
        }
    }
}

#[derive(Clone)]
pub struct PromotionEngine {
    store: Arc<Store>,
}

impl PromotionEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Validates and stores a rule. No student moves until `promote_students`.
    ///
    /// `next_class_id = None` marks `class_id` as terminal.
    pub fn submit_promotion(
        &self,
        class_id: &str,
        next_class_id: Option<&str>,
    ) -> Result<PromotionRule> {
        let class_id = parse_id(class_id, "class")?;
        let next_class_id = next_class_id
            .map(|id| parse_id(id, "next class"))
            .transpose()?;
        if next_class_id.as_deref() == Some(class_id.as_str()) {
            return Err(SchoolError::SelfPromotion);
        }

        let mut conn = self.store.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !class_exists(&tx, &class_id)? {
            return Err(SchoolError::not_found("class", class_id));
        }
        if let Some(next) = next_class_id.as_deref() {
            if !class_exists(&tx, next)? {
                return Err(SchoolError::not_found("class", next));
            }
            if reverse_rule_exists(&tx, &class_id, next)? {
                return Err(SchoolError::ReverseRule);
            }
        }

        let rule = PromotionRule {
            class_id,
            next_class_id,
        };
        upsert_rule(&tx, &rule)?;
        tx.commit()?;

        info!(class_id = %rule.class_id, next_class_id = ?rule.next_class_id, "promotion rule saved");
        Ok(rule)
    }

    pub fn list_promotion_rules(&self) -> Result<Vec<RuleView>> {
        let conn = self.store.acquire()?;
        list_rules(&conn)
    }

    /// Deletes every rule so a new promotion cycle starts from nothing.
    pub fn reset_promotion_rules(&self) -> Result<usize> {
        let conn = self.store.acquire()?;
        let removed = reset_rules(&conn)?;
        info!(removed, "promotion rules reset");
        Ok(removed)
    }

    pub fn last_promotion(&self) -> Result<Option<PromotionEvent>> {
        let conn = self.store.acquire()?;
        latest_event(&conn)
    }

    /// Moves every active student along the promotion rules, once per term switch.
    ///
    /// `term_id` must already have replaced another term as the active one.
    /// All assignments move in one statement inside one transaction, together
    /// with the ledger entry and the snapshot that `undo_promotion` restores.
    pub fn promote_students(&self, term_id: &str) -> Result<PromotionSummary> {
        let term_id = parse_id(term_id, "term")?;
        self.promote(&term_id)
            .inspect_err(log_failure("promote students", &term_id))
    }

    fn promote(&self, term_id: &str) -> Result<PromotionSummary> {
        let mut conn = self.store.acquire()?;

        let term = find_term(&conn, term_id)?.ok_or_else(|| SchoolError::not_found("term", term_id))?;
        let Some(previous_term_id) = term.previous_term_id else {
            return Err(SchoolError::SwitchTermFirst);
        };
        ensure_not_promoted(&conn, &previous_term_id)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Another worker may have promoted the same pair since the check above.
        ensure_not_promoted(&tx, &previous_term_id)?;

        let event_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO promotion_events(id, previous_term_id, term_id, undone, created_at)
             VALUES(?, ?, ?, 0, ?)",
            (
                &event_id,
                &previous_term_id,
                term_id,
                chrono::Utc::now().to_rfc3339(),
            ),
        )?;
        tx.execute(
            "INSERT INTO promotion_snapshots(event_id, assignment_id, class_id, previous_class_id, term_id)
             SELECT ?, sc.id, sc.class_id, sc.previous_class_id, sc.term_id
             FROM student_classes sc
             JOIN students s ON s.id = sc.student_id
             WHERE s.status = 'active'",
            [&event_id],
        )?;
        // SQLite evaluates every SET expression against the pre-update row.
        let moved = tx.execute(
            "UPDATE student_classes
             SET previous_class_id = class_id,
                 class_id = COALESCE(
                   (SELECT cp.next_class_id FROM class_promotions cp
                    WHERE cp.class_id = student_classes.class_id),
                   class_id),
                 term_id = ?
             WHERE student_id IN (SELECT id FROM students WHERE status = 'active')",
            [term_id],
        )?;
        tx.commit()?;

        info!(
            event_id = %event_id,
            previous_term_id = %previous_term_id,
            term_id,
            moved,
            "students promoted"
        );
        Ok(PromotionSummary {
            event_id,
            previous_term_id,
            term_id: term_id.to_string(),
            moved,
        })
    }

    /// Reverts the newest promotion. `term_id` names the term promoted *from*.
    pub fn undo_promotion(&self, term_id: &str) -> Result<UndoSummary> {
        let term_id = parse_id(term_id, "term")?;
        self.undo(&term_id)
            .inspect_err(log_failure("undo promotion", &term_id))
    }

    fn undo(&self, term_id: &str) -> Result<UndoSummary> {
        let mut conn = self.store.acquire()?;
        undo_target(&conn, term_id)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let event = undo_target(&tx, term_id)?;
        let restored = tx.execute(
            "UPDATE student_classes
             SET class_id = ps.class_id,
                 previous_class_id = ps.previous_class_id,
                 term_id = ps.term_id
             FROM promotion_snapshots ps
             WHERE ps.assignment_id = student_classes.id AND ps.event_id = ?",
            [&event.id],
        )?;
        tx.execute(
            "UPDATE promotion_events SET undone = 1 WHERE id = ?",
            [&event.id],
        )?;
        tx.commit()?;

        info!(event_id = %event.id, term_id, restored, "promotion undone");
        Ok(UndoSummary {
            event_id: event.id,
            restored,
        })
    }
}
