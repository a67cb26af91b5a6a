use chrono::NaiveDate;
use schoold::academics::{AcademicYear, PeriodDraft, Term};
use schoold::db::PoolOptions;
use schoold::ipc::Workspace;
use schoold::roster::{Assignment, StudentStatus};
use schoold::SchoolError;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn draft(name: &str, start: &str, end: &str) -> PeriodDraft {
    PeriodDraft {
        name: name.to_string(),
        start_date: NaiveDate::parse_from_str(start, "%Y-%m-%d").expect("valid date"),
        end_date: NaiveDate::parse_from_str(end, "%Y-%m-%d").expect("valid date"),
    }
}

/// One academic year with three terms, the first one active, and a roster of
/// four students: alice and bob in A, carol in C, dave in A but withdrawn.
struct School {
    ws: Workspace,
    year: AcademicYear,
    t1: Term,
    t2: Term,
    t3: Term,
    a: String,
    b: String,
    c: String,
    alice: String,
    bob: String,
    carol: String,
    dave: String,
    _dir: TempDir,
}

impl School {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let ws = Workspace::open(dir.path(), PoolOptions::default()).expect("open workspace");

        let year = ws
            .periods
            .create_year(&draft("2024/25", "2024-09-01", "2025-06-30"))
            .expect("create year");
        ws.periods.activate_year(&year.id).expect("activate year");
        let t1 = ws
            .periods
            .create_term(&year.id, &draft("Autumn", "2024-09-01", "2024-12-20"))
            .expect("create T1");
        let t2 = ws
            .periods
            .create_term(&year.id, &draft("Spring", "2025-01-06", "2025-03-28"))
            .expect("create T2");
        let t3 = ws
            .periods
            .create_term(&year.id, &draft("Summer", "2025-04-07", "2025-06-27"))
            .expect("create T3");
        ws.periods.activate_term(&t1.id).expect("activate T1");

        let a = ws.roster.create_class("A").expect("class A").id;
        let b = ws.roster.create_class("B").expect("class B").id;
        let c = ws.roster.create_class("C").expect("class C").id;
        ws.promotions
            .submit_promotion(&a, Some(&b))
            .expect("rule A -> B");

        let enrol = |first: &str, class_id: &str| {
            ws.roster
                .create_student(first, "Pupil", class_id)
                .expect("create student")
                .student_id
        };
        let alice = enrol("Alice", &a);
        let bob = enrol("Bob", &a);
        let carol = enrol("Carol", &c);
        let dave = enrol("Dave", &a);
        ws.roster
            .set_student_status(&dave, StudentStatus::Withdrawn)
            .expect("withdraw dave");

        School {
            ws,
            year,
            t1,
            t2,
            t3,
            a,
            b,
            c,
            alice,
            bob,
            carol,
            dave,
            _dir: dir,
        }
    }

    fn assignment(&self, student_id: &str) -> Assignment {
        self.ws.roster.assignment(student_id).expect("assignment")
    }

    fn switch_to(&self, term: &Term) {
        self.ws.periods.activate_term(&term.id).expect("activate term");
    }
}

#[test]
fn promotion_needs_a_term_switch_first() {
    let school = School::new();
    let before = school.ws.roster.assignments().expect("assignments");

    let err = school
        .ws
        .promotions
        .promote_students(&school.t1.id)
        .expect_err("T1 replaced nothing");
    assert!(matches!(err, SchoolError::SwitchTermFirst));
    assert_eq!(err.code(), "switch-term-first");
    assert_eq!(school.ws.roster.assignments().expect("assignments"), before);
    assert_eq!(school.ws.promotions.last_promotion().expect("last"), None);
}

#[test]
fn promotion_moves_active_students_along_rules() {
    let school = School::new();
    school.switch_to(&school.t2);

    let summary = school
        .ws
        .promotions
        .promote_students(&school.t2.id)
        .expect("promote");
    assert_eq!(summary.previous_term_id, school.t1.id);
    assert_eq!(summary.term_id, school.t2.id);
    assert_eq!(summary.moved, 3);

    for student in [&school.alice, &school.bob] {
        let a = school.assignment(student);
        assert_eq!(a.class_id, school.b);
        assert_eq!(a.class_name, "B");
        assert_eq!(a.previous_class_id.as_deref(), Some(school.a.as_str()));
        assert_eq!(a.term_id, school.t2.id);
    }

    // No rule for C: the student stays put but the move is still recorded.
    let carol = school.assignment(&school.carol);
    assert_eq!(carol.class_id, school.c);
    assert_eq!(carol.previous_class_id.as_deref(), Some(school.c.as_str()));
    assert_eq!(carol.term_id, school.t2.id);

    let dave = school.assignment(&school.dave);
    assert_eq!(dave.class_id, school.a);
    assert_eq!(dave.previous_class_id, None);
    assert_eq!(dave.term_id, school.t1.id);

    let last = school
        .ws
        .promotions
        .last_promotion()
        .expect("last")
        .expect("ledger entry");
    assert_eq!(last.id, summary.event_id);
    assert!(!last.undone);
}

#[test]
fn second_promotion_for_same_switch_is_rejected() {
    let school = School::new();
    school.switch_to(&school.t2);
    school
        .ws
        .promotions
        .promote_students(&school.t2.id)
        .expect("first promotion");
    let after_first = school.ws.roster.assignments().expect("assignments");

    let err = school
        .ws
        .promotions
        .promote_students(&school.t2.id)
        .expect_err("second promotion");
    assert!(matches!(err, SchoolError::AlreadyPromoted));
    assert_eq!(err.code(), "already-promoted");
    assert_eq!(school.ws.roster.assignments().expect("assignments"), after_first);
}

#[test]
fn undo_restores_assignments_exactly() {
    let school = School::new();
    school.switch_to(&school.t2);
    let before = school.ws.roster.assignments().expect("assignments");

    let promoted = school
        .ws
        .promotions
        .promote_students(&school.t2.id)
        .expect("promote");
    let undone = school
        .ws
        .promotions
        .undo_promotion(&school.t1.id)
        .expect("undo");
    assert_eq!(undone.event_id, promoted.event_id);
    assert_eq!(undone.restored, 3);
    assert_eq!(school.ws.roster.assignments().expect("assignments"), before);

    let err = school
        .ws
        .promotions
        .undo_promotion(&school.t1.id)
        .expect_err("undo twice");
    assert!(matches!(err, SchoolError::UndoRejected(_)));

    // The ledger still remembers the switch, so it cannot be promoted again.
    let err = school
        .ws
        .promotions
        .promote_students(&school.t2.id)
        .expect_err("promote after undo");
    assert!(matches!(err, SchoolError::AlreadyPromoted));
    assert_eq!(school.ws.roster.assignments().expect("assignments"), before);

    let last = school
        .ws
        .promotions
        .last_promotion()
        .expect("last")
        .expect("ledger entry");
    assert!(last.undone);
}

#[test]
fn undo_rejects_without_matching_promotion() {
    let school = School::new();

    let err = school
        .ws
        .promotions
        .undo_promotion(&school.t1.id)
        .expect_err("nothing to undo");
    assert!(matches!(err, SchoolError::UndoRejected(_)));
    assert_eq!(err.code(), "undo-rejected");

    school.switch_to(&school.t2);
    school
        .ws
        .promotions
        .promote_students(&school.t2.id)
        .expect("promote");
    let after = school.ws.roster.assignments().expect("assignments");

    let err = school
        .ws
        .promotions
        .undo_promotion(&school.t2.id)
        .expect_err("wrong term");
    assert!(matches!(err, SchoolError::UndoRejected(_)));
    assert_eq!(school.ws.roster.assignments().expect("assignments"), after);
}

#[test]
fn only_the_newest_promotion_can_be_undone() {
    let school = School::new();
    school.switch_to(&school.t2);
    school
        .ws
        .promotions
        .promote_students(&school.t2.id)
        .expect("promote T1 -> T2");
    let after_first = school.ws.roster.assignments().expect("assignments");

    school.switch_to(&school.t3);
    let second = school
        .ws
        .promotions
        .promote_students(&school.t3.id)
        .expect("promote T2 -> T3");
    assert_eq!(second.previous_term_id, school.t2.id);

    // Alice went A -> B, then B has no rule so she stays in B.
    let alice = school.assignment(&school.alice);
    assert_eq!(alice.class_id, school.b);
    assert_eq!(alice.previous_class_id.as_deref(), Some(school.b.as_str()));

    let err = school
        .ws
        .promotions
        .undo_promotion(&school.t1.id)
        .expect_err("older promotion");
    assert!(matches!(err, SchoolError::UndoRejected(_)));

    school
        .ws
        .promotions
        .undo_promotion(&school.t2.id)
        .expect("undo newest");
    assert_eq!(school.ws.roster.assignments().expect("assignments"), after_first);
}

#[test]
fn concurrent_promotions_apply_once() {
    let school = Arc::new(School::new());
    school.switch_to(&school.t2);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let school = Arc::clone(&school);
            thread::spawn(move || school.ws.promotions.promote_students(&school.t2.id))
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("worker"))
        .collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(r, Err(SchoolError::AlreadyPromoted)));
    }

    let alice = school.assignment(&school.alice);
    assert_eq!(alice.class_id, school.b);
    assert_eq!(alice.previous_class_id.as_deref(), Some(school.a.as_str()));
}

#[test]
fn promoting_into_graduate_class_lists_graduates() {
    let school = School::new();
    let graduate_class = school
        .year
        .graduate_class_id
        .clone()
        .expect("graduate class");
    school
        .ws
        .promotions
        .submit_promotion(&school.c, Some(&graduate_class))
        .expect("rule C -> graduates");
    assert!(school
        .ws
        .roster
        .graduates(&school.year.id)
        .expect("graduates")
        .is_empty());

    school.switch_to(&school.t2);
    school
        .ws
        .promotions
        .promote_students(&school.t2.id)
        .expect("promote");

    let graduates = school.ws.roster.graduates(&school.year.id).expect("graduates");
    assert_eq!(graduates.len(), 1);
    assert_eq!(graduates[0].student_id, school.carol);
    assert_eq!(graduates[0].class_id, graduate_class);
}

#[test]
fn unknown_term_is_not_found() {
    let school = School::new();
    let err = school
        .ws
        .promotions
        .promote_students("3c1e2f9a-1111-4222-8333-444455556666")
        .expect_err("unknown term");
    assert!(matches!(err, SchoolError::NotFound { .. }));

    let err = school
        .ws
        .promotions
        .promote_students("spring")
        .expect_err("malformed term");
    assert!(matches!(err, SchoolError::Validation(_)));
}
