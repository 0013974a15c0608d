//! Classifier rule order and the individual business checks.

mod common;

use chrono::NaiveDate;
use closeout_core::{
    classifier::{
        has_active_note, has_balance, is_valid_email, Classifier, ClassifierRules, DedupKey,
        Disposition,
    },
    config::PipelineVariant,
    record::{AccountNote, EntityType, Record},
};
use common::today;

fn record(account_id: i64, entity_id: i64, email: &str) -> Record {
    Record {
        account_id,
        entity_type: EntityType::Pers,
        entity_id,
        close_date: NaiveDate::from_ymd_opt(2025, 7, 14),
        minor: Some("INAU".into()),
        email: Some(email.into()),
        member_name: Some("Keith Tester".into()),
        email_date: NaiveDate::from_ymd_opt(2025, 7, 28),
        balance: Some(0.0),
        note: None,
        unreadable: Vec::new(),
    }
}

fn note(class_code: &str, inactive: Option<NaiveDate>) -> Option<AccountNote> {
    Some(AccountNote {
        class_code: class_code.into(),
        inactive_date: inactive,
    })
}

fn notice_rules() -> ClassifierRules {
    ClassifierRules {
        dedup_key: DedupKey::Email,
        validate_email: true,
        check_balance: true,
        active_note_class: Some("8FDI".into()),
    }
}

fn cleanup_rules() -> ClassifierRules {
    ClassifierRules {
        dedup_key: DedupKey::Entity,
        validate_email: false,
        ..notice_rules()
    }
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Duplicate suppression
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn second_record_with_same_email_is_duplicate() {
    let mut classifier = Classifier::new(notice_rules(), today());
    assert_eq!(classifier.classify(&record(1, 10, "a@example.com")), Disposition::Pending);
    assert_eq!(
        classifier.classify(&record(2, 11, "a@example.com")),
        Disposition::SkippedDuplicate
    );
}

#[test]
fn email_dedup_ignores_case_and_padding() {
    let mut classifier = Classifier::new(notice_rules(), today());
    assert_eq!(classifier.classify(&record(1, 10, "Keith@Example.com")), Disposition::Pending);
    assert_eq!(
        classifier.classify(&record(2, 11, " keith@example.COM ")),
        Disposition::SkippedDuplicate
    );
}

#[test]
fn excluded_record_does_not_claim_its_key() {
    let mut classifier = Classifier::new(notice_rules(), today());
    let mut first = record(1, 10, "a@example.com");
    first.balance = Some(12.5);
    assert_eq!(classifier.classify(&first), Disposition::SkippedHasBalance);
    assert_eq!(classifier.classify(&record(2, 10, "a@example.com")), Disposition::Pending);
}

#[test]
fn entity_dedup_keys_on_type_and_number() {
    let mut classifier = Classifier::new(cleanup_rules(), today());
    assert_eq!(classifier.classify(&record(1, 10, "")), Disposition::Pending);
    assert_eq!(classifier.classify(&record(2, 10, "")), Disposition::SkippedDuplicate);

    let mut org = record(3, 10, "");
    org.entity_type = EntityType::Org;
    assert_eq!(classifier.classify(&org), Disposition::Pending);
}

#[test]
fn account_dedup_lets_one_owner_close_many_accounts() {
    let rules = ClassifierRules {
        dedup_key: DedupKey::Account,
        ..cleanup_rules()
    };
    let mut classifier = Classifier::new(rules, today());
    assert_eq!(classifier.classify(&record(1, 10, "")), Disposition::Pending);
    assert_eq!(classifier.classify(&record(2, 10, "")), Disposition::Pending);
    assert_eq!(classifier.classify(&record(1, 10, "")), Disposition::SkippedDuplicate);
}

#[test]
fn duplicate_check_runs_before_every_other_rule() {
    let mut classifier = Classifier::new(cleanup_rules(), today());
    assert_eq!(classifier.classify(&record(1, 10, "")), Disposition::Pending);

    let mut repeat = record(2, 10, "");
    repeat.balance = Some(500.0);
    repeat.note = note("8FDI", Some(ymd(2625, 1, 1)));
    assert_eq!(classifier.classify(&repeat), Disposition::SkippedDuplicate);
}

// ─────────────────────────────────────────────────────────────────────────────
// Rule order
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unreadable_record_is_an_exception_and_claims_nothing() {
    let mut classifier = Classifier::new(notice_rules(), today());
    let mut broken = record(1, 10, "a@example.com");
    broken.unreadable = vec!["CLOSEDATE 'July 15th' is not a date".into()];

    let disposition = classifier.classify(&broken);
    assert_eq!(
        disposition,
        Disposition::SkippedUnreadable {
            reason: "CLOSEDATE 'July 15th' is not a date".into()
        }
    );
    assert!(disposition.is_exception());
    assert_eq!(
        disposition.result_text(PipelineVariant::MemberNotice),
        "Unreadable Record: CLOSEDATE 'July 15th' is not a date"
    );

    assert_eq!(classifier.classify(&record(2, 11, "a@example.com")), Disposition::Pending);
}

#[test]
fn invalid_email_wins_over_balance_and_note() {
    let mut classifier = Classifier::new(notice_rules(), today());
    let mut r = record(1, 10, "stephon");
    r.balance = Some(1000.0);
    r.note = note("8FDI", Some(ymd(2625, 1, 1)));
    assert_eq!(classifier.classify(&r), Disposition::SkippedInvalidEmail);
}

#[test]
fn balance_wins_over_active_note() {
    let mut classifier = Classifier::new(notice_rules(), today());
    let mut r = record(1, 10, "a@example.com");
    r.balance = Some(1000.0);
    r.note = note("8FDI", Some(ymd(2625, 1, 1)));
    assert_eq!(classifier.classify(&r), Disposition::SkippedHasBalance);
}

#[test]
fn active_note_blocks_record() {
    let mut classifier = Classifier::new(notice_rules(), today());
    let mut r = record(1, 10, "a@example.com");
    r.note = note("8FDI", Some(ymd(2625, 1, 1)));
    assert_eq!(
        classifier.classify(&r),
        Disposition::SkippedActiveNote { class_code: "8FDI".into() }
    );
}

#[test]
fn disabled_checks_are_skipped() {
    let rules = ClassifierRules {
        dedup_key: DedupKey::Email,
        validate_email: false,
        check_balance: false,
        active_note_class: None,
    };
    let mut classifier = Classifier::new(rules, today());
    let mut r = record(1, 10, "not-an-address");
    r.balance = Some(99.0);
    r.note = note("8FDI", Some(ymd(2625, 1, 1)));
    assert_eq!(classifier.classify(&r), Disposition::Pending);
}

// ─────────────────────────────────────────────────────────────────────────────
// Individual checks
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn balance_check_treats_missing_as_zero() {
    let mut r = record(1, 10, "a@example.com");
    r.balance = None;
    assert!(!has_balance(&r));
    r.balance = Some(0.0);
    assert!(!has_balance(&r));
    r.balance = Some(-4.25);
    assert!(has_balance(&r));
    r.balance = Some(1000.0);
    assert!(has_balance(&r));
}

#[test]
fn note_is_active_through_its_inactive_date() {
    let mut r = record(1, 10, "a@example.com");

    r.note = note("8FDI", Some(today()));
    assert!(has_active_note(&r, "8FDI", today()));

    r.note = note("8FDI", today().pred_opt());
    assert!(!has_active_note(&r, "8FDI", today()));
}

#[test]
fn note_without_inactive_date_is_not_active() {
    let mut r = record(1, 10, "a@example.com");
    r.note = note("8FDI", None);
    assert!(!has_active_note(&r, "8FDI", today()));
}

#[test]
fn note_of_another_class_is_ignored() {
    let mut r = record(1, 10, "a@example.com");
    r.note = note("7ABC", Some(ymd(2625, 1, 1)));
    assert!(!has_active_note(&r, "8FDI", today()));

    r.note = None;
    assert!(!has_active_note(&r, "8FDI", today()));
}

#[test]
fn email_syntax_check() {
    assert!(is_valid_email("keith_tester0@gmail.com"));
    assert!(is_valid_email("first.last+tag@sub.example.org"));
    assert!(is_valid_email("  padded@example.com "));
    assert!(is_valid_email("josé@example.com"));
    assert!(is_valid_email("müller@bücher.de"));
    assert!(is_valid_email("用户@例子.广告"));

    assert!(!is_valid_email(""));
    assert!(!is_valid_email("stephon"));
    assert!(!is_valid_email("no-domain@"));
    assert!(!is_valid_email("@example.com"));
    assert!(!is_valid_email("two@@example.com"));
    assert!(!is_valid_email("dot..dot@example.com"));
    assert!(!is_valid_email("user@localhost"));
    assert!(!is_valid_email("josé@example.c0m"));
    assert!(!is_valid_email("jo sé@example.com"));
    assert!(!is_valid_email(&format!("{}@example.com", "a".repeat(65))));
}

// ─────────────────────────────────────────────────────────────────────────────
// Disposition text
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn result_text_per_variant() {
    let notice = PipelineVariant::MemberNotice;
    let cleanup = PipelineVariant::StatusCleanup;

    assert_eq!(Disposition::Sent.result_text(notice), "Email Sent");
    assert_eq!(Disposition::Updated.result_text(cleanup), "Success");
    assert_eq!(Disposition::SkippedDuplicate.result_text(notice), "Email Already Sent");
    assert_eq!(Disposition::SkippedInvalidEmail.result_text(notice), "Email Address Invalid");
    assert_eq!(Disposition::SkippedHasBalance.result_text(cleanup), "Account Has Balance");
    assert_eq!(
        Disposition::SkippedActiveNote { class_code: "8FDI".into() }.result_text(notice),
        "Existing Active 8FDI Note"
    );
    assert_eq!(
        Disposition::Failed { message: "Email Failed".into() }.result_text(notice),
        "Email Failed"
    );
}

#[test]
fn exception_partition() {
    assert!(!Disposition::Sent.is_exception());
    assert!(!Disposition::Updated.is_exception());
    assert!(!Disposition::SkippedDuplicate.is_exception());

    assert!(Disposition::SkippedInvalidEmail.is_exception());
    assert!(Disposition::SkippedHasBalance.is_exception());
    assert!(Disposition::SkippedActiveNote { class_code: "8FDI".into() }.is_exception());
    assert!(Disposition::Failed { message: "Fail".into() }.is_exception());

    assert!(!Disposition::Pending.is_terminal());
    assert!(Disposition::Sent.is_terminal());
}
