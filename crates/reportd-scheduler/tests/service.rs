mod common;

use chrono::Utc;
use common::{draft, FakeMailer, FakeRenderer, Harness};
use reportd_core::{Recurrence, RunStatus, RunTrigger, TimeRange};

fn harness() -> Harness {
    Harness::new(FakeRenderer::new(), FakeMailer::new())
}

#[test]
fn create_rejects_invalid_drafts() {
    let h = harness();
    let (service, _rx) = h.service();

    let mut unnamed = draft(" ", 1);
    unnamed.name = "  ".into();
    let mut no_dashboard = draft("a", 1);
    no_dashboard.dashboard_uid = String::new();
    let no_recipients = draft("a", 0);
    let mut bad_cron = draft("a", 1);
    bad_cron.recurrence = Recurrence::Cron {
        cron_expr: "61 * * * *".into(),
    };
    let mut never = draft("a", 1);
    never.recurrence = Recurrence::Cron {
        cron_expr: "0 0 30 2 *".into(),
    };
    let mut bad_tz = draft("a", 1);
    bad_tz.timezone = "Atlantis/Capital".into();
    let mut bad_range = draft("a", 1);
    bad_range.time_range = TimeRange {
        from: "yesterday-ish".into(),
        to: "now".into(),
    };
    let mut overflowing_range = draft("a", 1);
    overflowing_range.time_range = TimeRange {
        from: "now-9999999999h".into(),
        to: "now".into(),
    };
    let mut blank_cc = draft("a", 1);
    blank_cc.recipients.cc.push(" ".into());

    for (label, d) in [
        ("unnamed", unnamed),
        ("no dashboard", no_dashboard),
        ("no recipients", no_recipients),
        ("bad cron", bad_cron),
        ("never fires", never),
        ("bad timezone", bad_tz),
        ("bad range", bad_range),
        ("overflowing range", overflowing_range),
        ("blank cc", blank_cc),
    ] {
        let err = service.create(1, 1, d).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR", "{label}: {err}");
    }
    assert!(service.list(1).unwrap().is_empty());
}

#[test]
fn recipient_limit_is_checked_at_create() {
    let h = harness();
    let (service, _rx) = h.service();

    let err = service.create(1, 1, draft("big", 51)).unwrap_err();
    assert_eq!(err.code(), "LIMIT_EXCEEDED");
    assert!(service.create(1, 1, draft("ok", 50)).is_ok());

    h.update_settings(1, |s| s.limits.max_recipients = 100);
    assert!(service.create(1, 1, draft("bigger limit", 60)).is_ok());
}

#[test]
fn create_computes_first_run_only_when_enabled() {
    let h = harness();
    let (service, _rx) = h.service();
    let before = Utc::now();

    let enabled = service.create(1, 7, draft("enabled", 1)).unwrap();
    assert!(enabled.next_run_at.unwrap() > before);
    assert_eq!(enabled.owner_user_id, 7);

    let mut d = draft("disabled", 1);
    d.enabled = false;
    let disabled = service.create(1, 7, d).unwrap();
    assert!(disabled.next_run_at.is_none());
}

#[test]
fn update_recomputes_next_run_only_when_timing_changes() {
    let h = harness();
    let (service, _rx) = h.service();
    let created = service.create(1, 1, draft("weekly", 1)).unwrap();

    let mut renamed = draft("weekly, renamed", 1);
    renamed.email_subject = "New subject".into();
    let updated = service.update(1, created.id, renamed).unwrap();
    assert_eq!(updated.name, "weekly, renamed");
    assert_eq!(updated.next_run_at, created.next_run_at);

    let mut cron = draft("weekly, renamed", 1);
    cron.recurrence = Recurrence::Cron {
        cron_expr: "0 8 * * 1".into(),
    };
    let rescheduled = service.update(1, created.id, cron).unwrap();
    assert_eq!(rescheduled.recurrence.cron_expr(), Some("0 8 * * 1"));
    assert!(rescheduled.next_run_at.unwrap() > Utc::now());

    let mut off = draft("weekly, renamed", 1);
    off.enabled = false;
    assert!(service.update(1, created.id, off).unwrap().next_run_at.is_none());

    let err = service.update(2, created.id, draft("other org", 1)).unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn schedules_are_scoped_to_their_org() {
    let h = harness();
    let (service, _rx) = h.service();
    let first = service.create(1, 1, draft("first", 1)).unwrap();
    let second = service.create(1, 1, draft("second", 1)).unwrap();
    service.create(2, 1, draft("elsewhere", 1)).unwrap();

    let listed: Vec<_> = service.list(1).unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(listed, vec![second.id, first.id]);
    assert_eq!(service.get(2, first.id).unwrap_err().code(), "NOT_FOUND");
}

#[tokio::test]
async fn trigger_queues_a_manual_run_and_rejects_a_second() {
    let h = harness();
    let (service, mut rx) = h.service();
    let schedule = service.create(1, 1, draft("manual", 1)).unwrap();

    let run = service.trigger(1, schedule.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    assert_eq!(run.trigger, RunTrigger::Manual);
    let ticket = rx.try_recv().unwrap();
    assert_eq!(ticket.run_id, run.id);

    let err = service.trigger(1, schedule.id).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    assert!(rx.try_recv().is_err());

    assert_eq!(
        service.trigger(2, schedule.id).await.unwrap_err().code(),
        "NOT_FOUND"
    );

    // Manual runs leave the schedule's own timing alone.
    let after = service.get(1, schedule.id).unwrap();
    assert_eq!(after.next_run_at, schedule.next_run_at);
}

#[tokio::test]
async fn trigger_rejects_schedules_over_the_recipient_limit() {
    let h = harness();
    let (service, mut rx) = h.service();
    let schedule = h.schedule(1, 60);

    let err = service.trigger(1, schedule.id).await.unwrap_err();
    assert_eq!(err.code(), "LIMIT_EXCEEDED");
    assert!(rx.try_recv().is_err());
    assert!(service.runs(1, schedule.id, None).unwrap().is_empty());
}

#[tokio::test]
async fn run_history_is_newest_first_and_limited() {
    let h = harness();
    let (service, _rx) = h.service();
    let schedule = service.create(1, 1, draft("history", 1)).unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let run = service.trigger(1, schedule.id).await.unwrap();
        h.executor.execute(run.id).await.unwrap();
        ids.push(run.id);
    }

    let runs = service.runs(1, schedule.id, None).unwrap();
    let listed: Vec<_> = runs.iter().map(|r| r.id).collect();
    ids.reverse();
    assert_eq!(listed, ids);
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));

    assert_eq!(service.runs(1, schedule.id, Some(2)).unwrap().len(), 2);
    assert_eq!(service.runs(1, schedule.id, Some(0)).unwrap().len(), 1);
    assert_eq!(service.runs(2, schedule.id, None).unwrap_err().code(), "NOT_FOUND");

    let run = service.get_run(1, ids[0]).unwrap();
    assert_eq!(run.schedule_id, schedule.id);
    assert_eq!(service.get_run(2, ids[0]).unwrap_err().code(), "NOT_FOUND");
}

#[tokio::test]
async fn delete_removes_history_and_artifacts() {
    let h = harness();
    let (service, _rx) = h.service();
    let schedule = service.create(1, 1, draft("doomed", 1)).unwrap();

    let run = service.trigger(1, schedule.id).await.unwrap();
    // Pending run: deletion must wait.
    assert_eq!(
        service.delete(1, schedule.id).await.unwrap_err().code(),
        "CONFLICT"
    );

    let done = h.executor.execute(run.id).await.unwrap();
    let path = done.artifact_path.unwrap();
    assert!(std::path::Path::new(&path).exists());

    service.delete(1, schedule.id).await.unwrap();
    assert!(!std::path::Path::new(&path).exists());
    assert_eq!(service.get(1, schedule.id).unwrap_err().code(), "NOT_FOUND");
    assert_eq!(service.get_run(1, run.id).unwrap_err().code(), "NOT_FOUND");
    assert_eq!(
        service.delete(1, schedule.id).await.unwrap_err().code(),
        "NOT_FOUND"
    );
}
