#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reportd_core::{
    Recipients, Recurrence, RendererSettings, ReportFormat, Run, Schedule, ScheduleDraft, Settings,
    SmtpSettings, TimeRange,
};
use reportd_ledger::Ledger;
use reportd_mail::{Ack, DeliveryError, Mailer, ReportEmail};
use reportd_render::{RenderError, RenderOutput, RenderRequest, Renderer};
use reportd_scheduler::{
    ArtifactStore, ConcurrencyGate, Dispatcher, RunExecutor, RunTicket, ScheduleService,
    SettingsCache,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Scriptable renderer. Unscripted calls succeed with `size` bytes.
pub struct FakeRenderer {
    script: Mutex<VecDeque<Result<RenderOutput, RenderError>>>,
    delay: Duration,
    size: usize,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            size: 1024,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn script(self, responses: Vec<Result<RenderOutput, RenderError>>) -> Self {
        *self.script.lock().unwrap() = responses.into();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of renders observed at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn render(
        &self,
        _req: &RenderRequest,
        _settings: &RendererSettings,
    ) -> Result<RenderOutput, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(RenderOutput {
                bytes: vec![b'x'; self.size],
                page_count: 3,
            })
        })
    }
}

/// Records every email; optionally fails every send.
pub struct FakeMailer {
    failure: Option<DeliveryError>,
    sent: Mutex<Vec<(SmtpSettings, ReportEmail)>>,
}

impl FakeMailer {
    pub fn new() -> Self {
        Self {
            failure: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(failure: DeliveryError) -> Self {
        Self {
            failure: Some(failure),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(SmtpSettings, ReportEmail)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(&self, smtp: &SmtpSettings, email: &ReportEmail) -> Result<Ack, DeliveryError> {
        self.sent.lock().unwrap().push((smtp.clone(), email.clone()));
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(Ack {
                recipients: email.recipient_count(),
                code: "250".to_string(),
            }),
        }
    }
}

pub fn smtp() -> SmtpSettings {
    SmtpSettings {
        host: "mail.example.com".into(),
        port: 587,
        username: String::new(),
        password: String::new(),
        from: "reports@example.com".into(),
        use_tls: true,
    }
}

pub fn draft(name: &str, recipients: usize) -> ScheduleDraft {
    ScheduleDraft {
        name: name.to_string(),
        dashboard_uid: "ops-overview".into(),
        dashboard_title: Some("Ops overview".into()),
        time_range: TimeRange::default(),
        recurrence: Recurrence::Daily,
        timezone: "America/New_York".into(),
        format: ReportFormat::Pdf,
        variables: BTreeMap::new(),
        recipients: Recipients {
            to: (0..recipients).map(|i| format!("user{i}@example.com")).collect(),
            cc: vec![],
            bcc: vec![],
        },
        email_subject: "{{schedule.name}} for {{timerange}}".into(),
        email_body: String::new(),
        enabled: true,
    }
}

/// Everything a run needs, wired around fakes and a temp artifact dir.
pub struct Harness {
    pub ledger: Arc<Ledger>,
    pub store: Arc<ArtifactStore>,
    pub settings: Arc<SettingsCache>,
    pub gate: Arc<ConcurrencyGate>,
    pub renderer: Arc<FakeRenderer>,
    pub mailer: Arc<FakeMailer>,
    pub executor: Arc<RunExecutor>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(renderer: FakeRenderer, mailer: FakeMailer) -> Self {
        Self::with_gate_timeout(renderer, mailer, Duration::from_secs(5))
    }

    pub fn with_gate_timeout(renderer: FakeRenderer, mailer: FakeMailer, gate_timeout: Duration) -> Self {
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        Self::build(ledger, renderer, mailer, gate_timeout, tempfile::tempdir().unwrap())
    }

    /// Wire the fakes around an existing ledger; `dir` stays alive with the harness.
    pub fn on_ledger(ledger: Arc<Ledger>, dir: TempDir, renderer: FakeRenderer, mailer: FakeMailer) -> Self {
        Self::build(ledger, renderer, mailer, Duration::from_secs(5), dir)
    }

    fn build(
        ledger: Arc<Ledger>,
        renderer: FakeRenderer,
        mailer: FakeMailer,
        gate_timeout: Duration,
        dir: TempDir,
    ) -> Self {
        let store = Arc::new(ArtifactStore::new(dir.path().join("artifacts")));
        let settings = Arc::new(SettingsCache::new(ledger.clone()));
        let gate = Arc::new(ConcurrencyGate::new(gate_timeout));
        let renderer = Arc::new(renderer);
        let mailer = Arc::new(mailer);
        let executor = Arc::new(RunExecutor::new(
            ledger.clone(),
            store.clone(),
            renderer.clone(),
            mailer.clone(),
            settings.clone(),
            gate.clone(),
            Some(smtp()),
        ));
        Self {
            ledger,
            store,
            settings,
            gate,
            renderer,
            mailer,
            executor,
            dir,
        }
    }

    /// Store a schedule directly, bypassing service validation.
    pub fn schedule(&self, org_id: i64, recipients: usize) -> Schedule {
        self.ledger
            .create_schedule(org_id, 1, &draft("Daily ops", recipients), None, Utc::now())
            .unwrap()
    }

    pub fn update_settings(&self, org_id: i64, edit: impl FnOnce(&mut Settings)) {
        let mut settings = (*self.settings.get(org_id).unwrap()).clone();
        edit(&mut settings);
        self.settings.save(org_id, settings).unwrap();
    }

    pub fn manual_run(&self, schedule: &Schedule) -> Run {
        self.ledger
            .claim_manual(schedule.org_id, schedule.id, Utc::now())
            .unwrap()
    }

    /// A service over the same ledger and store. Queued runs land in the
    /// returned receiver instead of a worker.
    pub fn service(&self) -> (ScheduleService, mpsc::Receiver<RunTicket>) {
        let (dispatcher, rx) = Dispatcher::channel(16);
        let service = ScheduleService::new(
            self.ledger.clone(),
            self.store.clone(),
            self.settings.clone(),
            dispatcher,
        );
        (service, rx)
    }
}
