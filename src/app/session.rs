const MAX_NOTICES: usize = 20;

struct AbortTaskOnDrop(tokio::task::AbortHandle);

impl Drop for AbortTaskOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct PlaybackState {
    buffered: Vec<LogEntry>,
    cursor: usize,
    _ticker: AbortTaskOnDrop,
}

struct RunMeta {
    requested_range: RunRange,
    is_custom_query: bool,
    custom_target: Option<String>,
    custom_category: Option<String>,
}

fn validate_request(request: &RunRequest) -> Result<CrawlRequest, String> {
    match request {
        RunRequest::Preset(RunRange::Custom) => {
            Err("custom range requires explicit start and end dates".to_string())
        }
        RunRequest::Preset(range) => Ok(CrawlRequest {
            range: *range,
            start_date: None,
            end_date: None,
            target: None,
            category: None,
        }),
        RunRequest::CustomDates { start, end } => {
            let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d")
                .map_err(|_| "start date must be a valid YYYY-MM-DD date".to_string())?;
            let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d")
                .map_err(|_| "end date must be a valid YYYY-MM-DD date".to_string())?;
            if start > end {
                return Err("start date must not be after end date".to_string());
            }
            Ok(CrawlRequest {
                range: RunRange::Custom,
                start_date: Some(start),
                end_date: Some(end),
                target: None,
                category: None,
            })
        }
        RunRequest::CustomQuery { target, category } => {
            let target = target.trim();
            let category = category.trim();
            if target.is_empty() || category.is_empty() {
                return Err("custom crawl requires both a target and a category".to_string());
            }
            Ok(CrawlRequest {
                range: RunRange::OneMonth,
                start_date: None,
                end_date: None,
                target: Some(target.to_string()),
                category: Some(category.to_string()),
            })
        }
    }
}

// Single source of truth for whether a run is active. Owns the cancellation
// handle and the playback ticker; nothing else may start or stop them.
struct CrawlSession {
    phase: SessionPhase,
    run_seq: u64,
    cancel: Option<CancelHandle>,
    playback: Option<PlaybackState>,
    logs: Vec<LogEntry>,
    records: Vec<CrawlRecord>,
    stats: Option<CrawlStats>,
    started_at: Option<DateTime<Utc>>,
    run_meta: Option<RunMeta>,
    synthetic_seq: usize,
    last_run: Option<CrawlRun>,
    input_error: Option<String>,
    notices: VecDeque<String>,
    tick_ms: u64,
    backend: Arc<dyn CrawlBackend>,
    store: RunStore,
    tx: UnboundedSender<SessionEvent>,
}

impl CrawlSession {
    fn new(
        backend: Arc<dyn CrawlBackend>,
        store: RunStore,
        tx: UnboundedSender<SessionEvent>,
        tick_ms: u64,
    ) -> Self {
        // The store is read exactly once, here, to seed the display.
        let last_run = store.load();
        let (logs, records, stats) = match &last_run {
            Some(run) => (run.logs.clone(), run.records.clone(), run.stats),
            None => (Vec::new(), Vec::new(), None),
        };
        Self {
            phase: SessionPhase::Idle,
            run_seq: 0,
            cancel: None,
            playback: None,
            logs,
            records,
            stats,
            started_at: None,
            run_meta: None,
            synthetic_seq: 0,
            last_run,
            input_error: None,
            notices: VecDeque::new(),
            tick_ms,
            backend,
            store,
            tx,
        }
    }

    fn is_active(&self) -> bool {
        self.phase != SessionPhase::Idle
    }

    fn push_notice(&mut self, message: impl Into<String>) {
        self.notices.push_front(message.into());
        while self.notices.len() > MAX_NOTICES {
            self.notices.pop_back();
        }
    }

    fn synthetic_entry(&mut self, category: LogCategory, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            id: format!("event-{:02}", self.synthetic_seq),
            timestamp: Utc::now(),
            category,
            message: message.into(),
        };
        self.synthetic_seq += 1;
        entry
    }

    fn start(&mut self, request: RunRequest) {
        if self.phase != SessionPhase::Idle {
            self.push_notice("start ignored: a run is already active");
            return;
        }

        let validated = match validate_request(&request) {
            Ok(validated) => validated,
            Err(message) => {
                self.input_error = Some(message);
                return;
            }
        };

        self.input_error = None;
        self.run_seq += 1;
        self.logs.clear();
        self.records.clear();
        self.stats = None;
        self.synthetic_seq = 0;
        self.started_at = Some(Utc::now());
        self.run_meta = Some(RunMeta {
            requested_range: validated.range,
            is_custom_query: validated.is_custom_query(),
            custom_target: validated.target.clone(),
            custom_category: validated.category.clone(),
        });

        let cancel = CancelHandle::new();
        self.cancel = Some(cancel.clone());
        self.phase = SessionPhase::Requesting;
        self.push_notice(match (&validated.target, validated.range) {
            (Some(target), _) => format!("custom crawl started for {target}"),
            (None, range) => format!("crawl started ({} range)", range.title()),
        });

        let future = self.backend.run_crawl(validated, cancel);
        let tx = self.tx.clone();
        let run_seq = self.run_seq;
        tokio::spawn(async move {
            let result = future.await;
            let _ = tx.send(SessionEvent::RequestFinished { run_seq, result });
        });
    }

    fn stop(&mut self) {
        match self.phase {
            SessionPhase::Requesting => {
                if let Some(cancel) = &self.cancel {
                    cancel.trigger();
                }
                // The in-flight task observes the handle and reports back;
                // its completion event performs the real transition.
                self.phase = SessionPhase::Cancelling;
                self.push_notice("cancellation requested");
            }
            SessionPhase::Cancelling => {}
            SessionPhase::Playback => {
                self.flush_playback();
                self.finalize(RunOutcome::Cancelled);
            }
            SessionPhase::Idle => self.push_notice("no active run to stop"),
        }
    }

    // The user must end up seeing the complete log either way: a forced stop
    // reveals everything still buffered instead of truncating.
    fn flush_playback(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            let remaining = playback.buffered.split_off(playback.cursor);
            self.logs.extend(remaining);
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::RequestFinished { run_seq, result } => {
                if run_seq != self.run_seq
                    || !matches!(
                        self.phase,
                        SessionPhase::Requesting | SessionPhase::Cancelling
                    )
                {
                    return;
                }
                let stopping = self.phase == SessionPhase::Cancelling;
                match result {
                    Ok(response) => self.ingest_response(response, stopping),
                    Err(err) if err.is_cancelled() => {
                        let entry =
                            self.synthetic_entry(LogCategory::Warning, "Crawl cancelled by user");
                        self.logs.push(entry);
                        self.finalize(RunOutcome::Cancelled);
                    }
                    Err(err) => {
                        let entry =
                            self.synthetic_entry(LogCategory::Error, format!("Crawl failed: {err}"));
                        self.logs.push(entry);
                        self.finalize(RunOutcome::Failed);
                    }
                }
            }
            SessionEvent::PlaybackTick { run_seq } => {
                if run_seq != self.run_seq || self.phase != SessionPhase::Playback {
                    return;
                }
                self.reveal_next();
            }
        }
    }

    fn ingest_response(&mut self, response: CrawlResponse, stopping: bool) {
        self.records = response.records;
        self.stats = response.stats;
        if response.dropped_log_lines > 0 {
            self.push_notice(format!(
                "dropped {} malformed log lines from the response",
                response.dropped_log_lines
            ));
        }

        if stopping {
            // The response won the race against cancellation. Keep whatever
            // arrived, but honor the stop: no playback, outcome is cancelled.
            self.logs.extend(response.logs);
            let entry = self.synthetic_entry(LogCategory::Warning, "Crawl cancelled by user");
            self.logs.push(entry);
            self.finalize(RunOutcome::Cancelled);
            return;
        }

        if response.logs.is_empty() && response.dropped_log_lines == 0 {
            self.finalize(RunOutcome::Completed);
            return;
        }

        let entries = if response.logs.is_empty() {
            vec![self.synthetic_entry(
                LogCategory::Warning,
                "Backend returned no readable log entries",
            )]
        } else {
            response.logs
        };
        self.begin_playback(entries);
    }

    fn begin_playback(&mut self, entries: Vec<LogEntry>) {
        // Dropping the previous state aborts its ticker first, so two
        // playbacks can never interleave output.
        self.playback = None;

        let tx = self.tx.clone();
        let run_seq = self.run_seq;
        let cadence = Duration::from_millis(self.tick_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            // the first interval tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(SessionEvent::PlaybackTick { run_seq }).is_err() {
                    break;
                }
            }
        });

        self.playback = Some(PlaybackState {
            buffered: entries,
            cursor: 0,
            _ticker: AbortTaskOnDrop(handle.abort_handle()),
        });
        self.phase = SessionPhase::Playback;
    }

    fn reveal_next(&mut self) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        if let Some(entry) = playback.buffered.get(playback.cursor) {
            self.logs.push(entry.clone());
            playback.cursor += 1;
        }
        if playback.cursor >= playback.buffered.len() {
            self.playback = None;
            self.finalize(RunOutcome::Completed);
        }
    }

    // Freezes the run as observed right now (partial results included) and
    // persists it before the phase flips back to Idle.
    fn finalize(&mut self, outcome: RunOutcome) {
        let meta = self.run_meta.take();
        let run = CrawlRun {
            started_at: self.started_at.unwrap_or_else(Utc::now),
            ended_at: Utc::now(),
            outcome,
            logs: self.logs.clone(),
            stats: self.stats,
            records: self.records.clone(),
            requested_range: meta
                .as_ref()
                .map(|meta| meta.requested_range)
                .unwrap_or(RunRange::OneMonth),
            is_custom_query: meta.as_ref().is_some_and(|meta| meta.is_custom_query),
            custom_target: meta.as_ref().and_then(|meta| meta.custom_target.clone()),
            custom_category: meta.and_then(|meta| meta.custom_category),
        };

        if let Err(err) = self.store.save(&run) {
            self.push_notice(format!("failed to persist run: {err}"));
        }
        self.push_notice(format!(
            "run {} ({} log entries, {} records)",
            outcome.label(),
            run.logs.len(),
            run.records.len()
        ));
        self.last_run = Some(run);
        self.playback = None;
        self.cancel = None;
        self.phase = SessionPhase::Idle;
    }
}

#[cfg(test)]
mod session_tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct FixtureBackend {
        calls: AtomicUsize,
        results: Mutex<Vec<Result<CrawlResponse, BackendError>>>,
    }

    impl FixtureBackend {
        fn with(result: Result<CrawlResponse, BackendError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                results: Mutex::new(vec![result]),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CrawlBackend for FixtureBackend {
        fn run_crawl(&self, _request: CrawlRequest, _cancel: CancelHandle) -> BackendFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = self
                .results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(BackendError::Transport("fixture exhausted".to_string())));
            Box::pin(async move { result })
        }
    }

    // Resolves only when cancelled, like a backend that never answers.
    struct HangingBackend {
        calls: AtomicUsize,
    }

    impl HangingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl CrawlBackend for HangingBackend {
        fn run_crawl(&self, _request: CrawlRequest, cancel: CancelHandle) -> BackendFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                cancel.cancelled().await;
                Err(BackendError::Cancelled)
            })
        }
    }

    fn fixture_session(
        backend: Arc<dyn CrawlBackend>,
    ) -> (
        CrawlSession,
        UnboundedReceiver<SessionEvent>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let store = RunStore::new(dir.path().join("run.json"));
        (CrawlSession::new(backend, store, tx, 5), rx, dir)
    }

    fn response_with_logs(count: usize, stats: Option<CrawlStats>) -> CrawlResponse {
        let base = Utc::now();
        CrawlResponse {
            logs: (0..count)
                .map(|seq| LogEntry {
                    id: format!("log-{seq:04}"),
                    timestamp: base + chrono::Duration::seconds(seq as i64),
                    category: LogCategory::Info,
                    message: format!("step {seq}"),
                })
                .collect(),
            dropped_log_lines: 0,
            records: Vec::new(),
            stats,
        }
    }

    async fn pump(session: &mut CrawlSession, rx: &mut UnboundedReceiver<SessionEvent>) {
        let event = rx.recv().await.expect("session event");
        session.handle_event(event);
    }

    #[tokio::test]
    async fn start_is_ignored_unless_idle() {
        let backend = HangingBackend::new();
        let (mut session, _rx, _dir) = fixture_session(backend.clone());

        session.start(RunRequest::Preset(RunRange::OneMonth));
        assert_eq!(session.phase, SessionPhase::Requesting);
        session.start(RunRequest::Preset(RunRange::ThreeMonths));

        assert_eq!(session.run_seq, 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inverted_custom_dates_never_reach_the_network() {
        let backend = FixtureBackend::with(Ok(response_with_logs(1, None)));
        let (mut session, _rx, _dir) = fixture_session(backend.clone());

        session.start(RunRequest::CustomDates {
            start: "2026-03-01".to_string(),
            end: "2026-01-01".to_string(),
        });

        assert_eq!(session.phase, SessionPhase::Idle);
        assert!(session.input_error.is_some());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn custom_query_requires_target_and_category() {
        let backend = FixtureBackend::with(Ok(response_with_logs(1, None)));
        let (mut session, _rx, _dir) = fixture_session(backend.clone());

        session.start(RunRequest::CustomQuery {
            target: "acme.example".to_string(),
            category: "  ".to_string(),
        });

        assert_eq!(session.phase, SessionPhase::Idle);
        assert!(session.input_error.is_some());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn empty_log_response_finalizes_without_playback() {
        let backend = FixtureBackend::with(Ok(response_with_logs(0, None)));
        let (mut session, mut rx, _dir) = fixture_session(backend);

        session.start(RunRequest::Preset(RunRange::OneMonth));
        pump(&mut session, &mut rx).await;

        assert_eq!(session.phase, SessionPhase::Idle);
        let run = session.last_run.as_ref().unwrap();
        assert_eq!(run.outcome, RunOutcome::Completed);
        assert!(run.logs.is_empty());
    }

    #[tokio::test]
    async fn playback_reveals_in_order_and_persists_the_run() {
        let stats = CrawlStats {
            sources_count: 2,
            items_total: 5,
            items_unique: 5,
        };
        let backend = FixtureBackend::with(Ok(response_with_logs(3, Some(stats))));
        let (mut session, mut rx, _dir) = fixture_session(backend);

        session.start(RunRequest::Preset(RunRange::OneMonth));
        pump(&mut session, &mut rx).await;
        assert_eq!(session.phase, SessionPhase::Playback);
        assert!(session.logs.is_empty());

        for revealed in 1..=3usize {
            session.handle_event(SessionEvent::PlaybackTick { run_seq: 1 });
            assert_eq!(session.logs.len(), revealed);
            assert_eq!(session.logs[revealed - 1].id, format!("log-{:04}", revealed - 1));
        }

        assert_eq!(session.phase, SessionPhase::Idle);
        let persisted = session.store.load().unwrap();
        assert_eq!(persisted.outcome, RunOutcome::Completed);
        assert_eq!(persisted.logs.len(), 3);
        assert_eq!(persisted.stats.unwrap().items_unique, 5);
    }

    #[tokio::test]
    async fn cancel_during_request_records_a_cancellation_notice() {
        let backend = HangingBackend::new();
        let (mut session, mut rx, _dir) = fixture_session(backend);

        session.start(RunRequest::Preset(RunRange::OneMonth));
        session.stop();
        assert_eq!(session.phase, SessionPhase::Cancelling);
        pump(&mut session, &mut rx).await;

        assert_eq!(session.phase, SessionPhase::Idle);
        let run = session.last_run.as_ref().unwrap();
        assert_eq!(run.outcome, RunOutcome::Cancelled);
        assert!(run.stats.is_none());
        let last = run.logs.last().unwrap();
        assert_eq!(last.category, LogCategory::Warning);
        assert!(last.message.contains("cancelled"));
    }

    #[tokio::test]
    async fn response_arriving_after_stop_keeps_partial_results() {
        let backend = FixtureBackend::with(Ok(CrawlResponse {
            records: vec![CrawlRecord {
                id: "KEV-1".to_string(),
                source: "cisa_kev".to_string(),
                title: "Exploited".to_string(),
                url: String::new(),
                summary: String::new(),
                published: None,
                severity: None,
                status: None,
                metadata: HashMap::new(),
            }],
            ..response_with_logs(2, None)
        }));
        let (mut session, mut rx, _dir) = fixture_session(backend);

        session.start(RunRequest::Preset(RunRange::OneMonth));
        session.stop();
        pump(&mut session, &mut rx).await;

        assert_eq!(session.phase, SessionPhase::Idle);
        let run = session.last_run.as_ref().unwrap();
        assert_eq!(run.outcome, RunOutcome::Cancelled);
        assert_eq!(run.records.len(), 1);
        // full log list plus the cancellation notice, nothing truncated
        assert_eq!(run.logs.len(), 3);
    }

    #[tokio::test]
    async fn stop_during_playback_flushes_every_buffered_entry() {
        let backend = FixtureBackend::with(Ok(response_with_logs(4, None)));
        let (mut session, mut rx, _dir) = fixture_session(backend);

        session.start(RunRequest::Preset(RunRange::SixMonths));
        pump(&mut session, &mut rx).await;
        session.handle_event(SessionEvent::PlaybackTick { run_seq: 1 });
        assert_eq!(session.logs.len(), 1);

        session.stop();

        assert_eq!(session.phase, SessionPhase::Idle);
        assert_eq!(session.logs.len(), 4);
        for (seq, entry) in session.logs.iter().enumerate() {
            assert_eq!(entry.id, format!("log-{seq:04}"));
        }
        assert_eq!(
            session.last_run.as_ref().unwrap().outcome,
            RunOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn all_invalid_logs_substitute_one_synthetic_warning() {
        let backend = FixtureBackend::with(Ok(CrawlResponse {
            logs: Vec::new(),
            dropped_log_lines: 1,
            records: Vec::new(),
            stats: None,
        }));
        let (mut session, mut rx, _dir) = fixture_session(backend);

        session.start(RunRequest::Preset(RunRange::OneMonth));
        pump(&mut session, &mut rx).await;
        assert_eq!(session.phase, SessionPhase::Playback);

        session.handle_event(SessionEvent::PlaybackTick { run_seq: 1 });

        assert_eq!(session.phase, SessionPhase::Idle);
        let run = session.last_run.as_ref().unwrap();
        assert_eq!(run.logs.len(), 1);
        assert_eq!(run.logs[0].category, LogCategory::Warning);
    }

    #[tokio::test]
    async fn transport_error_finalizes_as_failed() {
        let backend = FixtureBackend::with(Err(BackendError::Transport(
            "connection refused".to_string(),
        )));
        let (mut session, mut rx, _dir) = fixture_session(backend);

        session.start(RunRequest::Preset(RunRange::OneMonth));
        pump(&mut session, &mut rx).await;

        assert_eq!(session.phase, SessionPhase::Idle);
        let run = session.last_run.as_ref().unwrap();
        assert_eq!(run.outcome, RunOutcome::Failed);
        assert!(run.stats.is_none());
        assert!(run.records.is_empty());
        let last = run.logs.last().unwrap();
        assert_eq!(last.category, LogCategory::Error);
        assert!(last.message.contains("failed"));
    }

    #[tokio::test]
    async fn stale_events_from_a_superseded_run_are_ignored() {
        let backend = FixtureBackend::with(Ok(response_with_logs(0, None)));
        let (mut session, mut rx, _dir) = fixture_session(backend);

        session.start(RunRequest::Preset(RunRange::OneMonth));
        pump(&mut session, &mut rx).await;
        assert_eq!(session.phase, SessionPhase::Idle);
        let snapshot = session.last_run.clone();

        session.handle_event(SessionEvent::PlaybackTick { run_seq: 1 });
        session.handle_event(SessionEvent::RequestFinished {
            run_seq: 1,
            result: Ok(response_with_logs(2, None)),
        });

        assert_eq!(session.phase, SessionPhase::Idle);
        assert_eq!(session.last_run, snapshot);
    }

    #[tokio::test]
    async fn restored_snapshot_seeds_the_display() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("run.json"));
        let backend = FixtureBackend::with(Ok(response_with_logs(2, None)));
        {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let mut session = CrawlSession::new(backend.clone(), store, tx, 5);
            session.start(RunRequest::Preset(RunRange::ThreeMonths));
            pump(&mut session, &mut rx).await;
            session.handle_event(SessionEvent::PlaybackTick { run_seq: 1 });
            session.handle_event(SessionEvent::PlaybackTick { run_seq: 1 });
            assert_eq!(session.phase, SessionPhase::Idle);
        }

        let (tx, _rx) = mpsc::unbounded_channel();
        let restored = CrawlSession::new(
            backend,
            RunStore::new(dir.path().join("run.json")),
            tx,
            5,
        );
        assert_eq!(restored.phase, SessionPhase::Idle);
        assert_eq!(restored.logs.len(), 2);
        let run = restored.last_run.as_ref().unwrap();
        assert_eq!(run.requested_range, RunRange::ThreeMonths);
        assert_eq!(run.outcome, RunOutcome::Completed);
    }
}
