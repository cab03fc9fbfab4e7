fn initial_request(cli: &Cli) -> RunRequest {
    if cli.target.is_some() || cli.category.is_some() {
        RunRequest::CustomQuery {
            target: cli.target.clone().unwrap_or_default(),
            category: cli.category.clone().unwrap_or_default(),
        }
    } else if cli.range == RangeArg::Custom {
        RunRequest::CustomDates {
            start: cli.start_date.clone().unwrap_or_default(),
            end: cli.end_date.clone().unwrap_or_default(),
        }
    } else {
        RunRequest::Preset(cli.range.into())
    }
}

pub async fn run() -> io::Result<()> {
    let cli = Cli::parse();
    let store_path = cli
        .state_file
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(RunStore::default_path);
    let backend = HttpBackend::new(&cli.backend, Duration::from_secs(cli.timeout_secs.max(1)))?;
    let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
    let mut session = CrawlSession::new(
        Arc::new(backend),
        RunStore::new(store_path),
        tx,
        cli.tick_ms,
    );
    let request = initial_request(&cli);

    if cli.no_tui {
        return run_headless(&mut session, request, &mut rx).await;
    }
    run_tui(&cli, &mut session, request, &mut rx)
}

// One-shot mode: start immediately, stream revealed entries to stderr, exit
// once the run is finalized.
async fn run_headless(
    session: &mut CrawlSession,
    request: RunRequest,
    rx: &mut UnboundedReceiver<SessionEvent>,
) -> io::Result<()> {
    session.start(request);
    if let Some(message) = session.input_error.clone() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, message));
    }

    let mut printed = 0usize;
    while session.is_active() {
        let Some(event) = rx.recv().await else {
            break;
        };
        session.handle_event(event);
        while printed < session.logs.len() {
            let entry = &session.logs[printed];
            eprintln!(
                "{} [{}] {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.category.label(),
                entry.message
            );
            printed += 1;
        }
    }

    if let Some(run) = &session.last_run {
        let stats = run.stats.unwrap_or(CrawlStats {
            sources_count: 0,
            items_total: 0,
            items_unique: 0,
        });
        eprintln!(
            "run {}: logs={} records={} sources={} items={} unique={}",
            run.outcome.label(),
            run.logs.len(),
            run.records.len(),
            stats.sources_count,
            stats.items_total,
            stats.items_unique
        );
    }
    Ok(())
}

fn run_tui(
    cli: &Cli,
    session: &mut CrawlSession,
    request: RunRequest,
    rx: &mut UnboundedReceiver<SessionEvent>,
) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let tui_result = draw_loop(&mut terminal, cli, session, request, rx);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    tui_result
}
