const TUI_TICK_MS: u64 = 120;
const MAX_TABLE_ROWS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    None,
    CustomDates,
    CustomQuery,
}

fn parse_dates_input(buffer: &str) -> RunRequest {
    let mut parts = buffer.split_whitespace();
    RunRequest::CustomDates {
        start: parts.next().unwrap_or_default().to_string(),
        end: parts.next().unwrap_or_default().to_string(),
    }
}

fn parse_query_input(buffer: &str) -> RunRequest {
    let trimmed = buffer.trim();
    let (target, category) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
    RunRequest::CustomQuery {
        target: target.to_string(),
        category: category.trim().to_string(),
    }
}

fn draw_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    cli: &Cli,
    session: &mut CrawlSession,
    initial_request: RunRequest,
    rx: &mut UnboundedReceiver<SessionEvent>,
) -> io::Result<()> {
    let mut selected_range = match RunRange::from(cli.range) {
        RunRange::Custom => RunRange::OneMonth,
        range => range,
    };
    let mut input_mode = InputMode::None;
    let mut input_buffer = String::new();
    let mut ran_once = false;
    let mut last_tick = Instant::now();
    let tick_rate = Duration::from_millis(TUI_TICK_MS);

    if cli.auto_start {
        session.start(initial_request);
    }

    loop {
        while let Ok(event) = rx.try_recv() {
            session.handle_event(event);
        }
        if session.is_active() {
            ran_once = true;
        }

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(5),
                    Constraint::Min(10),
                    Constraint::Length(4),
                ])
                .split(f.area());

            let phase = session.phase;
            let title = match phase {
                SessionPhase::Idle => "wraith - Idle (press s to start)",
                SessionPhase::Requesting => "wraith - Requesting (press x to cancel)",
                SessionPhase::Cancelling => "wraith - Cancelling",
                SessionPhase::Playback => "wraith - Streaming results (press x to stop)",
            };

            let label_style = Style::default().fg(Color::Gray);
            let sep_style = Style::default().fg(Color::DarkGray);
            let stats = session.stats;
            let error_count = error_entries(&session.logs).len();
            let header_lines = vec![
                Line::from(vec![
                    Span::styled("Phase ", label_style),
                    Span::styled(phase.label(), phase_style(phase)),
                    Span::styled("  |  ", sep_style),
                    Span::styled("Range ", label_style),
                    Span::styled(
                        selected_range.title(),
                        Style::default().fg(Color::LightCyan),
                    ),
                    Span::styled("  |  ", sep_style),
                    Span::styled("Started ", label_style),
                    Span::styled(
                        session
                            .started_at
                            .map(|at| at.format("%H:%M:%S").to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        Style::default().fg(Color::White),
                    ),
                ]),
                Line::from(vec![
                    Span::styled("Sources ", label_style),
                    Span::styled(
                        stats.map(|s| s.sources_count.to_string()).unwrap_or_else(|| "-".to_string()),
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled("  |  ", sep_style),
                    Span::styled("Items ", label_style),
                    Span::styled(
                        stats.map(|s| s.items_total.to_string()).unwrap_or_else(|| "-".to_string()),
                        Style::default().fg(Color::Cyan),
                    ),
                    Span::styled("  |  ", sep_style),
                    Span::styled("Unique ", label_style),
                    Span::styled(
                        stats.map(|s| s.items_unique.to_string()).unwrap_or_else(|| "-".to_string()),
                        Style::default().fg(Color::Cyan),
                    ),
                    Span::styled("  |  ", sep_style),
                    Span::styled("Records ", label_style),
                    Span::styled(
                        session.records.len().to_string(),
                        Style::default().fg(Color::LightCyan),
                    ),
                    Span::styled("  |  ", sep_style),
                    Span::styled("Log errors ", label_style),
                    Span::styled(
                        error_count.to_string(),
                        Style::default().fg(if error_count > 0 {
                            Color::Red
                        } else {
                            Color::Green
                        }),
                    ),
                ]),
                Line::from(match &session.last_run {
                    Some(run) => vec![
                        Span::styled("Last run ", label_style),
                        Span::styled(run.outcome.label(), outcome_style(run.outcome)),
                        Span::styled(
                            format!(
                                " at {} ({} logs, {} records, {})",
                                run.ended_at.format("%Y-%m-%d %H:%M:%S"),
                                run.logs.len(),
                                run.records.len(),
                                run.requested_range.title()
                            ),
                            Style::default().fg(Color::White),
                        ),
                    ],
                    None => vec![
                        Span::styled("Last run ", label_style),
                        Span::styled("none", Style::default().fg(Color::DarkGray)),
                    ],
                }),
            ];
            let header = Paragraph::new(header_lines)
                .block(
                    Block::default()
                        .title(title)
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(if session.is_active() {
                            Color::Cyan
                        } else {
                            Color::Green
                        })),
                )
                .wrap(Wrap { trim: true });
            f.render_widget(header, chunks[0]);

            let panes = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
                .split(chunks[1]);

            let log_height = panes[0].height.saturating_sub(2) as usize;
            let skip = session.logs.len().saturating_sub(log_height.max(1));
            let log_lines = session
                .logs
                .iter()
                .skip(skip)
                .map(|entry| {
                    Line::from(vec![
                        Span::styled(
                            format!("{} ", entry.timestamp.format("%H:%M:%S")),
                            Style::default().fg(Color::DarkGray),
                        ),
                        Span::styled(
                            format!("[{}] ", entry.category.label()),
                            category_style(entry.category),
                        ),
                        Span::raw(truncate_for_log(&entry.message, 160)),
                    ])
                })
                .collect::<Vec<_>>();
            let log_pane = Paragraph::new(log_lines).block(
                Block::default()
                    .title(format!("Crawl Log ({})", session.logs.len()))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(
                        if phase == SessionPhase::Playback {
                            Color::Cyan
                        } else {
                            Color::DarkGray
                        },
                    )),
            );
            f.render_widget(log_pane, panes[0]);

            let right = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(6), Constraint::Length(8)])
                .split(panes[1]);

            let record_rows = session.records.iter().take(MAX_TABLE_ROWS).map(|record| {
                Row::new(vec![
                    Cell::from(record.source.clone())
                        .style(Style::default().fg(Color::LightCyan)),
                    Cell::from(record.severity.clone().unwrap_or_else(|| "-".to_string()))
                        .style(severity_style(record.severity.as_deref())),
                    Cell::from(truncate_for_log(&record.title, 60)),
                ])
            });
            let records_table = Table::new(
                record_rows,
                [
                    Constraint::Length(14),
                    Constraint::Length(9),
                    Constraint::Min(20),
                ],
            )
            .header(
                Row::new(vec!["Source", "Severity", "Title"])
                    .style(Style::default().add_modifier(Modifier::BOLD)),
            )
            .block(
                Block::default()
                    .title(format!("Records ({})", session.records.len()))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .column_spacing(1);
            f.render_widget(records_table, right[0]);

            let rollup = source_rollup(&session.records);
            let rollup_rows = rollup.iter().map(|summary| {
                Row::new(vec![
                    Cell::from(summary.source.clone()),
                    Cell::from(summary.count.to_string()),
                    Cell::from(
                        summary
                            .most_recent_published
                            .map(|at| at.format("%Y-%m-%d").to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                ])
            });
            let rollup_table = Table::new(
                rollup_rows,
                [
                    Constraint::Min(14),
                    Constraint::Length(7),
                    Constraint::Length(12),
                ],
            )
            .header(
                Row::new(vec!["Source", "Items", "Latest"])
                    .style(Style::default().add_modifier(Modifier::BOLD)),
            )
            .block(
                Block::default()
                    .title("Per-Source Rollup")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .column_spacing(1);
            f.render_widget(rollup_table, right[1]);

            let (status_label, status_text, status_style) =
                if let Some(message) = &session.input_error {
                    (
                        "INPUT ERROR",
                        truncate_for_log(message, 170),
                        Style::default().fg(Color::LightRed),
                    )
                } else if let Some(notice) = session.notices.front() {
                    (
                        "LAST STATUS",
                        truncate_for_log(notice, 170),
                        Style::default().fg(Color::Cyan),
                    )
                } else {
                    (
                        "LAST STATUS",
                        "none".to_string(),
                        Style::default().fg(Color::DarkGray),
                    )
                };
            let hotkey = Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD);
            let help = Style::default().fg(Color::Gray);
            let footer_lines = vec![
                Line::from(vec![
                    Span::styled(format!("{status_label} "), Style::default().fg(Color::DarkGray)),
                    Span::styled(status_text, status_style),
                ]),
                Line::from(vec![
                    Span::styled("s", hotkey),
                    Span::styled(" start  ", help),
                    Span::styled("x", hotkey),
                    Span::styled(" stop  ", help),
                    Span::styled("r", hotkey),
                    Span::styled(" cycle range  ", help),
                    Span::styled("d", hotkey),
                    Span::styled(" custom dates  ", help),
                    Span::styled("c", hotkey),
                    Span::styled(" custom crawl  ", help),
                    Span::styled("q", hotkey),
                    Span::styled(" quit", help),
                ]),
            ];
            let footer = Paragraph::new(footer_lines)
                .block(
                    Block::default()
                        .title("Status")
                        .borders(Borders::ALL)
                        .border_style(if session.input_error.is_some() {
                            Style::default().fg(Color::Red)
                        } else {
                            Style::default().fg(Color::DarkGray)
                        }),
                )
                .wrap(Wrap { trim: true });
            f.render_widget(footer, chunks[2]);

            if input_mode != InputMode::None {
                let area = centered_rect(62, 28, f.area());
                let (title, hint) = match input_mode {
                    InputMode::CustomDates => (
                        "Custom Date Range",
                        "Enter start and end dates: YYYY-MM-DD YYYY-MM-DD",
                    ),
                    _ => ("Custom Crawl", "Enter target and category: <target> <category>"),
                };
                f.render_widget(Clear, area);
                f.render_widget(
                    Block::default()
                        .title(title)
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Yellow)),
                    area,
                );
                let prompt_chunks = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Length(3), Constraint::Min(3)])
                    .split(area);
                f.render_widget(
                    Paragraph::new(format!(
                        "> {}",
                        if input_buffer.is_empty() {
                            "<empty>"
                        } else {
                            input_buffer.as_str()
                        }
                    ))
                    .block(Block::default().borders(Borders::ALL).title("Input"))
                    .wrap(Wrap { trim: true }),
                    prompt_chunks[0],
                );
                f.render_widget(
                    Paragraph::new(format!("{hint}\nEnter to start, Esc to cancel."))
                        .block(Block::default().borders(Borders::ALL))
                        .wrap(Wrap { trim: true }),
                    prompt_chunks[1],
                );
            }
        })?;

        if cli.auto_close && ran_once && !session.is_active() {
            break;
        }

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if input_mode != InputMode::None {
                    match key.code {
                        KeyCode::Esc => {
                            input_mode = InputMode::None;
                            input_buffer.clear();
                        }
                        KeyCode::Enter => {
                            let request = match input_mode {
                                InputMode::CustomDates => parse_dates_input(&input_buffer),
                                _ => parse_query_input(&input_buffer),
                            };
                            session.start(request);
                            input_mode = InputMode::None;
                            input_buffer.clear();
                        }
                        KeyCode::Backspace => {
                            input_buffer.pop();
                        }
                        KeyCode::Char(ch) => input_buffer.push(ch),
                        _ => {}
                    }
                } else {
                    match key.code {
                        KeyCode::Char('q') => break,
                        KeyCode::Char('s') => session.start(RunRequest::Preset(selected_range)),
                        KeyCode::Char('x') => session.stop(),
                        KeyCode::Char('r') => selected_range = selected_range.cycle(),
                        KeyCode::Char('d') => {
                            input_mode = InputMode::CustomDates;
                            input_buffer.clear();
                        }
                        KeyCode::Char('c') => {
                            input_mode = InputMode::CustomQuery;
                            input_buffer.clear();
                        }
                        _ => {}
                    }
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }

    Ok(())
}
