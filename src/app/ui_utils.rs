fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "..."
}

fn category_style(category: LogCategory) -> Style {
    match category {
        LogCategory::Info => Style::default().fg(Color::Gray),
        LogCategory::Success => Style::default().fg(Color::Green),
        LogCategory::Warning => Style::default().fg(Color::Yellow),
        LogCategory::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

fn phase_style(phase: SessionPhase) -> Style {
    match phase {
        SessionPhase::Idle => Style::default().fg(Color::Green),
        SessionPhase::Requesting => Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
        SessionPhase::Cancelling => Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
        SessionPhase::Playback => Style::default()
            .fg(Color::LightCyan)
            .add_modifier(Modifier::BOLD),
    }
}

fn outcome_style(outcome: RunOutcome) -> Style {
    match outcome {
        RunOutcome::Completed => Style::default().fg(Color::Green),
        RunOutcome::Cancelled => Style::default().fg(Color::Yellow),
        RunOutcome::Failed => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

fn severity_style(severity: Option<&str>) -> Style {
    match severity.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("critical") => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        Some("high") => Style::default().fg(Color::LightRed),
        Some("medium") => Style::default().fg(Color::Yellow),
        Some("low") => Style::default().fg(Color::Green),
        _ => Style::default().fg(Color::Gray),
    }
}
