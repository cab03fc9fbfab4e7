const DEFAULT_STORE_FILE: &str = "wraith_last_run.json";

// Stored shape for the single-run snapshot file. Instants travel as RFC 3339
// strings; every field is defaulted so one odd entry does not poison the
// whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRun {
    started_at: String,
    ended_at: String,
    outcome: String,
    #[serde(default)]
    logs: Vec<StoredLogEntry>,
    #[serde(default)]
    stats: Option<CrawlStats>,
    #[serde(default)]
    records: Vec<StoredRecord>,
    requested_range: String,
    #[serde(default)]
    is_custom_query: bool,
    #[serde(default)]
    custom_target: Option<String>,
    #[serde(default)]
    custom_category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredLogEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(default)]
    id: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn entry_to_stored(entry: &LogEntry) -> StoredLogEntry {
    StoredLogEntry {
        id: entry.id.clone(),
        timestamp: entry.timestamp.to_rfc3339(),
        category: entry.category.label().to_string(),
        message: entry.message.clone(),
    }
}

fn stored_to_entry(stored: StoredLogEntry) -> Option<LogEntry> {
    if stored.id.trim().is_empty() {
        return None;
    }
    Some(LogEntry {
        timestamp: parse_instant(&stored.timestamp)?,
        category: LogCategory::from_label(&stored.category)?,
        id: stored.id,
        message: stored.message,
    })
}

fn record_to_stored(record: &CrawlRecord) -> StoredRecord {
    StoredRecord {
        id: record.id.clone(),
        source: record.source.clone(),
        title: record.title.clone(),
        url: record.url.clone(),
        summary: record.summary.clone(),
        published: record.published.map(|dt| dt.to_rfc3339()),
        severity: record.severity.clone(),
        status: record.status.clone(),
        metadata: record.metadata.clone(),
    }
}

fn stored_to_record(stored: StoredRecord) -> Option<CrawlRecord> {
    if stored.id.trim().is_empty() || stored.source.trim().is_empty() {
        return None;
    }
    Some(CrawlRecord {
        published: stored.published.as_deref().and_then(parse_instant),
        id: stored.id,
        source: stored.source,
        title: stored.title,
        url: stored.url,
        summary: stored.summary,
        severity: stored.severity,
        status: stored.status,
        metadata: stored.metadata,
    })
}

fn run_to_stored(run: &CrawlRun) -> StoredRun {
    StoredRun {
        started_at: run.started_at.to_rfc3339(),
        ended_at: run.ended_at.to_rfc3339(),
        outcome: run.outcome.label().to_string(),
        logs: run.logs.iter().map(entry_to_stored).collect(),
        stats: run.stats,
        records: run.records.iter().map(record_to_stored).collect(),
        requested_range: run.requested_range.store_label().to_string(),
        is_custom_query: run.is_custom_query,
        custom_target: run.custom_target.clone(),
        custom_category: run.custom_category.clone(),
    }
}

fn stored_to_run(stored: StoredRun) -> Option<CrawlRun> {
    let started_at = parse_instant(&stored.started_at)?;
    let ended_at = parse_instant(&stored.ended_at)?;
    let outcome = RunOutcome::from_label(&stored.outcome)?;
    let requested_range = RunRange::from_store_label(&stored.requested_range)?;
    let stats = stored.stats.map(|stats| CrawlStats {
        items_unique: stats.items_unique.min(stats.items_total),
        ..stats
    });

    Some(CrawlRun {
        started_at,
        ended_at,
        outcome,
        // Entries that no longer reconstruct are dropped, never fatal.
        logs: stored.logs.into_iter().filter_map(stored_to_entry).collect(),
        stats,
        records: stored
            .records
            .into_iter()
            .filter_map(stored_to_record)
            .collect(),
        requested_range,
        is_custom_query: stored.is_custom_query,
        custom_target: stored.custom_target,
        custom_category: stored.custom_category,
    })
}

// Single-writer snapshot store: `save` overwrites the one slot on finalize,
// `load` happens once when the session is constructed.
struct RunStore {
    path: PathBuf,
}

impl RunStore {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_STORE_FILE)
    }

    fn load(&self) -> Option<CrawlRun> {
        let content = fs::read_to_string(&self.path).ok()?;
        let stored = serde_json::from_str::<StoredRun>(&content).ok()?;
        stored_to_run(stored)
    }

    fn save(&self, run: &CrawlRun) -> io::Result<()> {
        let body = serde_json::to_string_pretty(&run_to_stored(run)).map_err(io::Error::other)?;
        fs::write(&self.path, body)
    }
}
