// Cooperative cancellation: `trigger` signals the in-flight request task,
// which observes the signal at its select point and rejects promptly.
#[derive(Clone)]
struct CancelHandle {
    triggered: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

// Wire shapes. Nothing inbound is trusted: every field is optional or
// defaulted, then validated into the typed models.
#[derive(Debug, Default, Deserialize)]
struct RawCrawlResponse {
    #[serde(default)]
    logs: Vec<RawLogLine>,
    #[serde(default)]
    records: Vec<RawRecord>,
    #[serde(default)]
    stats: Option<RawStats>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogLine {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStats {
    #[serde(default)]
    sources: u64,
    #[serde(default)]
    items_total: u64,
    #[serde(default)]
    items_unique: u64,
}

fn decode_log_line(seq: usize, line: RawLogLine) -> Option<LogEntry> {
    let message = line.message?.trim().to_string();
    if message.is_empty() {
        return None;
    }
    let timestamp = parse_instant(line.timestamp.as_deref()?)?;
    let category = match line.kind {
        Some(kind) => LogCategory::from_label(&kind)?,
        None => LogCategory::Info,
    };
    Some(LogEntry {
        // The wire carries no ids; assign generation-ordered ones here.
        id: format!("log-{seq:04}"),
        timestamp,
        category,
        message,
    })
}

fn decode_record(raw: RawRecord) -> Option<CrawlRecord> {
    let id = raw.id?.trim().to_string();
    let source = raw.source?.trim().to_string();
    if id.is_empty() || source.is_empty() {
        return None;
    }
    Some(CrawlRecord {
        id,
        source,
        title: raw.title.unwrap_or_default(),
        url: raw.url.unwrap_or_default(),
        summary: raw.summary.unwrap_or_default(),
        published: raw.published.as_deref().and_then(parse_instant),
        severity: raw.severity,
        status: raw.status,
        metadata: raw.metadata,
    })
}

fn decode_response(raw: RawCrawlResponse) -> CrawlResponse {
    let mut logs = Vec::new();
    let mut dropped_log_lines = 0usize;
    for (seq, line) in raw.logs.into_iter().enumerate() {
        match decode_log_line(seq, line) {
            Some(entry) => logs.push(entry),
            None => dropped_log_lines += 1,
        }
    }

    let mut seen_keys = HashSet::new();
    let mut records = Vec::new();
    for record in raw.records.into_iter().filter_map(decode_record) {
        if seen_keys.insert(record.dedup_key()) {
            records.push(record);
        }
    }

    let stats = raw.stats.map(|stats| CrawlStats {
        sources_count: stats.sources,
        items_total: stats.items_total,
        items_unique: stats.items_unique.min(stats.items_total),
    });

    CrawlResponse {
        logs,
        dropped_log_lines,
        records,
        stats,
    }
}

#[derive(Debug, Serialize)]
struct CrawlRequestBody {
    range: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
}

fn request_body(request: &CrawlRequest) -> CrawlRequestBody {
    CrawlRequestBody {
        range: request.range.api_value(),
        start_date: request
            .start_date
            .map(|date| date.format("%Y-%m-%d").to_string()),
        end_date: request
            .end_date
            .map(|date| date.format("%Y-%m-%d").to_string()),
        target: request.target.clone(),
        category: request.category.clone(),
    }
}

type BackendFuture = Pin<Box<dyn Future<Output = Result<CrawlResponse, BackendError>> + Send>>;

trait CrawlBackend: Send + Sync {
    fn run_crawl(&self, request: CrawlRequest, cancel: CancelHandle) -> BackendFuture;
}

struct HttpBackend {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpBackend {
    fn new(base: &str, timeout: Duration) -> io::Result<Self> {
        let base = Url::parse(base)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
        let endpoint = base
            .join("api/crawler/run")
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(io::Error::other)?;
        Ok(Self { client, endpoint })
    }

    async fn execute(
        client: reqwest::Client,
        endpoint: Url,
        body: CrawlRequestBody,
    ) -> Result<CrawlResponse, BackendError> {
        let response = client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        let raw = response
            .json::<RawCrawlResponse>()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))?;
        Ok(decode_response(raw))
    }
}

impl CrawlBackend for HttpBackend {
    fn run_crawl(&self, request: CrawlRequest, cancel: CancelHandle) -> BackendFuture {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let body = request_body(&request);
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(BackendError::Cancelled),
                result = Self::execute(client, endpoint, body) => result,
            }
        })
    }
}
