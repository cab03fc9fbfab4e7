#[derive(Debug, Parser, Clone)]
#[command(
    name = "wraith",
    version,
    about = "Terminal control surface for threat-intel crawl runs"
)]
struct Cli {
    #[arg(value_name = "BACKEND_URL")]
    backend: String,

    #[arg(long, value_enum, default_value_t = RangeArg::OneMonth)]
    range: RangeArg,

    #[arg(long, value_name = "YYYY-MM-DD")]
    start_date: Option<String>,

    #[arg(long, value_name = "YYYY-MM-DD")]
    end_date: Option<String>,

    #[arg(long, value_name = "TARGET")]
    target: Option<String>,

    #[arg(long, value_name = "CATEGORY")]
    category: Option<String>,

    #[arg(long, value_name = "FILE")]
    state_file: Option<String>,

    #[arg(long, value_name = "MS", default_value_t = 400)]
    tick_ms: u64,

    #[arg(long, value_name = "SECS", default_value_t = 45)]
    timeout_secs: u64,

    #[arg(long, default_value_t = false)]
    auto_start: bool,

    #[arg(long, default_value_t = false)]
    auto_close: bool,

    #[arg(long, default_value_t = false)]
    no_tui: bool,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
enum RangeArg {
    OneMonth,
    ThreeMonths,
    SixMonths,
    TwelveMonths,
    Custom,
}

impl From<RangeArg> for RunRange {
    fn from(value: RangeArg) -> Self {
        match value {
            RangeArg::OneMonth => RunRange::OneMonth,
            RangeArg::ThreeMonths => RunRange::ThreeMonths,
            RangeArg::SixMonths => RunRange::SixMonths,
            RangeArg::TwelveMonths => RunRange::TwelveMonths,
            RangeArg::Custom => RunRange::Custom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunRange {
    OneMonth,
    ThreeMonths,
    SixMonths,
    TwelveMonths,
    Custom,
}

impl RunRange {
    fn title(self) -> &'static str {
        match self {
            RunRange::OneMonth => "1 month",
            RunRange::ThreeMonths => "3 months",
            RunRange::SixMonths => "6 months",
            RunRange::TwelveMonths => "12 months",
            RunRange::Custom => "custom",
        }
    }

    fn api_value(self) -> &'static str {
        match self {
            RunRange::OneMonth => "1month",
            RunRange::ThreeMonths => "3months",
            RunRange::SixMonths => "6months",
            RunRange::TwelveMonths => "12months",
            RunRange::Custom => "custom",
        }
    }

    fn store_label(self) -> &'static str {
        match self {
            RunRange::OneMonth => "1mo",
            RunRange::ThreeMonths => "3mo",
            RunRange::SixMonths => "6mo",
            RunRange::TwelveMonths => "12mo",
            RunRange::Custom => "custom",
        }
    }

    fn from_store_label(label: &str) -> Option<Self> {
        match label.trim() {
            "1mo" => Some(RunRange::OneMonth),
            "3mo" => Some(RunRange::ThreeMonths),
            "6mo" => Some(RunRange::SixMonths),
            "12mo" => Some(RunRange::TwelveMonths),
            "custom" => Some(RunRange::Custom),
            _ => None,
        }
    }

    fn cycle(self) -> Self {
        match self {
            RunRange::OneMonth => RunRange::ThreeMonths,
            RunRange::ThreeMonths => RunRange::SixMonths,
            RunRange::SixMonths => RunRange::TwelveMonths,
            RunRange::TwelveMonths => RunRange::OneMonth,
            RunRange::Custom => RunRange::OneMonth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogCategory {
    Info,
    Success,
    Warning,
    Error,
}

impl LogCategory {
    fn label(self) -> &'static str {
        match self {
            LogCategory::Info => "info",
            LogCategory::Success => "success",
            LogCategory::Warning => "warning",
            LogCategory::Error => "error",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "info" => Some(LogCategory::Info),
            "success" => Some(LogCategory::Success),
            "warning" => Some(LogCategory::Warning),
            "error" => Some(LogCategory::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LogEntry {
    id: String,
    timestamp: DateTime<Utc>,
    category: LogCategory,
    message: String,
}

#[derive(Debug, Clone, PartialEq)]
struct CrawlRecord {
    id: String,
    source: String,
    title: String,
    url: String,
    summary: String,
    published: Option<DateTime<Utc>>,
    severity: Option<String>,
    status: Option<String>,
    metadata: HashMap<String, String>,
}

impl CrawlRecord {
    // Identity is (source, id); different sources may reuse upstream ids.
    fn dedup_key(&self) -> String {
        format!("{}:{}", self.source, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct CrawlStats {
    sources_count: u64,
    items_total: u64,
    items_unique: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
}

impl RunOutcome {
    fn label(self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Failed => "failed",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "completed" => Some(RunOutcome::Completed),
            "cancelled" => Some(RunOutcome::Cancelled),
            "failed" => Some(RunOutcome::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CrawlRun {
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    outcome: RunOutcome,
    logs: Vec<LogEntry>,
    stats: Option<CrawlStats>,
    records: Vec<CrawlRecord>,
    requested_range: RunRange,
    is_custom_query: bool,
    custom_target: Option<String>,
    custom_category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Idle,
    Requesting,
    Cancelling,
    Playback,
}

impl SessionPhase {
    fn label(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Requesting => "requesting",
            SessionPhase::Cancelling => "cancelling",
            SessionPhase::Playback => "playback",
        }
    }
}

// User-facing start variants; validated into a CrawlRequest before any
// network traffic is issued.
#[derive(Debug, Clone)]
enum RunRequest {
    Preset(RunRange),
    CustomDates { start: String, end: String },
    CustomQuery { target: String, category: String },
}

// Validated request handed to the backend.
#[derive(Debug, Clone)]
struct CrawlRequest {
    range: RunRange,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    target: Option<String>,
    category: Option<String>,
}

impl CrawlRequest {
    fn is_custom_query(&self) -> bool {
        self.target.is_some()
    }
}

#[derive(Debug, Clone)]
struct CrawlResponse {
    logs: Vec<LogEntry>,
    dropped_log_lines: usize,
    records: Vec<CrawlRecord>,
    stats: Option<CrawlStats>,
}

#[derive(Debug, Clone)]
enum BackendError {
    Cancelled,
    Transport(String),
    Status(u16),
    Decode(String),
}

impl BackendError {
    fn is_cancelled(&self) -> bool {
        matches!(self, BackendError::Cancelled)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Cancelled => write!(f, "cancelled by user"),
            BackendError::Transport(err) => write!(f, "transport error: {err}"),
            BackendError::Status(code) => write!(f, "backend returned HTTP {code}"),
            BackendError::Decode(err) => write!(f, "malformed backend response: {err}"),
        }
    }
}

#[derive(Debug)]
enum SessionEvent {
    RequestFinished {
        run_seq: u64,
        result: Result<CrawlResponse, BackendError>,
    },
    PlaybackTick {
        run_seq: u64,
    },
}
