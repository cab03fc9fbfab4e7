#[derive(Debug, Clone, PartialEq)]
struct SourceSummary {
    source: String,
    count: usize,
    most_recent_published: Option<DateTime<Utc>>,
}

// Pure rollup over whatever records are currently visible. Output is sorted
// by source name so the result does not depend on input order.
fn source_rollup(records: &[CrawlRecord]) -> Vec<SourceSummary> {
    let mut by_source = HashMap::<&str, (usize, Option<DateTime<Utc>>)>::new();
    for record in records {
        let slot = by_source.entry(record.source.as_str()).or_insert((0, None));
        slot.0 += 1;
        if let Some(published) = record.published {
            slot.1 = Some(match slot.1 {
                Some(latest) => latest.max(published),
                None => published,
            });
        }
    }

    let mut rollup = by_source
        .into_iter()
        .map(|(source, (count, most_recent_published))| SourceSummary {
            source: source.to_string(),
            count,
            most_recent_published,
        })
        .collect::<Vec<_>>();
    rollup.sort_by(|a, b| a.source.cmp(&b.source));
    rollup
}

fn error_entries(logs: &[LogEntry]) -> Vec<&LogEntry> {
    logs.iter()
        .filter(|entry| entry.category == LogCategory::Error)
        .collect()
}

#[cfg(test)]
mod summary_tests {
    use super::*;

    fn record(source: &str, id: &str, published: Option<DateTime<Utc>>) -> CrawlRecord {
        CrawlRecord {
            id: id.to_string(),
            source: source.to_string(),
            title: String::new(),
            url: String::new(),
            summary: String::new(),
            published,
            severity: None,
            status: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn rollup_counts_and_tracks_latest_published() {
        let older = Utc::now() - chrono::Duration::days(9);
        let newer = Utc::now() - chrono::Duration::days(1);
        let records = vec![
            record("nvd", "a", Some(older)),
            record("nvd", "b", Some(newer)),
            record("cisa_kev", "c", None),
        ];

        let rollup = source_rollup(&records);
        assert_eq!(rollup.len(), 2);
        assert_eq!(rollup[0].source, "cisa_kev");
        assert_eq!(rollup[0].count, 1);
        assert_eq!(rollup[0].most_recent_published, None);
        assert_eq!(rollup[1].source, "nvd");
        assert_eq!(rollup[1].count, 2);
        assert_eq!(rollup[1].most_recent_published, Some(newer));
    }

    #[test]
    fn rollup_is_order_independent() {
        let published = Utc::now();
        let mut records = vec![
            record("nvd", "a", Some(published)),
            record("reddit_netsec", "b", None),
            record("nvd", "c", None),
        ];
        let forward = source_rollup(&records);
        records.reverse();
        assert_eq!(source_rollup(&records), forward);
    }

    #[test]
    fn error_entries_extracts_only_error_category() {
        let now = Utc::now();
        let logs = vec![
            LogEntry {
                id: "log-0000".to_string(),
                timestamp: now,
                category: LogCategory::Info,
                message: "fetching".to_string(),
            },
            LogEntry {
                id: "log-0001".to_string(),
                timestamp: now,
                category: LogCategory::Error,
                message: "HTTP error while fetching NVD".to_string(),
            },
            LogEntry {
                id: "log-0002".to_string(),
                timestamp: now,
                category: LogCategory::Warning,
                message: "slow source".to_string(),
            },
        ];

        let errors = error_entries(&logs);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, "log-0001");
    }
}
