//! Packet Logger (C2).
//!
//! Journals every inbound synchronization packet to an hourly-bucketed
//! on-disk log, off the socket read-loop task, with two compression
//! policies for the highest-volume packet types (§4.2).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::domain::packet::{LogRecord, SynchronizationPacket};
use crate::infrastructure::config::PacketLoggerConfig;

struct PriceRun {
    first: SynchronizationPacket,
    last: SynchronizationPacket,
    last_seq: u64,
}

enum Command {
    Log {
        account_id: String,
        packet: SynchronizationPacket,
        time: DateTime<Utc>,
    },
}

/// Handle to the packet logger's background writer task.
///
/// `log_packet` returns immediately; the actual write happens on a
/// dedicated task so a slow disk never backpressures the socket read
/// loop (§10).
#[derive(Clone)]
pub struct PacketLogger {
    tx: mpsc::Sender<Command>,
}

impl PacketLogger {
    /// Spawn the writer task for `config`. Returns `None` when
    /// `config.enabled` is false, in which case `log_packet` calls are
    /// simply dropped by the caller.
    #[must_use]
    pub fn spawn(config: PacketLoggerConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(run_writer(config, rx));
        Some(Self { tx })
    }

    /// Journal one packet for `account_id`. Best-effort: a full
    /// channel or a writer task that has exited silently drops the
    /// record rather than blocking the caller.
    pub fn log_packet(&self, account_id: &str, packet: SynchronizationPacket, time: DateTime<Utc>) {
        let _ = self.tx.try_send(Command::Log {
            account_id: account_id.to_string(),
            packet,
            time,
        });
    }
}

async fn run_writer(config: PacketLoggerConfig, mut rx: mpsc::Receiver<Command>) {
    let mut price_runs: HashMap<String, PriceRun> = HashMap::new();

    while let Some(Command::Log {
        account_id,
        packet,
        time,
    }) = rx.recv().await
    {
        if matches!(packet, SynchronizationPacket::Status { .. }) {
            continue; // §4.2: status packets are never persisted
        }

        if let SynchronizationPacket::Prices { .. } = &packet {
            handle_price_packet(&config, &account_id, packet, time, &mut price_runs).await;
            continue;
        }

        // A non-price packet closes any open compression run for this account.
        if let Some(run) = price_runs.remove(&account_id) {
            flush_price_run(&config, &account_id, run, time).await;
        }

        let record = to_record(&config, &packet, time);
        append_record(&config, &account_id, time, &record).await;
    }

    // Drain remaining open runs best-effort on channel close (§5: packet
    // logger writes survive close() until their batch flushes).
    let now = Utc::now();
    for (account_id, run) in price_runs {
        flush_price_run(&config, &account_id, run, now).await;
    }
}

async fn handle_price_packet(
    config: &PacketLoggerConfig,
    account_id: &str,
    packet: SynchronizationPacket,
    time: DateTime<Utc>,
    price_runs: &mut HashMap<String, PriceRun>,
) {
    if !config.compress_prices {
        let record = to_record(config, &packet, time);
        append_record(config, account_id, time, &record).await;
        return;
    }

    let Some(seq) = packet.sequence_number() else {
        let record = to_record(config, &packet, time);
        append_record(config, account_id, time, &record).await;
        return;
    };

    match price_runs.get_mut(account_id) {
        Some(run) if seq == run.last_seq + 1 => {
            run.last = packet;
            run.last_seq = seq;
        }
        Some(run) => {
            // Gap: close the existing run, start a fresh one (§4.2).
            let finished = std::mem::replace(
                run,
                PriceRun {
                    first: packet.clone(),
                    last: packet,
                    last_seq: seq,
                },
            );
            flush_price_run(config, account_id, finished, time).await;
        }
        None => {
            price_runs.insert(
                account_id.to_string(),
                PriceRun {
                    first: packet.clone(),
                    last: packet,
                    last_seq: seq,
                },
            );
        }
    }
}

async fn flush_price_run(
    config: &PacketLoggerConfig,
    account_id: &str,
    run: PriceRun,
    time: DateTime<Utc>,
) {
    let first_seq = run.first.sequence_number().unwrap_or(run.last_seq);
    if first_seq == run.last_seq {
        // A run of exactly one packet: no terminator, just the packet.
        let record = to_record(config, &run.first, time);
        append_record(config, account_id, time, &record).await;
        return;
    }

    let first_record = to_record(config, &run.first, time);
    append_record(config, account_id, time, &first_record).await;
    let last_record = to_record(config, &run.last, time);
    append_record(config, account_id, time, &last_record).await;

    let terminator = LogRecord {
        time,
        sequence_number: Some(run.last_seq),
        message: serde_json::Value::String(format!(
            "Recorded price packets {first_seq}-{}",
            run.last_seq
        )),
    };
    append_record(config, account_id, time, &terminator).await;
}

fn to_record(
    config: &PacketLoggerConfig,
    packet: &SynchronizationPacket,
    time: DateTime<Utc>,
) -> LogRecord {
    if config.compress_specifications
        && matches!(packet, SynchronizationPacket::Specifications { .. })
    {
        return LogRecord {
            time,
            sequence_number: packet.sequence_number(),
            message: serde_json::json!({
                "type": "specifications",
                "sequenceNumber": packet.sequence_number(),
            }),
        };
    }

    LogRecord {
        time,
        sequence_number: packet.sequence_number(),
        message: serde_json::to_value(PacketEnvelope(packet))
            .unwrap_or(serde_json::Value::Null),
    }
}

/// Thin serde adapter: [`SynchronizationPacket`] only derives
/// `Deserialize` (decode is the hot path); the logger is the one place
/// that needs to serialize a packet back out, so it goes through
/// `serde_json::Value` round-tripped via `Debug`-free manual mapping
/// is unnecessary — packets already came in as JSON, so the logger
/// keeps the original `serde_json::Value` it was handed instead of
/// round-tripping through the typed enum.
struct PacketEnvelope<'a>(&'a SynchronizationPacket);

impl serde::Serialize for PacketEnvelope<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.0.type_name())?;
        map.serialize_entry("accountId", self.0.account_id())?;
        if let Some(seq) = self.0.sequence_number() {
            map.serialize_entry("sequenceNumber", &seq)?;
        }
        map.end()
    }
}

fn bucket_dir(config: &PacketLoggerConfig, time: DateTime<Utc>) -> PathBuf {
    let bucket_index = time.hour() / config.log_file_size_in_hours.max(1);
    let name = format!(
        "{:04}-{:02}-{:02}-{:02}",
        time.year(),
        time.month(),
        time.day(),
        bucket_index
    );
    config.root_dir.join(name)
}

async fn append_record(
    config: &PacketLoggerConfig,
    account_id: &str,
    time: DateTime<Utc>,
    record: &LogRecord,
) {
    let dir = bucket_dir(config, time);
    if tokio::fs::create_dir_all(&dir).await.is_err() {
        tracing::warn!(?dir, "failed to create packet log bucket directory");
        return;
    }

    let path = dir.join(format!("{account_id}.log"));
    let Ok(line) = serde_json::to_string(record) else {
        return;
    };
    if let Ok(mut file) = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        let _ = file.write_all(line.as_bytes()).await;
        let _ = file.write_all(b"\n").await;
        crate::infrastructure::metrics::record_packet_journaled("synchronization");
    }

    enforce_retention(config).await;
}

async fn enforce_retention(config: &PacketLoggerConfig) {
    let Ok(mut entries) = tokio::fs::read_dir(&config.root_dir).await else {
        return;
    };
    let mut buckets = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path().is_dir() {
            buckets.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    buckets.sort();
    let limit = config.file_number_limit as usize;
    if buckets.len() <= limit {
        return;
    }
    for stale in &buckets[..buckets.len() - limit] {
        let _ = tokio::fs::remove_dir_all(config.root_dir.join(stale)).await;
    }
}

/// Parse a `YYYY-MM-DD-II` bucket directory name back to the half-open
/// UTC time window `[start, end)` it covers, given the bucket width
/// (hours) the logger was configured with when it wrote that bucket.
fn bucket_window(name: &str, width_hours: u32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut parts = name.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    let index: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let width = width_hours.max(1);
    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
    let start_of_day = date.and_hms_opt(0, 0, 0)?.and_utc();
    let start = start_of_day + chrono::Duration::hours(i64::from(index * width));
    let end = start_of_day + chrono::Duration::hours(i64::from((index + 1) * width));
    Some((start, end))
}

/// Whether a bucket covering `[bucket_start, bucket_end)` overlaps the
/// caller's query window `[from_time, to_time]` (either bound open).
fn overlaps(
    bucket_start: DateTime<Utc>,
    bucket_end: DateTime<Utc>,
    from_time: Option<DateTime<Utc>>,
    to_time: Option<DateTime<Utc>>,
) -> bool {
    if let Some(to) = to_time {
        if bucket_start > to {
            return false;
        }
    }
    if let Some(from) = from_time {
        if bucket_end <= from {
            return false;
        }
    }
    true
}

/// Read journaled records for `account_id`, in write order, scanning
/// only the bucket directories under `config.root_dir` that overlap
/// `[from_time, to_time]` (§4.2 read semantics). Either bound may be
/// omitted to leave that side of the window open.
///
/// # Errors
///
/// Propagates any I/O error encountered while listing `config.root_dir`.
pub async fn read_logs(
    config: &PacketLoggerConfig,
    account_id: &str,
    from_time: Option<DateTime<Utc>>,
    to_time: Option<DateTime<Utc>>,
) -> std::io::Result<Vec<LogRecord>> {
    let mut records = Vec::new();
    let mut bucket_names = Vec::new();
    let mut entries = tokio::fs::read_dir(&config.root_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.path().is_dir() {
            bucket_names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    bucket_names.sort();

    for bucket in bucket_names {
        match bucket_window(&bucket, config.log_file_size_in_hours) {
            Some((start, end)) if !overlaps(start, end, from_time, to_time) => continue,
            // A bucket name that doesn't parse isn't one of ours; skip
            // it rather than guess whether it's in range.
            None => continue,
            Some(_) => {}
        }

        let path = config.root_dir.join(&bucket).join(format!("{account_id}.log"));
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            continue;
        };
        for line in content.lines() {
            if let Ok(record) = serde_json::from_str::<LogRecord>(line) {
                records.push(record);
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(root: &Path) -> PacketLoggerConfig {
        PacketLoggerConfig {
            root_dir: root.to_path_buf(),
            ..PacketLoggerConfig::default()
        }
    }

    fn prices_packet(account_id: &str, seq: u64) -> SynchronizationPacket {
        serde_json::from_value(serde_json::json!({
            "type": "prices",
            "accountId": account_id,
            "sequenceNumber": seq,
            "prices": []
        }))
        .unwrap()
    }

    fn account_info_packet(account_id: &str) -> SynchronizationPacket {
        serde_json::from_value(serde_json::json!({
            "type": "accountInformation",
            "accountId": account_id,
            "accountInformation": {
                "broker": "Test Broker",
                "currency": "USD",
                "server": "Test-Server",
                "balance": "1000",
                "equity": "1000",
                "margin": "0",
                "freeMargin": "1000"
            }
        }))
        .unwrap()
    }

    fn status_packet(account_id: &str) -> SynchronizationPacket {
        serde_json::from_value(serde_json::json!({
            "type": "status",
            "accountId": account_id,
            "connected": true
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn s1_price_compression_run_produces_first_last_terminator() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let logger = PacketLogger::spawn(cfg.clone()).unwrap();
        let now = Utc::now();
        for seq in 1..=5u64 {
            logger.log_packet("acc", prices_packet("acc", seq), now);
        }
        logger.log_packet("acc", account_info_packet("acc"), now);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let records = read_logs(&cfg, "acc", None, None).await.unwrap();
        assert_eq!(records.len(), 4, "first, last, terminator, accountInformation");
        assert_eq!(records[0].sequence_number, Some(1));
        assert_eq!(records[1].sequence_number, Some(5));
        assert_eq!(
            records[2].message,
            serde_json::Value::String("Recorded price packets 1-5".to_string())
        );
        assert_eq!(
            records[3].message["type"],
            serde_json::Value::String("accountInformation".to_string())
        );
    }

    #[tokio::test]
    async fn gap_in_sequence_closes_run_and_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let logger = PacketLogger::spawn(cfg.clone()).unwrap();
        let now = Utc::now();
        logger.log_packet("acc", prices_packet("acc", 1), now);
        logger.log_packet("acc", prices_packet("acc", 2), now);
        logger.log_packet("acc", prices_packet("acc", 10), now); // gap closes run
        tokio::time::sleep(Duration::from_millis(50)).await;

        let records = read_logs(&cfg, "acc", None, None).await.unwrap();
        // run [1,2] closes as a 2-packet run (first=1,last=2,terminator),
        // then seq 10 starts a fresh single-packet run still open (unflushed).
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence_number, Some(1));
        assert_eq!(records[1].sequence_number, Some(2));
        assert_eq!(
            records[2].message,
            serde_json::Value::String("Recorded price packets 1-2".to_string())
        );
    }

    #[tokio::test]
    async fn status_packets_are_never_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let logger = PacketLogger::spawn(cfg.clone()).unwrap();
        let now = Utc::now();
        logger.log_packet("acc", status_packet("acc"), now);
        logger.log_packet("acc", account_info_packet("acc"), now);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let records = read_logs(&cfg, "acc", None, None).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn specifications_are_compressed_to_type_and_sequence() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let logger = PacketLogger::spawn(cfg.clone()).unwrap();
        let now = Utc::now();
        let packet: SynchronizationPacket = serde_json::from_value(serde_json::json!({
            "type": "specifications",
            "accountId": "acc",
            "sequenceNumber": 1,
            "specifications": [{"symbol": "EURUSD", "digits": 4, "contractSize": "100000"}]
        }))
        .unwrap();
        logger.log_packet("acc", packet, now);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let records = read_logs(&cfg, "acc", None, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].message,
            serde_json::json!({"type": "specifications", "sequenceNumber": 1})
        );
    }

    #[test]
    fn bucket_label_is_zero_padded_bucket_index_not_clock_hour() {
        let cfg = PacketLoggerConfig {
            log_file_size_in_hours: 4,
            root_dir: PathBuf::from("/tmp/unused"),
            ..PacketLoggerConfig::default()
        };
        let t = chrono::DateTime::parse_from_rfc3339("2020-10-10T05:00:01Z")
            .unwrap()
            .with_timezone(&Utc);
        let dir = bucket_dir(&cfg, t);
        assert_eq!(dir.file_name().unwrap().to_str().unwrap(), "2020-10-10-01");
    }

    #[tokio::test]
    async fn s2_retention_keeps_only_most_recent_buckets() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = PacketLoggerConfig {
            file_number_limit: 3,
            log_file_size_in_hours: 4,
            root_dir: tmp.path().to_path_buf(),
            ..PacketLoggerConfig::default()
        };
        let logger = PacketLogger::spawn(cfg.clone()).unwrap();
        let times = [
            "2020-10-10T00:00:01Z",
            "2020-10-10T05:00:01Z",
            "2020-10-10T09:00:01Z",
            "2020-10-10T13:00:01Z",
        ];
        for t in times {
            let time = chrono::DateTime::parse_from_rfc3339(t)
                .unwrap()
                .with_timezone(&Utc);
            logger.log_packet("acc", account_info_packet("acc"), time);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let mut buckets = Vec::new();
        let mut entries = tokio::fs::read_dir(tmp.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            buckets.push(entry.file_name().to_string_lossy().into_owned());
        }
        buckets.sort();
        assert_eq!(
            buckets,
            vec![
                "2020-10-10-01".to_string(),
                "2020-10-10-02".to_string(),
                "2020-10-10-03".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn read_logs_only_scans_buckets_overlapping_the_requested_window() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = PacketLoggerConfig {
            file_number_limit: 10,
            log_file_size_in_hours: 4,
            root_dir: tmp.path().to_path_buf(),
            ..PacketLoggerConfig::default()
        };
        let logger = PacketLogger::spawn(cfg.clone()).unwrap();
        // Buckets 00 (00:00-04:00), 01 (04:00-08:00), 02 (08:00-12:00).
        let times = [
            "2020-10-10T00:00:01Z",
            "2020-10-10T05:00:01Z",
            "2020-10-10T09:00:01Z",
        ];
        for t in times {
            let time = chrono::DateTime::parse_from_rfc3339(t)
                .unwrap()
                .with_timezone(&Utc);
            logger.log_packet("acc", account_info_packet("acc"), time);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let from = chrono::DateTime::parse_from_rfc3339("2020-10-10T04:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let to = chrono::DateTime::parse_from_rfc3339("2020-10-10T06:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let records = read_logs(&cfg, "acc", Some(from), Some(to)).await.unwrap();
        // Only bucket 01 (04:00-08:00) overlaps [04:30, 06:00).
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn bucket_window_recovers_the_hour_range_from_its_index() {
        let (start, end) = bucket_window("2020-10-10-02", 4).unwrap();
        assert_eq!(start.to_rfc3339(), "2020-10-10T08:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2020-10-10T12:00:00+00:00");
    }
}
