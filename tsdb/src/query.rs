//! Query façade.
//!
//! [`Tsdb`] is the main entry point: it owns the per-day writers and
//! implements the read operations. [`TsdbReader`] is a read-only view for
//! consumers that must not append; both implement [`TsdbRead`].
//!
//! Reads are assembled per query: the window selects the candidate day
//! files, each file is scanned independently (blocking I/O on a worker
//! thread), and results are joined by series name. No state is shared with
//! the writer beyond the bytes on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use common::clock::{Clock, SystemClock};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, QueryOptions};
use crate::directory;
use crate::error::{Error, QueryError, Result};
use crate::format::{self, FORMAT_STRING_U64};
use crate::model::{EventPoint, Sample, SeriesEvents, SeriesList, SeriesStats, Value};
use crate::writer::DayWriter;

/// Read operations shared by [`Tsdb`] and [`TsdbReader`].
#[async_trait]
pub trait TsdbRead {
    /// Lists the channel names defined in any file intersecting the window.
    async fn list_series(&self, start_ms: i64, end_ms: i64) -> Result<SeriesList> {
        self.list_series_with_options(start_ms, end_ms, QueryOptions::default())
            .await
    }

    async fn list_series_with_options(
        &self,
        start_ms: i64,
        end_ms: i64,
        options: QueryOptions,
    ) -> Result<SeriesList>;

    /// Streams the samples of one series in the window.
    ///
    /// When more than `max_events` raw samples match, the window is split
    /// into uniform buckets aggregated to min/avg/max and the result is
    /// flagged as downsampled. Non-numeric series cannot be aggregated and
    /// return their first `max_events` samples instead.
    async fn get_events(
        &self,
        name: &str,
        start_ms: i64,
        end_ms: i64,
        max_events: usize,
    ) -> Result<SeriesEvents> {
        self.get_events_with_options(name, start_ms, end_ms, max_events, QueryOptions::default())
            .await
    }

    async fn get_events_with_options(
        &self,
        name: &str,
        start_ms: i64,
        end_ms: i64,
        max_events: usize,
        options: QueryOptions,
    ) -> Result<SeriesEvents>;

    /// Computes count, current value and maximum for one series in the
    /// window. The current value is the last sample at or before the
    /// window end, reported only while it is recent enough.
    async fn get_stats(&self, name: &str, start_ms: i64, end_ms: i64) -> Result<SeriesStats> {
        self.get_stats_with_options(name, start_ms, end_ms, QueryOptions::default())
            .await
    }

    async fn get_stats_with_options(
        &self,
        name: &str,
        start_ms: i64,
        end_ms: i64,
        options: QueryOptions,
    ) -> Result<SeriesStats>;
}

/// The TimeSeriesDB: one data directory of day files, a single writer,
/// any number of concurrent readers.
///
/// # Writer semantics
///
/// `Tsdb` keeps one exclusive [`DayWriter`] per UTC day touched by
/// appends. When appends move on to newer days, writers whose day is a
/// full UTC day in the past are finalized: the end-of-file marker is
/// appended and the file becomes immutable. Late samples for the previous
/// day shortly after midnight therefore still land.
///
/// # Thread safety
///
/// All methods take `&self`. Appends serialize on an internal mutex;
/// reads never take it.
pub struct Tsdb {
    config: Config,
    clock: Arc<dyn Clock>,
    writers: Mutex<BTreeMap<NaiveDate, DayWriter>>,
}

impl Tsdb {
    /// Opens a database, creating the data directory if needed.
    pub fn open(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Opens a database with an explicit time source. Tests use this with
    /// a mock clock to pin the `get_stats` current-value window.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            config,
            clock,
            writers: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Appends one sample, routing it to the day file its timestamp
    /// belongs to and using the smallest legal encoding.
    pub fn append(
        &self,
        name: &str,
        format_id: u8,
        timestamp_ms: i64,
        value: &Value,
    ) -> Result<()> {
        self.with_writer(timestamp_ms, |writer| {
            writer.append(name, format_id, timestamp_ms, value)
        })
    }

    /// Appends a numeric sample, picking a double format that carries the
    /// display decimals hint, or reusing the format the series already has
    /// in this day file.
    pub fn append_f64(
        &self,
        name: &str,
        value: f64,
        decimals: u8,
        timestamp_ms: i64,
    ) -> Result<()> {
        self.with_writer(timestamp_ms, |writer| {
            let format_id = writer
                .registry()
                .channel_by_name(name)
                .map(|(_, def)| def.format_id)
                .unwrap_or_else(|| format::double_format_for_decimals(decimals));
            writer.append(name, format_id, timestamp_ms, &Value::Double(value))
        })
    }

    /// Appends a string sample.
    pub fn append_str(&self, name: &str, value: &str, timestamp_ms: i64) -> Result<()> {
        self.with_writer(timestamp_ms, |writer| {
            let format_id = writer
                .registry()
                .channel_by_name(name)
                .map(|(_, def)| def.format_id)
                .unwrap_or(FORMAT_STRING_U64);
            writer.append(
                name,
                format_id,
                timestamp_ms,
                &Value::Text(value.to_string()),
            )
        })
    }

    /// Finalizes one day explicitly: appends the end-of-file marker and
    /// drops the writer. A no-op for days with no file.
    pub fn finalize_day(&self, day: NaiveDate) -> Result<()> {
        let mut writers = self.writers()?;
        if let Some(writer) = writers.remove(&day) {
            return writer.finalize();
        }
        drop(writers);
        let path = directory::path_for_day(&self.config.data_dir, day);
        if path.exists() {
            DayWriter::open(&path)?.finalize()?;
        }
        Ok(())
    }

    /// Durability barrier across all open writers.
    pub fn sync(&self) -> Result<()> {
        let mut writers = self.writers()?;
        for writer in writers.values_mut() {
            writer.sync()?;
        }
        Ok(())
    }

    /// Syncs and closes all open writers without finalizing their days.
    pub fn close(self) -> Result<()> {
        let writers = std::mem::take(
            &mut *self
                .writers
                .lock()
                .map_err(|_| poisoned_writers_error())?,
        );
        for (_, writer) in writers {
            writer.close()?;
        }
        Ok(())
    }

    fn with_writer<T>(
        &self,
        timestamp_ms: i64,
        f: impl FnOnce(&mut DayWriter) -> Result<T>,
    ) -> Result<T> {
        let day = directory::day_of_timestamp_ms(timestamp_ms);
        let mut writers = self.writers()?;
        if !writers.contains_key(&day) {
            let path = directory::path_for_day(&self.config.data_dir, day);
            writers.insert(day, DayWriter::open(path)?);
        }
        // The entry was just inserted if it was missing.
        let writer = writers.get_mut(&day).expect("writer for day");
        let result = f(writer)?;
        self.finalize_stale(&mut writers)?;
        Ok(result)
    }

    /// Finalizes writers whose UTC day is a full day in the past; those
    /// days can no longer receive samples.
    fn finalize_stale(&self, writers: &mut BTreeMap<NaiveDate, DayWriter>) -> Result<()> {
        let today = directory::day_of_timestamp_ms(self.clock.now_ms());
        let stale: Vec<NaiveDate> = writers
            .keys()
            .filter(|day| day.checked_add_days(Days::new(2)).is_some_and(|d| d <= today))
            .copied()
            .collect();
        for day in stale {
            if let Some(writer) = writers.remove(&day) {
                writer.finalize()?;
            }
        }
        Ok(())
    }

    fn writers(&self) -> Result<MutexGuard<'_, BTreeMap<NaiveDate, DayWriter>>> {
        self.writers.lock().map_err(|_| poisoned_writers_error())
    }
}

fn poisoned_writers_error() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::Other,
        "writer table lock poisoned",
    ))
}

#[async_trait]
impl TsdbRead for Tsdb {
    async fn list_series_with_options(
        &self,
        start_ms: i64,
        end_ms: i64,
        options: QueryOptions,
    ) -> Result<SeriesList> {
        let dir = self.config.data_dir.clone();
        run_blocking(move || list_series_blocking(&dir, start_ms, end_ms, options.cancel)).await
    }

    async fn get_events_with_options(
        &self,
        name: &str,
        start_ms: i64,
        end_ms: i64,
        max_events: usize,
        options: QueryOptions,
    ) -> Result<SeriesEvents> {
        let dir = self.config.data_dir.clone();
        let name = name.to_string();
        run_blocking(move || {
            get_events_blocking(&dir, &name, start_ms, end_ms, max_events, options.cancel)
        })
        .await
    }

    async fn get_stats_with_options(
        &self,
        name: &str,
        start_ms: i64,
        end_ms: i64,
        options: QueryOptions,
    ) -> Result<SeriesStats> {
        let dir = self.config.data_dir.clone();
        let name = name.to_string();
        let clock = Arc::clone(&self.clock);
        let window_ms = self.config.current_value_window.as_millis() as i64;
        run_blocking(move || {
            get_stats_blocking(
                &dir,
                &name,
                start_ms,
                end_ms,
                clock.now_ms(),
                window_ms,
                options.cancel,
            )
        })
        .await
    }
}

/// A read-only view of a data directory.
///
/// Opens no writers and takes no locks beyond the shared per-file read
/// lock. Multiple readers may run concurrently with the single writer.
pub struct TsdbReader {
    config: Config,
    clock: Arc<dyn Clock>,
}

impl TsdbReader {
    pub fn open(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }
}

#[async_trait]
impl TsdbRead for TsdbReader {
    async fn list_series_with_options(
        &self,
        start_ms: i64,
        end_ms: i64,
        options: QueryOptions,
    ) -> Result<SeriesList> {
        let dir = self.config.data_dir.clone();
        run_blocking(move || list_series_blocking(&dir, start_ms, end_ms, options.cancel)).await
    }

    async fn get_events_with_options(
        &self,
        name: &str,
        start_ms: i64,
        end_ms: i64,
        max_events: usize,
        options: QueryOptions,
    ) -> Result<SeriesEvents> {
        let dir = self.config.data_dir.clone();
        let name = name.to_string();
        run_blocking(move || {
            get_events_blocking(&dir, &name, start_ms, end_ms, max_events, options.cancel)
        })
        .await
    }

    async fn get_stats_with_options(
        &self,
        name: &str,
        start_ms: i64,
        end_ms: i64,
        options: QueryOptions,
    ) -> Result<SeriesStats> {
        let dir = self.config.data_dir.clone();
        let name = name.to_string();
        let clock = Arc::clone(&self.clock);
        let window_ms = self.config.current_value_window.as_millis() as i64;
        run_blocking(move || {
            get_stats_blocking(
                &dir,
                &name,
                start_ms,
                end_ms,
                clock.now_ms(),
                window_ms,
                options.cancel,
            )
        })
        .await
    }
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?
}

fn validate_window(start_ms: i64, end_ms: i64) -> Result<()> {
    if end_ms < start_ms {
        return Err(QueryError::WindowInvalid { start_ms, end_ms }.into());
    }
    Ok(())
}

fn list_series_blocking(
    dir: &Path,
    start_ms: i64,
    end_ms: i64,
    cancel: Option<CancellationToken>,
) -> Result<SeriesList> {
    validate_window(start_ms, end_ms)?;
    let files = directory::candidate_files(dir, start_ms, end_ms)?;
    let mut names = BTreeSet::new();
    for file in &files {
        let scanned = directory::scan_file(&file.path, cancel.as_ref())?;
        names.extend(scanned.formats.into_keys());
    }
    Ok(SeriesList {
        series: names.into_iter().collect(),
        files: files.iter().map(|f| f.file_name()).collect(),
    })
}

/// Samples of one series across all candidate files, sorted by timestamp,
/// plus the largest display hint observed and the contributing file names.
fn collect_series(
    dir: &Path,
    name: &str,
    start_ms: i64,
    end_ms: i64,
    cancel: Option<&CancellationToken>,
) -> Result<(Vec<Sample>, u8, Vec<String>)> {
    let files = directory::candidate_files(dir, start_ms, end_ms)?;
    let mut samples = Vec::new();
    let mut decimals: Option<u8> = None;
    for file in &files {
        let scanned = directory::scan_file(&file.path, cancel)?;
        if let Some(format_id) = scanned.formats.get(name) {
            let hint = format::decimal_places(*format_id);
            decimals = Some(decimals.map_or(hint, |d| d.max(hint)));
        }
        if let Some(file_samples) = scanned.series.get(name) {
            samples.extend(
                file_samples
                    .iter()
                    .filter(|s| s.timestamp_ms >= start_ms && s.timestamp_ms <= end_ms)
                    .cloned(),
            );
        }
    }
    // Files arrive in date order and are time-ordered internally for any
    // well-behaved writer; the sort is a cheap guarantee either way.
    samples.sort_by_key(|s| s.timestamp_ms);
    let files = files.iter().map(|f| f.file_name()).collect();
    Ok((samples, decimals.unwrap_or(3), files))
}

fn get_events_blocking(
    dir: &Path,
    name: &str,
    start_ms: i64,
    end_ms: i64,
    max_events: usize,
    cancel: Option<CancellationToken>,
) -> Result<SeriesEvents> {
    validate_window(start_ms, end_ms)?;
    let max_events = max_events.max(1);
    let (samples, decimal_places, files) =
        collect_series(dir, name, start_ms, end_ms, cancel.as_ref())?;

    let all_numeric = samples.iter().all(|s| s.value.is_numeric());
    let (points, downsampled, truncated) = if samples.len() <= max_events {
        (raw_points(samples.into_iter()), false, false)
    } else if all_numeric {
        (
            downsample(&samples, max_events, start_ms, end_ms, decimal_places),
            true,
            false,
        )
    } else {
        // Strings cannot aggregate to min/avg/max; truncate instead.
        (raw_points(samples.into_iter().take(max_events)), false, true)
    };

    Ok(SeriesEvents {
        points,
        downsampled,
        truncated,
        decimal_places,
        files,
    })
}

fn get_stats_blocking(
    dir: &Path,
    name: &str,
    start_ms: i64,
    end_ms: i64,
    now_ms: i64,
    current_window_ms: i64,
    cancel: Option<CancellationToken>,
) -> Result<SeriesStats> {
    validate_window(start_ms, end_ms)?;
    let (samples, decimal_places, files) =
        collect_series(dir, name, start_ms, end_ms, cancel.as_ref())?;

    let count = samples.len() as u64;
    let max_value = if samples.is_empty() || samples.iter().any(|s| !s.value.is_numeric()) {
        None
    } else {
        samples
            .iter()
            .filter_map(|s| s.value.as_f64())
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            })
    };
    let current_value = samples
        .last()
        .filter(|s| now_ms - s.timestamp_ms <= current_window_ms)
        .map(|s| s.value.clone());

    Ok(SeriesStats {
        count,
        current_value,
        max_value,
        decimal_places,
        files,
    })
}

fn raw_points(samples: impl Iterator<Item = Sample>) -> Vec<EventPoint> {
    samples
        .map(|s| EventPoint::Raw {
            timestamp_ms: s.timestamp_ms,
            value: s.value,
        })
        .collect()
}

/// Uniform bucketing over the window, min/avg/max per bucket. Empty
/// buckets produce no point; aggregates are rounded to the display hint.
fn downsample(
    samples: &[Sample],
    max_events: usize,
    start_ms: i64,
    end_ms: i64,
    decimal_places: u8,
) -> Vec<EventPoint> {
    #[derive(Clone, Copy, Default)]
    struct Bucket {
        count: u64,
        sum: f64,
        min: f64,
        max: f64,
    }

    let span = (end_ms - start_ms + 1).max(1);
    let bucket_width = (span + max_events as i64 - 1) / max_events as i64;
    let bucket_width = bucket_width.max(1);

    let mut buckets = vec![Bucket::default(); max_events];
    for sample in samples {
        let Some(v) = sample.value.as_f64() else {
            continue;
        };
        let idx = ((sample.timestamp_ms - start_ms) / bucket_width)
            .clamp(0, max_events as i64 - 1) as usize;
        let bucket = &mut buckets[idx];
        if bucket.count == 0 {
            bucket.min = v;
            bucket.max = v;
        } else {
            bucket.min = bucket.min.min(v);
            bucket.max = bucket.max.max(v);
        }
        bucket.count += 1;
        bucket.sum += v;
    }

    buckets
        .iter()
        .enumerate()
        .filter(|(_, b)| b.count > 0)
        .map(|(i, b)| {
            let bucket_start = start_ms + i as i64 * bucket_width;
            let bucket_end = end_ms.min(bucket_start + bucket_width - 1);
            EventPoint::Bucket {
                timestamp_ms: (bucket_start + bucket_end) / 2,
                start_ms: bucket_start,
                end_ms: bucket_end,
                count: b.count,
                min: round_to(b.min, decimal_places),
                avg: round_to(b.sum / b.count as f64, decimal_places),
                max: round_to(b.max, decimal_places),
            }
        })
        .collect()
}

fn round_to(value: f64, decimal_places: u8) -> f64 {
    let factor = 10f64.powi(i32::from(decimal_places));
    (value * factor).round() / factor
}
