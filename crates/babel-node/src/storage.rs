//! Tiered durable storage using RocksDB.
//!
//! Three conceptual tables live behind key prefixes:
//!
//! - `contributor:{id}` - opaque contributor records, written lazily on
//!   first accepted contribution.
//! - `raw:{recorded_at_ms:020}:{region}` - short-retention raw samples.
//!   Timestamps are zero-padded so keys sort chronologically and cutoff
//!   scans are plain forward iterations.
//! - `daily:{region}:{day}` - infinite-retention daily summaries, keyed
//!   uniquely by (region, day). Days are `YYYY-MM-DD` UTC, which sort
//!   lexicographically in calendar order.
//!
//! Compaction folds raw samples older than a cutoff into daily summaries
//! and deletes them in the same `WriteBatch`, so a crash can never lose
//! raw data without its summary being durable, and a re-run over an
//! already-compacted window is a no-op.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const RAW_PREFIX: &str = "raw:";
const DAILY_PREFIX: &str = "daily:";
const CONTRIBUTOR_PREFIX: &str = "contributor:";

/// An opaque contributor known to this node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contributor {
    pub id: String,
    pub region: String,
    pub created_at_ms: u64,
}

/// One region's height at one flush instant. Append-only, short retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawSample {
    pub region: String,
    pub height_mm: u64,
    pub recorded_at_ms: u64,
}

/// Compacted aggregate of one region's raw samples for one UTC day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailySummary {
    pub region: String,
    pub avg_height_mm: u64,
    pub min_height_mm: u64,
    pub max_height_mm: u64,
    pub sample_count: u64,
    /// `YYYY-MM-DD` UTC.
    pub day: String,
}

/// UTC calendar day for an epoch-milliseconds timestamp.
pub fn day_for_ms(ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

fn raw_key(recorded_at_ms: u64, region: &str) -> String {
    format!("{}{:020}:{}", RAW_PREFIX, recorded_at_ms, region)
}

fn daily_key(region: &str, day: &str) -> String {
    format!("{}{}:{}", DAILY_PREFIX, region, day)
}

/// Storage backend for Babel durable data.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    // --- Contributors ---

    /// Store a contributor record.
    pub fn put_contributor(&self, contributor: &Contributor) -> Result<()> {
        let key = format!("{}{}", CONTRIBUTOR_PREFIX, contributor.id);
        let value = serde_json::to_vec(contributor)?;
        self.db.put(key.as_bytes(), value)?;
        Ok(())
    }

    /// Get a contributor by ID.
    pub fn get_contributor(&self, id: &str) -> Result<Option<Contributor>> {
        let key = format!("{}{}", CONTRIBUTOR_PREFIX, id);
        match self.db.get(key.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    // --- Raw samples ---

    /// Append a batch of raw samples atomically.
    pub fn append_raw_samples(&self, samples: &[RawSample]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for sample in samples {
            let key = raw_key(sample.recorded_at_ms, &sample.region);
            batch.put(key.as_bytes(), serde_json::to_vec(sample)?);
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Raw samples with `from_ms <= recorded_at_ms < to_ms`, in time order.
    pub fn raw_samples_in_range(&self, from_ms: u64, to_ms: u64) -> Result<Vec<RawSample>> {
        let start = raw_key(from_ms, "");
        let end = raw_key(to_ms, "");
        let mut samples = Vec::new();

        let iter = self
            .db
            .iterator(IteratorMode::From(start.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(RAW_PREFIX.as_bytes()) || key.as_ref() >= end.as_bytes() {
                break;
            }
            samples.push(serde_json::from_slice(&value)?);
        }

        Ok(samples)
    }

    /// Raw samples strictly older than `cutoff_ms`, with their keys.
    fn raw_samples_before(&self, cutoff_ms: u64) -> Result<Vec<(Vec<u8>, RawSample)>> {
        let end = raw_key(cutoff_ms, "");
        let mut rows = Vec::new();

        let iter = self.db.prefix_iterator(RAW_PREFIX.as_bytes());
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(RAW_PREFIX.as_bytes()) || key.as_ref() >= end.as_bytes() {
                break;
            }
            rows.push((key.to_vec(), serde_json::from_slice(&value)?));
        }

        Ok(rows)
    }

    // --- Daily summaries ---

    /// Get the summary for one (region, day), if present.
    pub fn get_daily_summary(&self, region: &str, day: &str) -> Result<Option<DailySummary>> {
        let key = daily_key(region, day);
        match self.db.get(key.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// All summaries for one region (or every region when `None`),
    /// ordered by (region, day).
    pub fn daily_summaries(&self, region: Option<&str>) -> Result<Vec<DailySummary>> {
        let prefix = match region {
            Some(r) => format!("{}{}:", DAILY_PREFIX, r),
            None => DAILY_PREFIX.to_string(),
        };
        let mut summaries = Vec::new();

        let iter = self.db.prefix_iterator(prefix.as_bytes());
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            summaries.push(serde_json::from_slice(&value)?);
        }

        Ok(summaries)
    }

    // --- Compaction ---

    /// Compact every raw sample older than `cutoff_ms` into daily
    /// summaries and delete the compacted rows, all in one write batch.
    ///
    /// Existing summaries for a (region, day) are merged with the new
    /// bucket's mean weighted by sample count. Returns the number of raw
    /// rows deleted. A raw row whose decoded fields disagree with its
    /// key aborts the run before anything is deleted.
    pub fn compact_raw_before(&self, cutoff_ms: u64) -> Result<usize> {
        let rows = self.raw_samples_before(cutoff_ms)?;
        if rows.is_empty() {
            return Ok(0);
        }

        // Bucket by (region, day), tracking sum/min/max/count and the
        // source keys to delete.
        struct Bucket {
            sum: u128,
            min: u64,
            max: u64,
            count: u64,
            keys: Vec<Vec<u8>>,
        }
        let mut buckets: BTreeMap<(String, String), Bucket> = BTreeMap::new();

        for (key, sample) in rows {
            // A row whose decoded fields disagree with its key means the
            // raw log itself is inconsistent; abort before any delete.
            let expected = raw_key(sample.recorded_at_ms, &sample.region);
            if key.as_slice() != expected.as_bytes() {
                return Err(Error::Integrity(format!(
                    "raw sample key mismatch for region {} at {}",
                    sample.region, sample.recorded_at_ms
                )));
            }

            let day = day_for_ms(sample.recorded_at_ms);
            let bucket = buckets
                .entry((sample.region.clone(), day))
                .or_insert(Bucket {
                    sum: 0,
                    min: u64::MAX,
                    max: 0,
                    count: 0,
                    keys: Vec::new(),
                });
            bucket.sum += sample.height_mm as u128;
            bucket.min = bucket.min.min(sample.height_mm);
            bucket.max = bucket.max.max(sample.height_mm);
            bucket.count += 1;
            bucket.keys.push(key);
        }

        let mut batch = WriteBatch::default();
        let mut deleted = 0;

        for ((region, day), bucket) in buckets {
            let summary = match self.get_daily_summary(&region, &day)? {
                Some(existing) => {
                    merge_summary(&existing, bucket.sum, bucket.min, bucket.max, bucket.count)
                }
                None => DailySummary {
                    region: region.clone(),
                    avg_height_mm: (bucket.sum / bucket.count as u128) as u64,
                    min_height_mm: bucket.min,
                    max_height_mm: bucket.max,
                    sample_count: bucket.count,
                    day: day.clone(),
                },
            };
            batch.put(
                daily_key(&region, &day).as_bytes(),
                serde_json::to_vec(&summary)?,
            );
            for key in bucket.keys {
                batch.delete(&key);
                deleted += 1;
            }
        }

        // Summaries and deletes commit together or not at all.
        self.db.write(batch)?;
        Ok(deleted)
    }
}

/// Merge a new bucket into an existing summary, count-weighted.
fn merge_summary(
    existing: &DailySummary,
    new_sum: u128,
    new_min: u64,
    new_max: u64,
    new_count: u64,
) -> DailySummary {
    let total_count = existing.sample_count + new_count;
    let weighted =
        existing.avg_height_mm as u128 * existing.sample_count as u128 + new_sum;
    DailySummary {
        region: existing.region.clone(),
        avg_height_mm: (weighted / total_count as u128) as u64,
        min_height_mm: existing.min_height_mm.min(new_min),
        max_height_mm: existing.max_height_mm.max(new_max),
        sample_count: total_count,
        day: existing.day.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DAY1: u64 = 1_700_000_000_000; // 2023-11-14 UTC
    const DAY2: u64 = 1_700_100_000_000; // 2023-11-16 UTC

    fn sample(region: &str, height: u64, at: u64) -> RawSample {
        RawSample {
            region: region.to_string(),
            height_mm: height,
            recorded_at_ms: at,
        }
    }

    #[test]
    fn contributor_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let contributor = Contributor {
            id: "device-abc".to_string(),
            region: "no".to_string(),
            created_at_ms: 1000,
        };
        storage.put_contributor(&contributor).unwrap();
        let loaded = storage.get_contributor("device-abc").unwrap().unwrap();
        assert_eq!(contributor, loaded);
        assert!(storage.get_contributor("missing").unwrap().is_none());
    }

    #[test]
    fn raw_sample_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let written = sample("no", 260, DAY1);
        storage.append_raw_samples(&[written.clone()]).unwrap();

        let read = storage.raw_samples_in_range(DAY1, DAY1 + 1).unwrap();
        assert_eq!(read, vec![written]);
    }

    #[test]
    fn raw_range_is_time_ordered_and_bounded() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        storage
            .append_raw_samples(&[
                sample("a", 1, DAY1 + 2000),
                sample("a", 2, DAY1),
                sample("a", 3, DAY1 + 1000),
                sample("a", 4, DAY2),
            ])
            .unwrap();

        let read = storage.raw_samples_in_range(DAY1, DAY1 + 3000).unwrap();
        let heights: Vec<u64> = read.iter().map(|s| s.height_mm).collect();
        assert_eq!(heights, vec![2, 3, 1]);
    }

    #[test]
    fn compaction_produces_daily_summary() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        storage
            .append_raw_samples(&[
                sample("no", 100, DAY1),
                sample("no", 200, DAY1 + 1000),
                sample("no", 300, DAY1 + 2000),
            ])
            .unwrap();

        let deleted = storage.compact_raw_before(DAY1 + 10_000).unwrap();
        assert_eq!(deleted, 3);

        let day = day_for_ms(DAY1);
        let summary = storage.get_daily_summary("no", &day).unwrap().unwrap();
        assert_eq!(summary.avg_height_mm, 200);
        assert_eq!(summary.min_height_mm, 100);
        assert_eq!(summary.max_height_mm, 300);
        assert_eq!(summary.sample_count, 3);

        // Compacted raw rows are gone.
        assert!(storage
            .raw_samples_in_range(DAY1, DAY1 + 10_000)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn compaction_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        storage
            .append_raw_samples(&[sample("no", 100, DAY1), sample("no", 300, DAY1 + 1000)])
            .unwrap();

        assert_eq!(storage.compact_raw_before(DAY1 + 10_000).unwrap(), 2);
        let day = day_for_ms(DAY1);
        let first = storage.get_daily_summary("no", &day).unwrap().unwrap();

        // Re-running over the same window with no new data changes nothing.
        assert_eq!(storage.compact_raw_before(DAY1 + 10_000).unwrap(), 0);
        let second = storage.get_daily_summary("no", &day).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn compaction_merges_count_weighted() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        // First window: two samples averaging 100.
        storage
            .append_raw_samples(&[sample("no", 50, DAY1), sample("no", 150, DAY1 + 1000)])
            .unwrap();
        storage.compact_raw_before(DAY1 + 2000).unwrap();

        // Second window, same day: one sample at 400.
        storage
            .append_raw_samples(&[sample("no", 400, DAY1 + 3000)])
            .unwrap();
        storage.compact_raw_before(DAY1 + 4000).unwrap();

        let day = day_for_ms(DAY1);
        let summary = storage.get_daily_summary("no", &day).unwrap().unwrap();
        // (100 * 2 + 400 * 1) / 3 = 200
        assert_eq!(summary.avg_height_mm, 200);
        assert_eq!(summary.min_height_mm, 50);
        assert_eq!(summary.max_height_mm, 400);
        assert_eq!(summary.sample_count, 3);
    }

    #[test]
    fn compaction_respects_cutoff() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        storage
            .append_raw_samples(&[sample("no", 100, DAY1), sample("no", 200, DAY2)])
            .unwrap();

        // Only the older sample falls before the cutoff.
        assert_eq!(storage.compact_raw_before(DAY1 + 10_000).unwrap(), 1);
        let remaining = storage.raw_samples_in_range(0, u64::MAX / 2).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].recorded_at_ms, DAY2);
    }

    #[test]
    fn compaction_groups_by_region_and_day() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        storage
            .append_raw_samples(&[
                sample("no", 100, DAY1),
                sample("se", 500, DAY1),
                sample("no", 700, DAY2),
            ])
            .unwrap();

        storage.compact_raw_before(DAY2 + 10_000).unwrap();

        let no_summaries = storage.daily_summaries(Some("no")).unwrap();
        assert_eq!(no_summaries.len(), 2);
        let se_summaries = storage.daily_summaries(Some("se")).unwrap();
        assert_eq!(se_summaries.len(), 1);
        assert_eq!(se_summaries[0].avg_height_mm, 500);

        let all = storage.daily_summaries(None).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn compaction_aborts_on_corrupt_raw_row() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        storage.append_raw_samples(&[sample("no", 100, DAY1)]).unwrap();

        // Row whose value claims a different region than its key.
        let bad = sample("se", 200, DAY1 + 1000);
        storage
            .db
            .put(
                raw_key(DAY1 + 1000, "no").as_bytes(),
                serde_json::to_vec(&bad).unwrap(),
            )
            .unwrap();

        let err = storage.compact_raw_before(DAY1 + 10_000).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));

        // Nothing deleted, no summary written.
        assert_eq!(
            storage.raw_samples_in_range(DAY1, DAY1 + 10_000).unwrap().len(),
            2
        );
        assert!(storage
            .get_daily_summary("no", &day_for_ms(DAY1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn empty_compaction_is_noop() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        assert_eq!(storage.compact_raw_before(DAY1).unwrap(), 0);
    }

    #[test]
    fn day_bucketing() {
        assert_eq!(day_for_ms(0), "1970-01-01");
        assert_eq!(day_for_ms(1_700_000_000_000), "2023-11-14");
    }
}
