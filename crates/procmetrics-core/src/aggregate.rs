//! Scrape-time aggregation across all process stores.
//!
//! Stores are merged in `(pid, role)` order whatever order the directory
//! lists them in, so floating point sums come out identical on every scrape
//! of the same state. The aggregator never writes to a store; the only
//! mutation is deleting orphans after a completed merge, and only when the
//! scrape is still within its deadline and its result will be served.

use std::collections::btree_map::Entry as MapEntry;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::descriptor::{GaugeMode, LabelSet, MetricDescriptor, MetricKind, PID_LABEL};
use crate::error::{MetricsError, Result};
use crate::process::{Liveness, ProcessId, SystemLiveness};
use crate::snapshot::{AggregatedSnapshot, MetricFamily, Sample, SampleValue};
use crate::store::image::StoreImage;
use crate::store::layout::{SeriesPart, SlotRecord};
use crate::store::{list_stores, remove_store};

pub struct Aggregator {
    dir: PathBuf,
    liveness: Arc<dyn Liveness>,
}

impl Aggregator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            liveness: Arc::new(SystemLiveness),
        }
    }

    pub fn with_liveness(mut self, liveness: Arc<dyn Liveness>) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn scrape(&self) -> Result<AggregatedSnapshot> {
        self.scrape_until(None)
    }

    /// Merge every readable store. Past `deadline` the scrape aborts with
    /// `ScrapeTimeout` and deletes nothing.
    pub fn scrape_until(&self, deadline: Option<Instant>) -> Result<AggregatedSnapshot> {
        self.scrape_with(deadline, &ScrapeTicket::new())
    }

    /// Like [`Aggregator::scrape_until`], for a caller that may stop waiting.
    /// Orphans are deleted only after `ticket` commits; once the caller has
    /// abandoned it the scrape returns `ScrapeTimeout` instead.
    pub fn scrape_with(
        &self,
        deadline: Option<Instant>,
        ticket: &ScrapeTicket,
    ) -> Result<AggregatedSnapshot> {
        let stores = list_stores(&self.dir)?;
        let total = stores.len();

        let mut merger = Merger::default();
        let mut skipped = Vec::new();
        let mut orphans = Vec::new();

        for (read, (process, path)) in stores.into_iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(read, total, "scrape deadline exceeded");
                return Err(MetricsError::ScrapeTimeout { read, total });
            }

            let image = match StoreImage::read(&path) {
                Ok(image) => image,
                Err(MetricsError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    // stopped or reaped between listing and reading
                    tracing::debug!(path = %path.display(), "store vanished during scrape");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable store");
                    skipped.push(path);
                    continue;
                }
            };

            if image.header.pid != process.pid || image.header.role != process.role {
                tracing::warn!(path = %path.display(), header_pid = image.header.pid, "store header does not match file name; skipping");
                skipped.push(path);
                continue;
            }
            if image.torn > 0 {
                tracing::warn!(path = %path.display(), torn = image.torn, "dropping inconsistent slots");
            }

            let live = self.liveness.is_alive(process.pid);
            merger.add(process, live, &image);
            if !live {
                orphans.push(path);
            }
        }

        let families = merger.finish();

        // the last moment an abort is still free of side effects
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!(
                read = total,
                total,
                orphans = orphans.len(),
                "scrape deadline exceeded after merge"
            );
            return Err(MetricsError::ScrapeTimeout { read: total, total });
        }
        if !ticket.commit() {
            tracing::warn!(orphans = orphans.len(), "scrape abandoned by its caller");
            return Err(MetricsError::ScrapeTimeout { read: total, total });
        }

        let mut reaped = Vec::new();
        for path in orphans {
            match remove_store(&path) {
                Ok(true) => {
                    tracing::info!(path = %path.display(), "reclaimed orphaned store");
                    reaped.push(path);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to reclaim orphaned store")
                }
            }
        }

        Ok(AggregatedSnapshot {
            families,
            skipped,
            reaped,
        })
    }
}

/// Hand-off between a running scrape and the caller waiting on it.
///
/// Exactly one side wins: the scrape commits right before deleting orphans,
/// or the caller abandons it first and the scrape deletes nothing.
#[derive(Debug, Default)]
pub struct ScrapeTicket(AtomicU8);

const PENDING: u8 = 0;
const COMMITTED: u8 = 1;
const ABANDONED: u8 = 2;

impl ScrapeTicket {
    pub fn new() -> Self {
        Self(AtomicU8::new(PENDING))
    }

    /// Give up on the scrape. Returns `false` if it already committed; its
    /// orphan deletion is then under way and the result must be served.
    pub fn abandon(&self) -> bool {
        match self
            .0
            .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(state) => state == ABANDONED,
        }
    }

    fn commit(&self) -> bool {
        self.0
            .compare_exchange(PENDING, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Families of a single store, as if it were the only one in the directory.
pub(crate) fn merge_one(process: ProcessId, image: &StoreImage) -> Vec<MetricFamily> {
    let mut merger = Merger::default();
    merger.add(process, true, image);
    merger.finish()
}

#[derive(Debug)]
enum Acc {
    Sum(f64),
    Max(f64),
    Min(f64),
    Latest(Option<(u64, f64)>),
    Histogram { buckets: Vec<f64>, count: f64, sum: f64 },
    Summary { count: f64, sum: f64 },
}

impl Acc {
    fn empty(d: &MetricDescriptor) -> Acc {
        match d.kind {
            MetricKind::Counter => Acc::Sum(0.0),
            MetricKind::Gauge => match d.mode {
                GaugeMode::All | GaugeMode::LiveSum | GaugeMode::LiveAll => Acc::Sum(0.0),
                GaugeMode::LiveMax => Acc::Max(f64::NEG_INFINITY),
                GaugeMode::LiveMin => Acc::Min(f64::INFINITY),
                GaugeMode::MostRecent => Acc::Latest(None),
            },
            MetricKind::Histogram => Acc::Histogram {
                buckets: vec![0.0; d.buckets.len()],
                count: 0.0,
                sum: 0.0,
            },
            MetricKind::Summary => Acc::Summary {
                count: 0.0,
                sum: 0.0,
            },
        }
    }

    fn add(&mut self, part: SeriesPart, value: f64, timestamp_ms: u64) {
        match (self, part) {
            (Acc::Sum(v), SeriesPart::Value) => *v += value,
            (Acc::Max(v), SeriesPart::Value) => *v = v.max(value),
            (Acc::Min(v), SeriesPart::Value) => *v = v.min(value),
            (Acc::Latest(latest), SeriesPart::Value) => {
                // ties go to the later store in merge order
                if latest.map_or(true, |(ts, _)| timestamp_ms >= ts) {
                    *latest = Some((timestamp_ms, value));
                }
            }
            (Acc::Histogram { buckets, .. }, SeriesPart::Bucket(i)) => {
                if let Some(b) = buckets.get_mut(i as usize) {
                    *b += value;
                }
            }
            (Acc::Histogram { count, .. } | Acc::Summary { count, .. }, SeriesPart::Count) => {
                *count += value
            }
            (Acc::Histogram { sum, .. } | Acc::Summary { sum, .. }, SeriesPart::Sum) => {
                *sum += value
            }
            _ => {}
        }
    }

    fn finish(self, d: &MetricDescriptor) -> SampleValue {
        match self {
            Acc::Sum(v) | Acc::Max(v) | Acc::Min(v) => SampleValue::Scalar(v),
            Acc::Latest(latest) => SampleValue::Scalar(latest.map_or(0.0, |(_, v)| v)),
            Acc::Histogram {
                buckets,
                count,
                sum,
            } => SampleValue::Histogram {
                buckets: d.buckets.iter().copied().zip(buckets).collect(),
                count,
                sum,
            },
            Acc::Summary { count, sum } => SampleValue::Summary { count, sum },
        }
    }
}

struct FamilyAcc {
    descriptor: MetricDescriptor,
    /// First store that declared the descriptor.
    owner: ProcessId,
    series: BTreeMap<LabelSet, Acc>,
}

impl FamilyAcc {
    fn add(
        &mut self,
        process: ProcessId,
        live: bool,
        labels: &LabelSet,
        part: SeriesPart,
        value: f64,
        timestamp_ms: u64,
    ) {
        let d = &self.descriptor;
        if labels.len() != d.labels.len() {
            return;
        }
        let key = match (d.kind, d.mode) {
            (MetricKind::Gauge, mode) if mode.live_only() && !live => return,
            (MetricKind::Gauge, GaugeMode::LiveAll) => labels.with(process.pid.to_string()),
            _ => labels.clone(),
        };
        self.series
            .entry(key)
            .or_insert_with(|| Acc::empty(d))
            .add(part, value, timestamp_ms);
    }

    fn finish(self) -> MetricFamily {
        let FamilyAcc {
            mut descriptor,
            series,
            ..
        } = self;
        let samples = series
            .into_iter()
            .map(|(labels, acc)| Sample {
                labels,
                value: acc.finish(&descriptor),
            })
            .collect();
        if descriptor.kind == MetricKind::Gauge && descriptor.mode == GaugeMode::LiveAll {
            descriptor.labels.push(PID_LABEL.to_string());
        }
        MetricFamily {
            descriptor,
            samples,
        }
    }
}

#[derive(Default)]
struct Merger {
    families: BTreeMap<String, FamilyAcc>,
}

impl Merger {
    fn add(&mut self, process: ProcessId, live: bool, image: &StoreImage) {
        // metrics whose schema in this store agrees with the merged one
        let mut accepted: HashSet<&str> = HashSet::new();

        for entry in &image.entries {
            let SlotRecord::Schema { descriptor } = &entry.record else {
                continue;
            };
            if !self.families.contains_key(&descriptor.name) {
                if let Some((owner, sample)) = self.sample_clash(descriptor) {
                    tracing::warn!(
                        metric = %descriptor.name,
                        %process,
                        %owner,
                        %sample,
                        "stored descriptor renders a sample of another metric; skipping series"
                    );
                    continue;
                }
            }
            match self.families.entry(descriptor.name.clone()) {
                MapEntry::Vacant(slot) => match descriptor.clone().validated() {
                    Ok(d) => {
                        slot.insert(FamilyAcc {
                            descriptor: d,
                            owner: process,
                            series: BTreeMap::new(),
                        });
                        accepted.insert(&descriptor.name);
                    }
                    Err(e) => {
                        tracing::warn!(metric = %descriptor.name, %process, error = %e, "invalid stored descriptor; skipping series");
                    }
                },
                MapEntry::Occupied(existing) => {
                    match existing.get().descriptor.conflict_with(descriptor) {
                        None => {
                            accepted.insert(&descriptor.name);
                        }
                        Some(reason) => {
                            tracing::warn!(
                                metric = %descriptor.name,
                                %process,
                                owner = %existing.get().owner,
                                %reason,
                                "stored descriptor conflicts; skipping series"
                            );
                        }
                    }
                }
            }
        }

        for entry in &image.entries {
            let SlotRecord::Series {
                metric,
                labels,
                part,
            } = &entry.record
            else {
                continue;
            };
            if !accepted.contains(metric.as_str()) {
                continue;
            }
            if let Some(family) = self.families.get_mut(metric) {
                family.add(process, live, labels, *part, entry.value, entry.timestamp_ms);
            }
        }
    }

    /// Already merged metric that renders a sample `d` would also render.
    fn sample_clash(&self, d: &MetricDescriptor) -> Option<(String, String)> {
        self.families.values().find_map(|f| {
            f.descriptor
                .collides_with(d)
                .map(|sample| (f.descriptor.name.clone(), sample))
        })
    }

    fn finish(self) -> Vec<MetricFamily> {
        self.families
            .into_values()
            .map(FamilyAcc::finish)
            .filter(|f| !f.samples.is_empty())
            .collect()
    }
}
