//! Merged, point-in-time view produced by a scrape. Never persisted.

use std::path::PathBuf;

use crate::descriptor::{LabelSet, MetricDescriptor};

#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Scalar(f64),
    /// `buckets` holds (upper bound, cumulative count); `count` is the `+Inf` bucket.
    Histogram {
        buckets: Vec<(f64, f64)>,
        count: f64,
        sum: f64,
    },
    Summary {
        count: f64,
        sum: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: LabelSet,
    pub value: SampleValue,
}

/// All samples of one metric, sorted by label set.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub descriptor: MetricDescriptor,
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedSnapshot {
    /// Sorted by metric name.
    pub families: Vec<MetricFamily>,
    /// Store files that could not be decoded.
    pub skipped: Vec<PathBuf>,
    /// Orphaned store files deleted after this scrape merged them.
    pub reaped: Vec<PathBuf>,
}

impl AggregatedSnapshot {
    pub fn family(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|f| f.descriptor.name == name)
    }

    pub fn value(&self, name: &str, labels: &[&str]) -> Option<&SampleValue> {
        let key = LabelSet::from_strs(labels);
        self.family(name)?
            .samples
            .iter()
            .find(|s| s.labels == key)
            .map(|s| &s.value)
    }

    /// Counter or gauge value of one series.
    pub fn scalar(&self, name: &str, labels: &[&str]) -> Option<f64> {
        match self.value(name, labels)? {
            SampleValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }
}
