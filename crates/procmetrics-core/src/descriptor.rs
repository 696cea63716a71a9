//! Metric descriptors and label sets.
//!
//! A descriptor is validated and normalized once, at registration. After that
//! it is shared as `Arc<MetricDescriptor>` and never mutated.

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};

/// Latency-oriented default buckets (seconds), used when a histogram is
/// declared without explicit bounds.
pub const DEFAULT_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricKind {
    /// Exposition `# TYPE` token.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

/// How gauge values from several process stores are merged at scrape time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GaugeMode {
    /// Sum over every store, live or orphaned.
    #[default]
    All,
    /// Sum over live stores only.
    LiveSum,
    /// Maximum over live stores.
    LiveMax,
    /// Minimum over live stores.
    LiveMin,
    /// Value with the latest write timestamp, any store.
    MostRecent,
    /// One series per live process, tagged with a `pid` label.
    LiveAll,
}

impl GaugeMode {
    pub fn live_only(self) -> bool {
        matches!(
            self,
            GaugeMode::LiveSum | GaugeMode::LiveMax | GaugeMode::LiveMin | GaugeMode::LiveAll
        )
    }
}

/// Label added to `liveAll` gauges to tell processes apart.
pub const PID_LABEL: &str = "pid";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Finite, strictly increasing upper bounds; `+Inf` is implicit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<f64>,
    #[serde(default)]
    pub mode: GaugeMode,
}

impl MetricDescriptor {
    fn new(name: &str, kind: MetricKind, help: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            help: help.to_string(),
            labels: Vec::new(),
            buckets: Vec::new(),
            mode: GaugeMode::default(),
        }
    }

    pub fn counter(name: &str, help: &str) -> Self {
        Self::new(name, MetricKind::Counter, help)
    }

    pub fn gauge(name: &str, help: &str) -> Self {
        Self::new(name, MetricKind::Gauge, help)
    }

    /// Histogram with explicit bounds; an empty slice selects [`DEFAULT_BUCKETS`].
    pub fn histogram(name: &str, help: &str, buckets: &[f64]) -> Self {
        let mut d = Self::new(name, MetricKind::Histogram, help);
        d.buckets = buckets.to_vec();
        d
    }

    pub fn summary(name: &str, help: &str) -> Self {
        Self::new(name, MetricKind::Summary, help)
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_mode(mut self, mode: GaugeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Validate and normalize (default buckets, trailing `+Inf` dropped).
    pub fn validated(mut self) -> Result<Self> {
        if !valid_metric_name(&self.name) {
            return Err(MetricsError::InvalidDescriptor(format!(
                "invalid metric name: {:?}",
                self.name
            )));
        }

        for (i, label) in self.labels.iter().enumerate() {
            if !valid_label_name(label) {
                return Err(MetricsError::InvalidDescriptor(format!(
                    "{}: invalid label name {:?}",
                    self.name, label
                )));
            }
            if self.labels[..i].contains(label) {
                return Err(MetricsError::InvalidDescriptor(format!(
                    "{}: duplicate label {:?}",
                    self.name, label
                )));
            }
            let reserved = match self.kind {
                MetricKind::Histogram => label == "le",
                MetricKind::Summary => label == "quantile",
                MetricKind::Gauge => self.mode == GaugeMode::LiveAll && label == PID_LABEL,
                MetricKind::Counter => false,
            };
            if reserved {
                return Err(MetricsError::InvalidDescriptor(format!(
                    "{}: label {:?} is reserved for {}",
                    self.name,
                    label,
                    self.kind.as_str()
                )));
            }
        }

        match self.kind {
            MetricKind::Histogram => {
                if self.buckets.last() == Some(&f64::INFINITY) {
                    self.buckets.pop();
                }
                if self.buckets.is_empty() {
                    self.buckets = DEFAULT_BUCKETS.to_vec();
                }
                if self.buckets.iter().any(|b| !b.is_finite()) {
                    return Err(MetricsError::InvalidDescriptor(format!(
                        "{}: buckets must be finite",
                        self.name
                    )));
                }
                if self.buckets.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(MetricsError::InvalidDescriptor(format!(
                        "{}: buckets must be strictly increasing",
                        self.name
                    )));
                }
                if self.buckets.len() > u16::MAX as usize {
                    return Err(MetricsError::InvalidDescriptor(format!(
                        "{}: too many buckets",
                        self.name
                    )));
                }
            }
            _ if !self.buckets.is_empty() => {
                return Err(MetricsError::InvalidDescriptor(format!(
                    "{}: buckets are only valid for histograms",
                    self.name
                )));
            }
            _ => {}
        }

        if self.kind != MetricKind::Gauge {
            self.mode = GaugeMode::default();
        }

        Ok(self)
    }

    /// Describe why `other` cannot share this descriptor's name, if it can't.
    /// Help text is informational and never conflicts.
    pub fn conflict_with(&self, other: &MetricDescriptor) -> Option<String> {
        if self.kind != other.kind {
            return Some(format!(
                "type {} vs {}",
                self.kind.as_str(),
                other.kind.as_str()
            ));
        }
        if self.labels != other.labels {
            return Some(format!("labels {:?} vs {:?}", self.labels, other.labels));
        }
        if self.buckets != other.buckets {
            return Some("histogram buckets differ".into());
        }
        if self.mode != other.mode {
            return Some(format!("gauge mode {:?} vs {:?}", self.mode, other.mode));
        }
        None
    }

    /// Name of a sample that both metrics would render, if any. Two
    /// descriptors with the same name are `conflict_with`'s concern.
    pub fn collides_with(&self, other: &MetricDescriptor) -> Option<String> {
        if self.name == other.name {
            return None;
        }
        let theirs = other.exposed_names();
        self.exposed_names().into_iter().find(|n| theirs.contains(n))
    }

    /// Family name plus every sample name the text format derives from it.
    fn exposed_names(&self) -> Vec<String> {
        let suffixes: &[&str] = match self.kind {
            MetricKind::Counter | MetricKind::Gauge => &[""],
            MetricKind::Histogram => &["", "_bucket", "_sum", "_count"],
            MetricKind::Summary => &["", "_sum", "_count"],
        };
        suffixes.iter().map(|s| format!("{}{s}", self.name)).collect()
    }

    pub(crate) fn check_labels(&self, values: &[&str]) -> Result<()> {
        if values.len() != self.labels.len() {
            return Err(MetricsError::LabelMismatch {
                name: self.name.clone(),
                expected: self.labels.len(),
                got: values.len(),
            });
        }
        Ok(())
    }
}

fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn valid_label_name(name: &str) -> bool {
    if name.starts_with("__") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Ordered label values of one series. Ordering is lexicographic over the
/// values, which is the order samples are exported in.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn new(values: Vec<String>) -> Self {
        Self(values)
    }

    pub fn from_strs(values: &[&str]) -> Self {
        Self(values.iter().map(|v| v.to_string()).collect())
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy with one more value appended.
    pub fn with(&self, value: String) -> Self {
        let mut values = self.0.clone();
        values.push(value);
        Self(values)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn histogram_defaults_and_inf_are_normalized() {
        let d = MetricDescriptor::histogram("lat", "", &[]).validated().unwrap();
        assert_eq!(d.buckets, DEFAULT_BUCKETS.to_vec());

        let d = MetricDescriptor::histogram("lat", "", &[1.0, 2.0, f64::INFINITY])
            .validated()
            .unwrap();
        assert_eq!(d.buckets, vec![1.0, 2.0]);
    }

    #[test]
    fn rejects_bad_names_and_buckets() {
        let bad = [
            MetricDescriptor::counter("9lives", ""),
            MetricDescriptor::counter("ok", "").with_labels(&["__meta"]),
            MetricDescriptor::counter("ok", "").with_labels(&["a", "a"]),
            MetricDescriptor::histogram("h", "", &[1.0]).with_labels(&["le"]),
            MetricDescriptor::summary("s", "").with_labels(&["quantile"]),
            MetricDescriptor::histogram("h", "", &[2.0, 1.0]),
            MetricDescriptor::histogram("h", "", &[f64::NAN]),
        ];
        for d in bad {
            let name = d.name.clone();
            let err = d.validated().expect_err(&name);
            assert_eq!(err.code().as_str(), "INVALID_DESCRIPTOR");
        }
    }

    #[test]
    fn help_text_never_conflicts() {
        let a = MetricDescriptor::counter("c", "one").with_labels(&["x"]);
        let b = MetricDescriptor::counter("c", "two").with_labels(&["x"]);
        assert!(a.conflict_with(&b).is_none());
        let c = MetricDescriptor::gauge("c", "one").with_labels(&["x"]);
        assert!(a.conflict_with(&c).is_some());
    }

    #[test]
    fn derived_sample_names_collide() {
        let lat = MetricDescriptor::histogram("lat", "", &[]);
        assert_eq!(
            lat.collides_with(&MetricDescriptor::counter("lat_count", "")),
            Some("lat_count".to_string())
        );
        assert_eq!(
            MetricDescriptor::gauge("lat_bucket", "").collides_with(&lat),
            Some("lat_bucket".to_string())
        );
        let rpc = MetricDescriptor::summary("rpc", "");
        assert!(rpc.collides_with(&MetricDescriptor::gauge("rpc_sum", "")).is_some());
        // summaries render no buckets
        assert!(rpc.collides_with(&MetricDescriptor::gauge("rpc_bucket", "")).is_none());
        assert!(lat.collides_with(&MetricDescriptor::counter("latency", "")).is_none());
        assert!(lat.collides_with(&MetricDescriptor::counter("lat", "")).is_none());
    }

    #[test]
    fn gauge_mode_uses_camel_case_names() {
        let d: MetricDescriptor =
            serde_json::from_str(r#"{"name":"g","type":"gauge","mode":"liveMax"}"#).unwrap();
        assert_eq!(d.mode, GaugeMode::LiveMax);
        assert!(d.mode.live_only());
    }
}
