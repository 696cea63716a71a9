//! Prometheus text exposition format (0.0.4).

use std::fmt::Write;

use crate::descriptor::{LabelSet, MetricKind};
use crate::snapshot::{AggregatedSnapshot, MetricFamily, SampleValue};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Shortest decimal that parses back to the same `f64`.
pub fn format_value(v: f64) -> String {
    if v.is_nan() {
        return "NaN".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "+Inf".into() } else { "-Inf".into() };
    }
    let abs = v.abs();
    if abs == 0.0 || (1e-4..1e16).contains(&abs) {
        format!("{v}")
    } else {
        format!("{v:e}")
    }
}

fn label_pairs(names: &[String], values: &LabelSet) -> Vec<String> {
    names
        .iter()
        .zip(values.values())
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect()
}

fn write_line(out: &mut String, name: &str, pairs: &[String], value: f64) {
    if pairs.is_empty() {
        let _ = writeln!(out, "{} {}", name, format_value(value));
    } else {
        let _ = writeln!(out, "{}{{{}}} {}", name, pairs.join(","), format_value(value));
    }
}

fn render_family(family: &MetricFamily, out: &mut String) {
    let d = &family.descriptor;
    if d.help.is_empty() {
        let _ = writeln!(out, "# HELP {}", d.name);
    } else {
        let _ = writeln!(out, "# HELP {} {}", d.name, escape_help(&d.help));
    }
    let _ = writeln!(out, "# TYPE {} {}", d.name, d.kind.as_str());

    for sample in &family.samples {
        let pairs = label_pairs(&d.labels, &sample.labels);
        match (&sample.value, d.kind) {
            (SampleValue::Scalar(v), MetricKind::Counter | MetricKind::Gauge) => {
                write_line(out, &d.name, &pairs, *v);
            }
            (
                SampleValue::Histogram {
                    buckets,
                    count,
                    sum,
                },
                MetricKind::Histogram,
            ) => {
                let bucket_name = format!("{}_bucket", d.name);
                for (le, n) in buckets {
                    let mut with_le = pairs.clone();
                    with_le.push(format!("le=\"{}\"", format_value(*le)));
                    write_line(out, &bucket_name, &with_le, *n);
                }
                let mut with_inf = pairs.clone();
                with_inf.push("le=\"+Inf\"".to_string());
                write_line(out, &bucket_name, &with_inf, *count);
                write_line(out, &format!("{}_sum", d.name), &pairs, *sum);
                write_line(out, &format!("{}_count", d.name), &pairs, *count);
            }
            (SampleValue::Summary { count, sum }, MetricKind::Summary) => {
                write_line(out, &format!("{}_sum", d.name), &pairs, *sum);
                write_line(out, &format!("{}_count", d.name), &pairs, *count);
            }
            _ => {
                tracing::warn!(metric = %d.name, "sample does not match metric type; not rendered");
            }
        }
    }
}

/// Render a snapshot. Families and samples are already sorted, so equal
/// snapshots render byte-identically.
pub fn render(snapshot: &AggregatedSnapshot) -> String {
    let mut out = String::new();
    for family in &snapshot.families {
        render_family(family, &mut out);
    }
    out
}
