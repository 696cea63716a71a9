#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use procmetrics_core::{
    expose, Aggregator, GaugeMode, Liveness, LocalMetricStore, MetricDescriptor, MetricRegistry,
    ProcessId, Role,
};

mod exposition_reader;

struct AllAlive;

impl Liveness for AllAlive {
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

#[test]
fn rendered_scrape_parses_back_to_the_same_samples() {
    let dir = tempfile::tempdir().unwrap();
    let reg = MetricRegistry::new();
    reg.register(
        MetricDescriptor::counter("http_requests_total", "Requests \\ by path.")
            .with_labels(&["path", "method"]),
    )
    .unwrap();
    reg.register(
        MetricDescriptor::gauge("temperature_celsius", "Sensor reading.\nLast value wins.")
            .with_labels(&["sensor"])
            .with_mode(GaugeMode::MostRecent),
    )
    .unwrap();
    reg.register(
        MetricDescriptor::histogram("upload_bytes", "Upload sizes.", &[1024.0, 1048576.0])
            .with_labels(&["kind"]),
    )
    .unwrap();
    reg.register(MetricDescriptor::summary("gc_seconds", "GC pauses."))
        .unwrap();
    let reg = Arc::new(reg);

    let a = LocalMetricStore::create(dir.path(), ProcessId::new(300, Role::Api), Arc::clone(&reg))
        .unwrap();
    let b =
        LocalMetricStore::create(dir.path(), ProcessId::new(301, Role::Worker), Arc::clone(&reg))
            .unwrap();

    let odd_path = "/v1/\"quoted\"\\back\nslash";
    a.increment("http_requests_total", &[odd_path, "GET"], 2.0).unwrap();
    b.increment("http_requests_total", &[odd_path, "GET"], 3.0).unwrap();
    a.increment("http_requests_total", &["/health", "HEAD"], 1.0).unwrap();
    a.set("temperature_celsius", &["outdoor"], -12.5).unwrap();
    a.set("temperature_celsius", &["core"], f64::INFINITY).unwrap();
    b.observe("upload_bytes", &["image"], 4096.0).unwrap();
    b.observe("upload_bytes", &["image"], 512.0).unwrap();
    a.observe("gc_seconds", &[], 0.125).unwrap();
    b.observe("gc_seconds", &[], 0.5).unwrap();

    let snapshot = Aggregator::new(dir.path())
        .with_liveness(Arc::new(AllAlive))
        .scrape()
        .unwrap();
    let text = expose::render(&snapshot);
    let parsed = exposition_reader::parse(&text);

    assert_eq!(
        parsed.help.get("http_requests_total").map(String::as_str),
        Some("Requests \\ by path.")
    );
    assert_eq!(
        parsed.help.get("temperature_celsius").map(String::as_str),
        Some("Sensor reading.\nLast value wins.")
    );
    for (name, ty) in [
        ("gc_seconds", "summary"),
        ("http_requests_total", "counter"),
        ("temperature_celsius", "gauge"),
        ("upload_bytes", "histogram"),
    ] {
        assert_eq!(parsed.types.get(name).map(String::as_str), Some(ty), "{name}");
    }

    let expected: Vec<(&str, Vec<(&str, &str)>, f64)> = vec![
        ("gc_seconds_sum", vec![], 0.625),
        ("gc_seconds_count", vec![], 2.0),
        ("http_requests_total", vec![("path", "/health"), ("method", "HEAD")], 1.0),
        ("http_requests_total", vec![("path", odd_path), ("method", "GET")], 5.0),
        ("temperature_celsius", vec![("sensor", "core")], f64::INFINITY),
        ("temperature_celsius", vec![("sensor", "outdoor")], -12.5),
        ("upload_bytes_bucket", vec![("kind", "image"), ("le", "1024")], 1.0),
        ("upload_bytes_bucket", vec![("kind", "image"), ("le", "1048576")], 2.0),
        ("upload_bytes_bucket", vec![("kind", "image"), ("le", "+Inf")], 2.0),
        ("upload_bytes_sum", vec![("kind", "image")], 4608.0),
        ("upload_bytes_count", vec![("kind", "image")], 2.0),
    ];

    let got: Vec<(String, Vec<(String, String)>, f64)> = parsed
        .samples
        .iter()
        .map(|s| (s.name.clone(), s.labels.clone(), s.value))
        .collect();
    let want: Vec<(String, Vec<(String, String)>, f64)> = expected
        .into_iter()
        .map(|(n, l, v)| {
            (
                n.to_string(),
                l.into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                v,
            )
        })
        .collect();
    assert_eq!(got, want, "rendered:\n{text}");
}
