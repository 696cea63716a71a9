#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::path::PathBuf;

use procmetrics_core::{GaugeMode, MetricKind};
use procmetrics_gateway::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
storage:
  dir: /tmp/metrics
server:
  listen: "0.0.0.0:9090"
  scrape_timout_ms: 100 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "INVALID_CONFIG");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
storage:
  dir: /var/run/app-metrics
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.server.listen, "0.0.0.0:9090");
    assert_eq!(cfg.server.scrape_timeout_ms, 5000);
    assert_eq!(cfg.reaper.interval_ms, 30000);
    assert_eq!(cfg.reaper.grace(), std::time::Duration::from_secs(120));
    assert_eq!(cfg.service.namespace, "app");
    assert_eq!(cfg.service.build.git_sha, "no-release");
    assert!(cfg.metrics.is_empty());
    assert_eq!(
        cfg.storage.resolve_dir(None).unwrap(),
        PathBuf::from("/var/run/app-metrics")
    );
}

#[test]
fn env_dir_overrides_and_can_stand_in_for_the_file() {
    let cfg = config::load_from_str("version: 1\n").unwrap();
    assert_eq!(
        cfg.storage.resolve_dir(None).unwrap_err().code().as_str(),
        "INVALID_CONFIG"
    );
    assert_eq!(
        cfg.storage.resolve_dir(Some("/srv/m".into())).unwrap(),
        PathBuf::from("/srv/m")
    );
    // empty env value is ignored
    assert!(cfg.storage.resolve_dir(Some(String::new())).is_err());
}

#[test]
fn unsupported_version_rejected() {
    let err = config::load_from_str("version: 2\n").unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_CONFIG");
    assert!(err.is_fatal());
}

#[test]
fn ranges_are_checked() {
    for bad in [
        "version: 1\nserver: { scrape_timeout_ms: 50 }\n",
        "version: 1\nserver: { listen: \"not-an-addr\" }\n",
        "version: 1\nreaper: { interval_ms: 10 }\n",
        "version: 1\nreaper: { grace_ms: 90000000 }\n",
        "version: 1\nservice: { namespace: \"9lives\" }\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.code().as_str(), "INVALID_CONFIG", "{bad}");
    }

    let off = config::load_from_str("version: 1\nreaper: { interval_ms: 0 }\n").unwrap();
    assert!(off.reaper.interval().is_none());

    let eager = config::load_from_str("version: 1\nreaper: { grace_ms: 0 }\n").unwrap();
    assert!(eager.reaper.grace().is_zero());
}

#[test]
fn metric_descriptors_parse_and_validate() {
    let ok = r#"
version: 1
service:
  namespace: immuni
  build:
    git_sha: 0123456789abcdef
    git_tag: v1.2.3
metrics:
  - name: uploads_total
    type: counter
    help: Uploads received.
    labels: [platform]
  - name: pending_jobs
    type: gauge
    mode: liveSum
  - name: upload_seconds
    type: histogram
    buckets: [0.1, 1.0, .inf]
"#;
    let cfg = config::load_from_str(ok).unwrap();
    assert_eq!(cfg.service.build.git_short_sha(), "0123456");
    assert_eq!(cfg.service.build.git_branch, "no-release");
    assert_eq!(cfg.metrics.len(), 3);
    assert_eq!(cfg.metrics[0].kind, MetricKind::Counter);
    assert_eq!(cfg.metrics[1].mode, GaugeMode::LiveSum);

    let bad_buckets = r#"
version: 1
metrics:
  - name: upload_seconds
    type: histogram
    buckets: [1.0, 0.5]
"#;
    let err = config::load_from_str(bad_buckets).unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_CONFIG");
    assert!(err.to_string().contains("metrics[0]"), "{err}");

    let dup = r#"
version: 1
metrics:
  - { name: jobs, type: counter }
  - { name: jobs, type: gauge }
"#;
    assert!(config::load_from_str(dup).is_err());

    let unknown_key = r#"
version: 1
metrics:
  - { name: jobs, type: counter, lables: [a] }
"#;
    assert!(config::load_from_str(unknown_key).is_err());
}
