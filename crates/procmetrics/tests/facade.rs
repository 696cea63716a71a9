#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use procmetrics::{
    expose, gateway, Aggregator, LifecycleManager, MetricDescriptor, MetricRegistry, Role,
};

#[test]
fn record_and_scrape_through_the_facade() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MetricRegistry::new();
    registry
        .register(MetricDescriptor::counter("emails_sent_total", "Emails sent."))
        .unwrap();

    let lifecycle = LifecycleManager::new(dir.path(), Arc::new(registry));
    let store = lifecycle.on_start(Role::Worker).unwrap();
    store.increment("emails_sent_total", &[], 4.0).unwrap();

    let text = expose::render(&Aggregator::new(dir.path()).scrape().unwrap());
    assert!(text.contains("emails_sent_total 4\n"), "{text}");

    lifecycle.on_stop(&store);
    assert!(Aggregator::new(dir.path()).scrape().unwrap().families.is_empty());
}

#[test]
fn gateway_config_is_reachable() {
    let cfg = gateway::config::load_from_str("version: 1\nservice: { namespace: mail }\n").unwrap();
    assert_eq!(cfg.service.namespace, "mail");
}
