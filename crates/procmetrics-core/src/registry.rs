//! Per-process metric catalog.
//!
//! Registration only touches memory. Store files learn about a descriptor the
//! first time one of its series is recorded.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::descriptor::MetricDescriptor;
use crate::error::{MetricsError, Result};

#[derive(Default)]
pub struct MetricRegistry {
    descriptors: DashMap<String, Arc<MetricDescriptor>>,
    /// Serializes registration so sample-name checks see every prior entry.
    registering: Mutex<()>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a descriptor.
    ///
    /// Re-registering a compatible descriptor returns the existing entry.
    /// Reusing a name with another type, label schema, bucket layout or
    /// gauge mode fails with `SchemaConflict`, as does a name that would
    /// render a sample another metric already renders (`lat_count` next to
    /// histogram `lat`).
    pub fn register(&self, descriptor: MetricDescriptor) -> Result<Arc<MetricDescriptor>> {
        let descriptor = descriptor.validated()?;
        let _registering = self
            .registering
            .lock()
            .map_err(|_| MetricsError::Internal("registry lock poisoned".into()))?;

        if let Some(existing) = self.descriptors.get(&descriptor.name) {
            if let Some(reason) = existing.conflict_with(&descriptor) {
                return Err(MetricsError::SchemaConflict {
                    name: descriptor.name,
                    reason,
                });
            }
            return Ok(Arc::clone(existing.value()));
        }

        let clash = self.descriptors.iter().find_map(|other| {
            other
                .collides_with(&descriptor)
                .map(|sample| format!("sample {sample} is already rendered by {}", other.name))
        });
        if let Some(reason) = clash {
            return Err(MetricsError::SchemaConflict {
                name: descriptor.name,
                reason,
            });
        }

        tracing::debug!(
            metric = %descriptor.name,
            kind = descriptor.kind.as_str(),
            "metric registered"
        );
        let descriptor = Arc::new(descriptor);
        self.descriptors
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<MetricDescriptor>> {
        self.descriptors
            .get(name)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| MetricsError::NotFound(name.to_string()))
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<Arc<MetricDescriptor>> {
        let mut out: Vec<_> = self.descriptors.iter().map(|d| Arc::clone(d.value())).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
