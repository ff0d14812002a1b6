//! The job types this service runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::job::Job;

pub mod gdpr;
pub mod replication;

pub use self::gdpr::{AuditLogsCleanup, GdprParams};
pub use self::replication::{ReplicationJob, ReplicationParams};

/// Jobs known to the service, looked up by [Job::name].
#[derive(Debug, Clone, Default)]
pub struct JobCatalog {
    jobs: BTreeMap<&'static str, Arc<dyn Job>>,
}

impl JobCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job, replacing any earlier job with the same name.
    pub fn insert(&mut self, job: Arc<dyn Job>) -> &mut Self {
        self.jobs.insert(job.name(), job);
        self
    }

    /// The job named `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).cloned()
    }

    /// Names of every job, in order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.jobs.keys().copied()
    }
}
