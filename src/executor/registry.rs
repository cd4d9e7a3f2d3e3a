//! Task Processor Registry
//!
//! Maps task type tags (e.g. "compute") to the [`TaskProcessor`] that runs them. The
//! registry is consulted only at local-execution time, so every node registers the
//! processors for the types it is willing to run itself.

use super::types::Task;
use crate::error::{ClusterError, Result};
use crate::protocol::Payload;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Pluggable handler for one or more task types.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Runs the task and returns its result map.
    async fn process(&self, task: &Task) -> anyhow::Result<Payload>;

    fn supported_task_types(&self) -> Vec<String>;

    fn estimate_processing_time(&self, task: &Task) -> Duration;
}

/// Registry holding the mapping between task types and their processors.
pub struct ProcessorRegistry {
    processors: DashMap<String, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Binds the processor to every type it supports. A later registration for the
    /// same type replaces the earlier one.
    pub fn register(&self, processor: Arc<dyn TaskProcessor>) -> Vec<String> {
        let types = processor.supported_task_types();

        for task_type in &types {
            self.processors
                .insert(task_type.clone(), Arc::clone(&processor));
            tracing::info!("Registered processor for task type: {}", task_type);
        }

        types
    }

    pub fn resolve(&self, task_type: &str) -> Result<Arc<dyn TaskProcessor>> {
        self.processors
            .get(task_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ClusterError::NoProcessor(task_type.to_string()))
    }

    /// Looks up the processor for the task type and runs it on the current task.
    pub async fn execute(&self, task: &Task) -> Result<Payload> {
        let processor = self.resolve(&task.task_type)?;

        tracing::debug!(
            "Executing task {} (type: {}, estimate: {:?})",
            task.id,
            task.task_type,
            processor.estimate_processing_time(task)
        );

        processor
            .process(task)
            .await
            .map_err(|e| ClusterError::Processor(format!("{e:#}")))
    }

    /// Registered task types, sorted.
    pub fn supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .processors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        types.sort();
        types
    }

    pub fn has_processor(&self, task_type: &str) -> bool {
        self.processors.contains_key(task_type)
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self {
            processors: DashMap::new(),
        }
    }
}
