//! Processor Registry
//!
//! Maps topics to async closures that perform the processing step. Workers
//! only see the [`EventProcessor`] trait, so the step can be swapped without
//! touching the worker loop.

use crate::backlog::types::EventRecord;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The processing step applied to every claimed event.
///
/// `Ok(())` marks the event `done`; an error marks it `failed` with the error
/// text as reason. Implementations must tolerate being called more than once
/// for the same event after a lease expiry.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: &EventRecord) -> Result<()>;
}

/// Type-erased async processing closure.
pub type ProcessorFn =
    Arc<dyn Fn(EventRecord) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

fn erase<F, Fut>(processor: F) -> ProcessorFn
where
    F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event: EventRecord| {
        Box::pin(processor(event)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
    })
}

/// Topic-keyed dispatch table with an optional catch-all.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: DashMap<String, ProcessorFn>,
    fallback: RwLock<Option<ProcessorFn>>,
}

impl ProcessorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers the processor for one topic, replacing any previous one.
    pub fn register<F, Fut>(&self, topic: &str, processor: F)
    where
        F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.processors.insert(topic.to_string(), erase(processor));

        tracing::info!(topic, "registered event processor");
    }

    /// Processor used for topics without a dedicated one.
    pub fn set_fallback<F, Fut>(&self, processor: F)
    where
        F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        *self.fallback.write() = Some(erase(processor));

        tracing::info!("registered fallback event processor");
    }

    pub fn has_processor(&self, topic: &str) -> bool {
        self.processors.contains_key(topic) || self.fallback.read().is_some()
    }

    /// Number of topic-specific processors, not counting the fallback.
    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn list_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .processors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }

    fn lookup(&self, topic: &str) -> Option<ProcessorFn> {
        // Clone the Arc out so no map guard is held across the await.
        self.processors
            .get(topic)
            .map(|entry| entry.value().clone())
            .or_else(|| self.fallback.read().clone())
    }
}

#[async_trait]
impl EventProcessor for ProcessorRegistry {
    async fn process(&self, event: &EventRecord) -> Result<()> {
        match self.lookup(&event.topic) {
            Some(processor) => processor(event.clone()).await,
            None => Err(anyhow::anyhow!(
                "no processor registered for topic '{}'",
                event.topic
            )),
        }
    }
}
