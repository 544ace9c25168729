//! Load generator for the aggregator.
//!
//! Publishes `COUNT` events in batches, reusing ids from a base pool for a
//! `DUP_RATE` fraction of them, and prints the totals the aggregator reported.

use pubsub_aggregator::backlog::types::IngestSummary;
use pubsub_aggregator::ingestion::types::EventInput;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

const PUBLISH_ATTEMPTS: usize = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct PublisherConfig {
    target_url: String,
    count: usize,
    dup_rate: f64,
    concurrency: usize,
    topics: Vec<String>,
    batch_size: usize,
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

impl PublisherConfig {
    fn from_env() -> Result<Self> {
        let topics: Vec<String> = std::env::var("TOPICS")
            .unwrap_or_else(|_| "auth,payment,orders".to_string())
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if topics.is_empty() {
            anyhow::bail!("TOPICS must name at least one topic");
        }

        Ok(Self {
            target_url: std::env::var("TARGET_URL")
                .unwrap_or_else(|_| "http://localhost:8080/publish".to_string()),
            count: env_or("COUNT", 20_000)?,
            dup_rate: env_or::<f64>("DUP_RATE", 0.30)?.clamp(0.0, 1.0),
            concurrency: env_or::<usize>("CONCURRENCY", 50)?.max(1),
            topics,
            batch_size: env_or::<usize>("BATCH_SIZE", 100)?.max(1),
        })
    }
}

fn make_event(topics: &[String], event_id: String) -> EventInput {
    let mut rng = rand::thread_rng();
    let topic = topics
        .choose(&mut rng)
        .cloned()
        .unwrap_or_else(|| "default".to_string());

    let mut payload = serde_json::Map::new();
    payload.insert(
        "rand".to_string(),
        serde_json::json!(rng.gen_range(0..10_000_000u64)),
    );

    EventInput {
        topic,
        event_id,
        timestamp: chrono::Utc::now().to_rfc3339(),
        source: "publisher".to_string(),
        payload,
    }
}

/// Builds every event up front: a `dup_rate` share reuses ids from a base pool.
fn build_events(config: &PublisherConfig) -> Vec<EventInput> {
    let base_unique = ((config.count as f64 * (1.0 - config.dup_rate)) as usize).max(1);
    let mut rng = rand::thread_rng();

    (0..config.count)
        .map(|i| {
            let event_id = if rng.gen_bool(config.dup_rate) {
                format!("e-{}", rng.gen_range(0..base_unique))
            } else {
                format!("u-{}-{:08x}", i, rng.gen::<u32>())
            };
            make_event(&config.topics, event_id)
        })
        .collect()
}

async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    batch: &[EventInput],
) -> Result<IngestSummary> {
    let mut delay_ms = 150u64;
    let mut last_error = None;

    for attempt in 0..PUBLISH_ATTEMPTS {
        let result: Result<IngestSummary, reqwest::Error> = async {
            client
                .post(url)
                .json(batch)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?
                .error_for_status()?
                .json::<IngestSummary>()
                .await
        }
        .await;

        match result {
            Ok(summary) => return Ok(summary),
            Err(err) => {
                tracing::debug!(attempt, error = %err, "publish attempt failed");
                last_error = Some(err);
                if attempt + 1 < PUBLISH_ATTEMPTS {
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(2000);
                }
            }
        }
    }

    match last_error {
        Some(err) => Err(anyhow::anyhow!(err).context("publish failed after retries")),
        None => Err(anyhow::anyhow!("retry attempts exhausted")),
    }
}

async fn send_batch(
    semaphore: &Semaphore,
    client: &reqwest::Client,
    url: &str,
    batch: &[EventInput],
) -> Result<IngestSummary> {
    let _permit = semaphore.acquire().await.context("semaphore closed")?;
    post_with_retry(client, url, batch).await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PublisherConfig::from_env()?;
    let events = build_events(&config);

    tracing::info!(
        count = config.count,
        dup_rate = config.dup_rate,
        concurrency = config.concurrency,
        batch_size = config.batch_size,
        "publishing"
    );

    let client = reqwest::Client::new();
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let url = Arc::new(config.target_url.clone());

    let mut handles = Vec::new();
    for chunk in events.chunks(config.batch_size) {
        let batch = chunk.to_vec();
        let client = client.clone();
        let semaphore = semaphore.clone();
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            send_batch(&semaphore, &client, &url, &batch).await
        }));
    }

    let mut totals = IngestSummary::default();
    for handle in handles {
        let summary = handle.await??;
        totals.received += summary.received;
        totals.inserted += summary.inserted;
        totals.duplicates += summary.duplicates;
    }

    let dup_rate = if totals.received == 0 {
        0.0
    } else {
        totals.duplicates as f64 / totals.received as f64 * 100.0
    };

    println!(
        "done received={} inserted={} duplicates={} dup_rate={:.2}%",
        totals.received, totals.inserted, totals.duplicates, dup_rate
    );

    Ok(())
}
