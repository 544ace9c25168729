use std::time::Duration;

/// Tuning knobs of one worker pool.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Prefix of every lease token minted by this process.
    pub instance: String,
    /// Number of concurrent worker loops. Zero makes an ingest-only instance.
    pub workers: usize,
    /// Largest number of rows one claim may take.
    pub batch_size: usize,
    /// Idle sleep after an empty claim or a store error.
    pub poll_interval: Duration,
    /// How long a claim stays valid without renewal.
    pub lease_duration: Duration,
    /// Cadence of the expired-lease sweep.
    pub reclaim_interval: Duration,
}

impl ExecutorConfig {
    /// Cadence of the lease heartbeat while a batch is in flight.
    pub fn renew_interval(&self) -> Duration {
        (self.lease_duration / 3).max(Duration::from_millis(1))
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            workers: 4,
            batch_size: 200,
            poll_interval: Duration::from_millis(50),
            lease_duration: Duration::from_secs(300),
            reclaim_interval: Duration::from_secs(1),
        }
    }
}

/// Short random name for this process, used in lease tokens and logs.
pub fn default_instance() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("agg-{}", &id[..8])
}
