use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of buffered write operations before an automatic flush.
    pub write_buffer_size: usize,

    /// How long a writer waits for the exclusive store lock before
    /// failing with `LockTimeout`.
    pub lock_timeout: Duration,

    /// Row window applied to queries that set no explicit window.
    pub default_limit: usize,

    /// How many bigram candidates the spell corrector keeps per token
    /// before edit-distance re-ranking.
    pub suggest_candidates: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            write_buffer_size: 1,              // Flush every operation
            lock_timeout: Duration::from_secs(5),
            default_limit: 20,
            suggest_candidates: 15,
        }
    }
}
