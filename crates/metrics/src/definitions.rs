//! Metric name and label definitions.

/// Encrypted vault metrics
pub mod vault {
    /// Total number of entries encrypted and written
    pub const PUTS_TOTAL: &str = "cairn_vault_puts_total";
    /// Total number of entries that failed to decrypt (wrong key or tampering)
    pub const DECRYPT_FAILURES_TOTAL: &str = "cairn_vault_decrypt_failures_total";
}

/// Storage backend metrics
pub mod storage {
    /// Total number of entry rows written, by backend
    pub const WRITES_TOTAL: &str = "cairn_storage_writes_total";
}

/// Replicated map metrics
pub mod replica {
    /// Total number of operations integrated into a replica's log
    pub const OPS_INTEGRATED_TOTAL: &str = "cairn_replica_ops_integrated_total";
    /// Operations held back waiting for a missing predecessor
    pub const PENDING_OPS: &str = "cairn_replica_pending_ops";
    /// Total number of deltas rejected as malformed
    pub const MALFORMED_DELTAS_TOTAL: &str = "cairn_replica_malformed_deltas_total";
}

/// Peer sync metrics
pub mod sync {
    /// Total number of sync rounds run
    pub const ROUNDS_TOTAL: &str = "cairn_sync_rounds_total";
    /// Total number of failed exchanges with a peer
    pub const PEER_FAILURES_TOTAL: &str = "cairn_sync_peer_failures_total";
    /// Duration of a sync round in seconds
    pub const ROUND_DURATION_SECONDS: &str = "cairn_sync_round_duration_seconds";
}

/// Common label keys used across metrics
pub mod labels {
    pub const BACKEND: &str = "backend";
    pub const VAULT: &str = "vault";
}

/// Standard histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Sync round duration buckets (in seconds)
    /// Covers 1ms to 60s
    pub static SYNC_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]
    });
}
