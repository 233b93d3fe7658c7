use metrics::{describe_counter, describe_histogram, Unit};

// Metric names
pub const CHUNKS_SUBMITTED: &str = "distribution_chunks_submitted_total";
pub const CHUNKS_FAILED: &str = "distribution_chunks_failed_total";
pub const RECIPIENTS_SUBMITTED: &str = "distribution_recipients_submitted_total";
pub const CONFIRMATION_SECONDS: &str = "distribution_confirmation_seconds";
pub const CLASSIFIER_CACHE_HITS: &str = "classifier_cache_hits_total";
pub const CLASSIFIER_CACHE_MISSES: &str = "classifier_cache_misses_total";
pub const RPC_CODE_FETCHES: &str = "rpc_code_fetches_total";

/// Register descriptions with whatever recorder the binary installed
pub fn describe_metrics() {
    describe_counter!(CHUNKS_SUBMITTED, "Batch chunks confirmed on chain");
    describe_counter!(CHUNKS_FAILED, "Batch chunks that failed to send or confirm");
    describe_counter!(RECIPIENTS_SUBMITTED, "Recipients included in confirmed chunks");
    describe_histogram!(
        CONFIRMATION_SECONDS,
        Unit::Seconds,
        "Time from sending a chunk to its last required confirmation"
    );
    describe_counter!(CLASSIFIER_CACHE_HITS, "Bytecode lookups served from the cache");
    describe_counter!(CLASSIFIER_CACHE_MISSES, "Bytecode lookups that needed an RPC call");
    describe_counter!(RPC_CODE_FETCHES, "eth_getCode requests issued");
}
