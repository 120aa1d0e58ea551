//! Metrics and observability utilities
//!
//! Provides metrics-rs instrumentation with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all JuriSearch metrics
pub const METRICS_PREFIX: &str = "jurisearch";

/// SLO-aligned histogram buckets for search latency (in seconds)
/// Targets: P50 < 50ms, P99 < 250ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms - P50 target
    0.100, // 100ms
    0.250, // 250ms - P99 target
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
];

/// Buckets for embedding and index-build latency (typically slower)
pub const SLOW_PATH_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Search query latency in seconds"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of candidates returned from search"
    );

    describe_counter!(
        format!("{}_search_degraded_total", METRICS_PREFIX),
        Unit::Count,
        "Searches that lost a source (embedding, shard, or reranker)"
    );

    // Index metrics
    describe_counter!(
        format!("{}_index_builds_total", METRICS_PREFIX),
        Unit::Count,
        "Total lexical index builds"
    );

    describe_histogram!(
        format!("{}_index_build_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Lexical index build latency in seconds"
    );

    describe_gauge!(
        format!("{}_index_documents", METRICS_PREFIX),
        Unit::Count,
        "Documents in the most recently built index per shard"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    describe_gauge!(
        format!("{}_embedding_batch_size", METRICS_PREFIX),
        Unit::Count,
        "Texts per embedding request"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total index cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total index cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, result_count: usize, reranked: bool) {
    let reranked = if reranked { "true" } else { "false" };

    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "reranked" => reranked
    )
    .increment(1);

    histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        "reranked" => reranked
    )
    .record(duration_secs);

    gauge!(format!("{}_search_results_count", METRICS_PREFIX)).set(result_count as f64);
}

/// Helper to record a lost source within a search
pub fn record_degraded(source: &str) {
    counter!(
        format!("{}_search_degraded_total", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .increment(1);
}

/// Helper to record index build metrics
pub fn record_index_build(shard: &str, duration_secs: f64, doc_count: usize) {
    counter!(
        format!("{}_index_builds_total", METRICS_PREFIX),
        "shard" => shard.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_index_build_duration_seconds", METRICS_PREFIX),
        "shard" => shard.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_index_documents", METRICS_PREFIX),
        "shard" => shard.to_string()
    )
    .set(doc_count as f64);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);

        gauge!(
            format!("{}_embedding_batch_size", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .set(batch_size as f64);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        // Verify buckets are sorted and contain SLO targets
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        // P50 target (50ms) should be in buckets
        assert!(LATENCY_BUCKETS.contains(&0.050));
        // P99 target (250ms) should be in buckets
        assert!(LATENCY_BUCKETS.contains(&0.250));
    }

    #[test]
    fn test_record_helpers_run() {
        record_search(0.042, 7, true);
        record_degraded("embedding");
        record_index_build("general", 0.8, 1200);
        record_embedding(0.3, "text-embedding-3-small", 1, true);
        record_cache(true, "index");
        // Just verify they run without panic against the default recorder
    }
}
