//! JVM heap sizing for search nodes

use k8s_openapi::api::core::v1::ResourceRequirements;

use crate::crd::quantity::quantity_bytes;

/// Heap used when no memory request is declared (128 MiB).
pub const DEFAULT_HEAP_BYTES: i64 = 134_217_728;

/// Highest heap that still allows zero-based compressed oops (26 GiB).
pub const MAX_HEAP_BYTES: i64 = 27_917_287_424;

const HEAP_PERCENT: i64 = 50;

/// Half of the memory request, capped at [`MAX_HEAP_BYTES`].
pub fn heap_bytes(memory_request: i64) -> i64 {
    if memory_request <= 0 {
        return DEFAULT_HEAP_BYTES;
    }
    let heap = memory_request.saturating_mul(HEAP_PERCENT) / 100;
    heap.min(MAX_HEAP_BYTES)
}

/// Memory request of a container, in bytes (0 when absent or unparsable).
pub fn memory_request(resources: Option<&ResourceRequirements>) -> i64 {
    resources
        .and_then(|r| r.requests.as_ref())
        .and_then(|req| req.get("memory"))
        .and_then(quantity_bytes)
        .unwrap_or(0)
}

/// `-Xms`/`-Xmx` pinned to the same value.
pub fn java_opts(heap: i64) -> String {
    format!("-Xms{heap} -Xmx{heap}")
}
