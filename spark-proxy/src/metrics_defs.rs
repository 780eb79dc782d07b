use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Monitor request duration in seconds. Tagged with route and status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const UPSTREAM_ERRORS: MetricDef = MetricDef {
    name: "upstream.errors",
    metric_type: MetricType::Counter,
    description: "Requests answered with a server-side error envelope. Tagged with route.",
};

pub const IDENTITY_CACHE_HIT: MetricDef = MetricDef {
    name: "identity_cache.hit",
    metric_type: MetricType::Counter,
    description: "Session tokens resolved from the identity cache",
};

pub const IDENTITY_CACHE_MISS: MetricDef = MetricDef {
    name: "identity_cache.miss",
    metric_type: MetricType::Counter,
    description: "Session tokens validated against the auth service",
};

pub const SESSION_CACHE_HIT: MetricDef = MetricDef {
    name: "session_cache.hit",
    metric_type: MetricType::Counter,
    description: "Active application ids served from the session cache",
};

pub const SESSION_CACHE_MISS: MetricDef = MetricDef {
    name: "session_cache.miss",
    metric_type: MetricType::Counter,
    description: "Active application lookups sent to a Spark master",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    UPSTREAM_ERRORS,
    IDENTITY_CACHE_HIT,
    IDENTITY_CACHE_MISS,
    SESSION_CACHE_HIT,
    SESSION_CACHE_MISS,
];
