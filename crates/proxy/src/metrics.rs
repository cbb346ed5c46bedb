use prometheus::{IntCounterVec, Opts, Registry};

/// `(proto, outcome)` counters for every forwarded request, as named in §4.5.
#[derive(Clone)]
pub struct ProxyMetrics {
    counter: IntCounterVec,
}

impl ProxyMetrics {
    pub fn new(registry: &Registry) -> Self {
        let counter = IntCounterVec::new(
            Opts::new("proxy_requests_total", "Forwarded proxy requests"),
            &["proto", "outcome"],
        )
        .expect("static metric declaration is valid");
        registry
            .register(Box::new(counter.clone()))
            .expect("metric registered exactly once");
        ProxyMetrics { counter }
    }

    pub fn record(&self, proto: &str, outcome: &str) {
        self.counter.with_label_values(&[proto, outcome]).inc();
    }
}
