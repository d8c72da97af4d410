use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub carrier_requests_total: IntCounterVec,
    pub parcels_created_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Carrier assignments by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of the carrier assignment transaction in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let carrier_requests_total = IntCounterVec::new(
            Opts::new("carrier_requests_total", "Submitted carrier requests by outcome"),
            &["outcome"],
        )
        .expect("valid carrier_requests_total metric");

        let parcels_created_total =
            IntCounter::new("parcels_created_total", "Parcels created since start")
                .expect("valid parcels_created_total metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(carrier_requests_total.clone()))
            .expect("register carrier_requests_total");
        registry
            .register(Box::new(parcels_created_total.clone()))
            .expect("register parcels_created_total");

        Self {
            registry,
            assignments_total,
            assignment_latency_seconds,
            carrier_requests_total,
            parcels_created_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
