use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntGauge;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::warn;


lazy_static! {
    pub static ref FLUSH_TOTAL: IntCounter =
        IntCounter::new("range_watch_flush_total", "Flush calls routed")
            .expect("metric can not be created");

    pub static ref FLUSH_MATCHES_TOTAL: IntCounter = IntCounter::new(
        "range_watch_flush_matches_total",
        "Watches matched across all flush calls"
    )
    .expect("metric can not be created");

    pub static ref DROPPED_TOTAL: IntCounter = IntCounter::new(
        "range_watch_dropped_total",
        "Values discarded because a watch queue was full"
    )
    .expect("metric can not be created");

    pub static ref DELIVERED_TOTAL: IntCounter =
        IntCounter::new("range_watch_delivered_total", "Values handed to the guest")
            .expect("metric can not be created");

    pub static ref DELIVERY_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "range_watch_delivery_errors_total",
        "Receive callbacks that trapped or returned an error"
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WATCHES: IntGauge =
        IntGauge::new("range_watch_active_watches", "Watches currently registered")
            .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry);
        registry
    };
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(FLUSH_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(FLUSH_MATCHES_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(DROPPED_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(DELIVERED_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(DELIVERY_ERRORS_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ACTIVE_WATCHES.clone()))
        .expect("collector can be registered");
}

/// Renders all collectors in the prometheus text format.
pub fn gather() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
