use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Sink for pipeline measurements. Implementations must not block.
pub trait MetricsReporter: Send + Sync {
    fn report_scrape_provider_completed(&self, provider: &str, elapsed: Duration);

    fn report_scrape_region_completed(&self, provider: &str, service: &str, region: &str, elapsed: Duration);

    fn report_scrape_failure(&self, provider: &str, service: &str, region: &str);

    fn report_scrape_short_lived_provider_completed(&self, provider: &str, elapsed: Duration);

    fn report_scrape_short_lived_region_completed(&self, provider: &str, region: &str, elapsed: Duration);

    fn report_scrape_short_lived_failure(&self, provider: &str, region: &str);

    fn report_on_demand_price(&self, provider: &str, region: &str, instance_type: &str, price: f64);

    fn report_spot_price(&self, provider: &str, region: &str, zone: &str, instance_type: &str, price: f64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpReporter;

impl MetricsReporter for NoOpReporter {
    fn report_scrape_provider_completed(&self, _: &str, _: Duration) {}
    fn report_scrape_region_completed(&self, _: &str, _: &str, _: &str, _: Duration) {}
    fn report_scrape_failure(&self, _: &str, _: &str, _: &str) {}
    fn report_scrape_short_lived_provider_completed(&self, _: &str, _: Duration) {}
    fn report_scrape_short_lived_region_completed(&self, _: &str, _: &str, _: Duration) {}
    fn report_scrape_short_lived_failure(&self, _: &str, _: &str) {}
    fn report_on_demand_price(&self, _: &str, _: &str, _: &str, _: f64) {}
    fn report_spot_price(&self, _: &str, _: &str, _: &str, _: &str, _: f64) {}
}

/// Prometheus collectors, registered once on an explicit registry.
#[derive(Clone)]
pub struct PrometheusReporter {
    complete_duration: GaugeVec,
    region_duration: GaugeVec,
    failures: CounterVec,
    short_lived_complete_duration: GaugeVec,
    short_lived_region_duration: GaugeVec,
    short_lived_failures: CounterVec,
    on_demand_price: GaugeVec,
    spot_price: GaugeVec,
}

impl PrometheusReporter {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let reporter = Self {
            complete_duration: GaugeVec::new(
                Opts::new("scrape_complete_duration_seconds", "Cloud provider scrape complete duration in seconds"),
                &["provider"],
            )?,
            region_duration: GaugeVec::new(
                Opts::new("scrape_region_duration_seconds", "Cloud provider scrape region duration in seconds"),
                &["provider", "service", "region"],
            )?,
            failures: CounterVec::new(
                Opts::new("scrape_failures_total", "Total number of scrape failures, partitioned by provider and region"),
                &["provider", "service", "region"],
            )?,
            short_lived_complete_duration: GaugeVec::new(
                Opts::new(
                    "scrape_short_lived_complete_duration_seconds",
                    "Cloud provider short lived scrape complete duration in seconds",
                ),
                &["provider"],
            )?,
            short_lived_region_duration: GaugeVec::new(
                Opts::new(
                    "scrape_short_lived_region_duration_seconds",
                    "Cloud provider short lived scrape region duration in seconds",
                ),
                &["provider", "region"],
            )?,
            short_lived_failures: CounterVec::new(
                Opts::new(
                    "scrape_short_lived_failures_total",
                    "Total number of short lived scrape failures, partitioned by provider and region",
                ),
                &["provider", "region"],
            )?,
            on_demand_price: GaugeVec::new(
                Opts::new("cloudinfo_on_demand_price", "On demand price for each instance type"),
                &["provider", "region", "instanceType"],
            )?,
            spot_price: GaugeVec::new(
                Opts::new("cloudinfo_spot_price", "Spot price for each instance type per zone"),
                &["provider", "region", "zone", "instanceType"],
            )?,
        };

        registry.register(Box::new(reporter.complete_duration.clone()))?;
        registry.register(Box::new(reporter.region_duration.clone()))?;
        registry.register(Box::new(reporter.failures.clone()))?;
        registry.register(Box::new(reporter.short_lived_complete_duration.clone()))?;
        registry.register(Box::new(reporter.short_lived_region_duration.clone()))?;
        registry.register(Box::new(reporter.short_lived_failures.clone()))?;
        registry.register(Box::new(reporter.on_demand_price.clone()))?;
        registry.register(Box::new(reporter.spot_price.clone()))?;

        Ok(reporter)
    }
}

impl MetricsReporter for PrometheusReporter {
    fn report_scrape_provider_completed(&self, provider: &str, elapsed: Duration) {
        self.complete_duration
            .with_label_values(&[provider])
            .set(elapsed.as_secs_f64());
    }

    fn report_scrape_region_completed(&self, provider: &str, service: &str, region: &str, elapsed: Duration) {
        self.region_duration
            .with_label_values(&[provider, service, region])
            .set(elapsed.as_secs_f64());
    }

    fn report_scrape_failure(&self, provider: &str, service: &str, region: &str) {
        self.failures.with_label_values(&[provider, service, region]).inc();
    }

    fn report_scrape_short_lived_provider_completed(&self, provider: &str, elapsed: Duration) {
        self.short_lived_complete_duration
            .with_label_values(&[provider])
            .set(elapsed.as_secs_f64());
    }

    fn report_scrape_short_lived_region_completed(&self, provider: &str, region: &str, elapsed: Duration) {
        self.short_lived_region_duration
            .with_label_values(&[provider, region])
            .set(elapsed.as_secs_f64());
    }

    fn report_scrape_short_lived_failure(&self, provider: &str, region: &str) {
        self.short_lived_failures.with_label_values(&[provider, region]).inc();
    }

    fn report_on_demand_price(&self, provider: &str, region: &str, instance_type: &str, price: f64) {
        self.on_demand_price
            .with_label_values(&[provider, region, instance_type])
            .set(price);
    }

    fn report_spot_price(&self, provider: &str, region: &str, zone: &str, instance_type: &str, price: f64) {
        self.spot_price
            .with_label_values(&[provider, region, zone, instance_type])
            .set(price);
    }
}

/// Prometheus text exposition of everything in `registry`.
pub fn encode_text(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("metrics are not utf-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_and_prices_are_labelled() {
        let registry = Registry::new();
        let reporter = PrometheusReporter::new(&registry).unwrap();

        reporter.report_scrape_failure("amazon", "compute", "eu-west-1");
        reporter.report_scrape_failure("amazon", "compute", "eu-west-1");
        reporter.report_on_demand_price("amazon", "eu-west-1", "m5.large", 0.096);
        reporter.report_spot_price("amazon", "eu-west-1", "eu-west-1a", "m5.large", 0.03);
        reporter.report_scrape_provider_completed("amazon", Duration::from_millis(1500));

        assert_eq!(
            reporter
                .failures
                .with_label_values(&["amazon", "compute", "eu-west-1"])
                .get(),
            2.0
        );
        assert_eq!(reporter.complete_duration.with_label_values(&["amazon"]).get(), 1.5);

        let text = encode_text(&registry).unwrap();
        let failures = text
            .lines()
            .find(|l| l.starts_with("scrape_failures_total{"))
            .unwrap();
        assert!(failures.contains("service=\"compute\""));
        assert!(failures.ends_with(" 2"));
        assert!(text.contains("instanceType=\"m5.large\""));
        assert!(text.contains("cloudinfo_spot_price{"));
    }

    #[test]
    fn registering_twice_on_one_registry_fails() {
        let registry = Registry::new();
        assert!(PrometheusReporter::new(&registry).is_ok());
        assert!(PrometheusReporter::new(&registry).is_err());
    }
}
