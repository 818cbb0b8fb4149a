use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Label, Unit};

pub(crate) mod measure_execution_time;

#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display)]
pub(crate) enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

pub(crate) struct StaticMetric {
    pub(crate) metric_name: &'static str,
    unit: Unit,
    description: &'static str,
    metric_type: MetricType,
}

impl StaticMetric {
    fn describe(&self) {
        match self.metric_type {
            MetricType::Counter => describe_counter!(self.metric_name, self.unit, self.description),
            MetricType::Gauge => describe_gauge!(self.metric_name, self.unit, self.description),
            MetricType::Histogram => describe_histogram!(self.metric_name, self.unit, self.description),
        }
    }

    fn labels<L>(labels: impl IntoIterator<Item = L>) -> Vec<Label>
    where
        Label: From<L>,
    {
        labels.into_iter().map(Label::from).collect()
    }

    pub(crate) fn increment<L>(&self, value: u64, labels: impl IntoIterator<Item = L>)
    where
        Label: From<L>,
    {
        debug_assert_eq!(self.metric_type, MetricType::Counter, "{}", self.metric_name);
        counter!(self.metric_name, Self::labels(labels)).increment(value);
    }

    pub(crate) fn adjust<L>(&self, delta: f64, labels: impl IntoIterator<Item = L>)
    where
        Label: From<L>,
    {
        debug_assert_eq!(self.metric_type, MetricType::Gauge, "{}", self.metric_name);
        gauge!(self.metric_name, Self::labels(labels)).increment(delta);
    }

    pub(crate) fn histogram<L>(&self, value: f64, labels: impl IntoIterator<Item = L>)
    where
        Label: From<L>,
    {
        debug_assert_eq!(self.metric_type, MetricType::Histogram, "{}", self.metric_name);
        histogram!(self.metric_name, Self::labels(labels)).record(value);
    }
}

pub(crate) const CONNECT_ATTEMPTS: StaticMetric = StaticMetric {
    metric_name: "session.connection.attempt.count",
    unit: Unit::Count,
    description: "The number of connection attempts",
    metric_type: MetricType::Counter,
};

pub(crate) const CONNECTING_ERRORS: StaticMetric = StaticMetric {
    metric_name: "session.connection.error.count",
    unit: Unit::Count,
    description: "The number of failed connection attempts",
    metric_type: MetricType::Counter,
};

pub(crate) const CONNECTIONS_DROPPED: StaticMetric = StaticMetric {
    metric_name: "session.connection.dropped.count",
    unit: Unit::Count,
    description: "The number of links lost while connected",
    metric_type: MetricType::Counter,
};

pub(crate) const CONNECTED_PERIPHERALS: StaticMetric = StaticMetric {
    metric_name: "session.peripheral.connected.count",
    unit: Unit::Count,
    description: "The number of connected peripherals",
    metric_type: MetricType::Gauge,
};

pub(crate) const CONNECTING_DURATION: StaticMetric = StaticMetric {
    metric_name: "session.peripheral.connecting.duration",
    unit: Unit::Milliseconds,
    description: "The time spent connecting a peripheral, retries included",
    metric_type: MetricType::Histogram,
};

pub(crate) const CONNECTION_DURATION: StaticMetric = StaticMetric {
    metric_name: "session.peripheral.connection.duration",
    unit: Unit::Milliseconds,
    description: "The time a peripheral stays connected",
    metric_type: MetricType::Histogram,
};

pub(crate) const SIGHTING_COUNT: StaticMetric = StaticMetric {
    metric_name: "session.scan.sighting.count",
    unit: Unit::Count,
    description: "The number of matching advertisements",
    metric_type: MetricType::Counter,
};

pub(crate) const SIGHTING_THROTTLED_COUNT: StaticMetric = StaticMetric {
    metric_name: "session.scan.sighting.throttled.count",
    unit: Unit::Count,
    description: "The number of sightings not published due to throttling",
    metric_type: MetricType::Counter,
};

pub(crate) const REGISTRY_EVICTED: StaticMetric = StaticMetric {
    metric_name: "session.registry.evicted.count",
    unit: Unit::Count,
    description: "The number of stale peripherals evicted from the registry",
    metric_type: MetricType::Counter,
};

pub(crate) const GATT_OPERATION_DURATION: StaticMetric = StaticMetric {
    metric_name: "session.gatt.operation.duration",
    unit: Unit::Milliseconds,
    description: "The time spent executing a GATT operation",
    metric_type: MetricType::Histogram,
};

pub(crate) const GATT_OPERATION_TIMEOUTS: StaticMetric = StaticMetric {
    metric_name: "session.gatt.operation.timeout.count",
    unit: Unit::Count,
    description: "The number of timed out GATT operations",
    metric_type: MetricType::Counter,
};

pub fn describe_metrics() {
    CONNECT_ATTEMPTS.describe();
    CONNECTING_ERRORS.describe();
    CONNECTIONS_DROPPED.describe();
    CONNECTED_PERIPHERALS.describe();
    CONNECTING_DURATION.describe();
    CONNECTION_DURATION.describe();
    SIGHTING_COUNT.describe();
    SIGHTING_THROTTLED_COUNT.describe();
    REGISTRY_EVICTED.describe();
    GATT_OPERATION_DURATION.describe();
    GATT_OPERATION_TIMEOUTS.describe();
}
