use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use metrics::Label;
use pin_project_lite::pin_project;
use tokio::time::Instant;
use tracing::Span;

use crate::inner::metrics::StaticMetric;

pub(crate) trait Measure: Sized {
    /// Records the time from the first poll until completion into a histogram metric.
    fn measure_execution_time(self, metric: &'static StaticMetric, labels: Vec<Label>, span: Span) -> TimeInstrumented<Self> {
        TimeInstrumented {
            inner: self,
            started_at: None,
            metric,
            labels,
            span,
        }
    }
}

impl<T: Future> Measure for T {}

pin_project! {
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub(crate) struct TimeInstrumented<T> {
        #[pin]
        inner: T,
        started_at: Option<Instant>,
        metric: &'static StaticMetric,
        labels: Vec<Label>,
        span: Span,
    }
}

impl<T: Future> Future for TimeInstrumented<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _enter = this.span.enter();

        let started_at = *this.started_at.get_or_insert_with(Instant::now);
        let result = this.inner.poll(cx);

        if result.is_ready() {
            this.metric
                .histogram(started_at.elapsed().as_millis() as f64, this.labels.drain(..));
        }
        result
    }
}
