use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use btleplug::api::WriteType;
use futures_util::Stream;
use pin_project_lite::pin_project;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::error::{SessionError, SessionResult};
use crate::inner::model::characteristic_payload::CharacteristicPayload;

pub(crate) mod queue;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, strum_macros::Display)]
pub enum GattOperationKind {
    Read,
    Write,
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone)]
pub struct GattOperation {
    pub kind: GattOperationKind,
    pub target: ServiceCharacteristicKey,
    /// Only used by writes
    pub payload: Vec<u8>,
    pub write_type: WriteType,
    /// Falls back to the session default when absent
    pub timeout: Option<Duration>,
}

impl GattOperation {
    pub fn read(target: ServiceCharacteristicKey) -> Self {
        Self::new(GattOperationKind::Read, target)
    }

    pub fn write(target: ServiceCharacteristicKey, payload: Vec<u8>, write_type: WriteType) -> Self {
        Self {
            payload,
            write_type,
            ..Self::new(GattOperationKind::Write, target)
        }
    }

    pub fn subscribe(target: ServiceCharacteristicKey) -> Self {
        Self::new(GattOperationKind::Subscribe, target)
    }

    pub fn unsubscribe(target: ServiceCharacteristicKey) -> Self {
        Self::new(GattOperationKind::Unsubscribe, target)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn new(kind: GattOperationKind, target: ServiceCharacteristicKey) -> Self {
        Self {
            kind,
            target,
            payload: vec![],
            write_type: WriteType::WithResponse,
            timeout: None,
        }
    }
}

pin_project! {
    /// Completes with the operation result once the queue has executed it.
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct OperationHandle {
        #[pin]
        receiver: oneshot::Receiver<SessionResult<Vec<u8>>>,
    }
}

impl OperationHandle {
    pub(crate) fn new(receiver: oneshot::Receiver<SessionResult<Vec<u8>>>) -> Self {
        Self { receiver }
    }
}

impl Future for OperationHandle {
    type Output = SessionResult<Vec<u8>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project()
            .receiver
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SessionError::ConnectionLost)))
    }
}

/// Value updates of a subscribed characteristic.
///
/// Ends after unsubscribing; when the connection ends the last item is `Err(ConnectionLost)`.
pub struct Subscription {
    pub target: ServiceCharacteristicKey,
    receiver: mpsc::UnboundedReceiver<SessionResult<Arc<CharacteristicPayload>>>,
}

impl Subscription {
    pub(crate) fn new(
        target: ServiceCharacteristicKey,
        receiver: mpsc::UnboundedReceiver<SessionResult<Arc<CharacteristicPayload>>>,
    ) -> Self {
        Self { target, receiver }
    }

    pub async fn recv(&mut self) -> Option<SessionResult<Arc<CharacteristicPayload>>> {
        self.receiver.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = SessionResult<Arc<CharacteristicPayload>>> + Send {
        futures_util::stream::unfold(self, |mut subscription| async move {
            let item = subscription.recv().await?;
            Some((item, subscription))
        })
    }
}
