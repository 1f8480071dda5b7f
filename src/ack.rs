//! Acknowledgement plumbing for server-initiated events.
//!
//! An emission requesting an acknowledgement registers a pending entry on
//! the socket; the matching ACK packet resolves it. There is no timeout at
//! this layer: the reply arrives, or the receiver fails when the socket
//! closes and its pending entries are discarded.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::AckError;

/// Arguments of an acknowledgement response: the JSON payload and its binary
/// attachments.
pub type AckResponse = (Value, Vec<Bytes>);

pub(crate) type AckResult = Result<AckResponse, AckError>;

/// Future resolving with the peer's acknowledgement response.
#[derive(Debug)]
pub struct AckReceiver {
    rx: oneshot::Receiver<AckResult>,
}

impl AckReceiver {
    pub(crate) fn new(rx: oneshot::Receiver<AckResult>) -> Self {
        Self { rx }
    }
}

impl Future for AckReceiver {
    type Output = AckResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(inner) => inner,
            // the socket closed with the entry still pending
            Err(err) => Err(AckError::Recv(err)),
        })
    }
}
