//! In-process transports backed by tokio channels, for tests and examples

use tokio::sync::mpsc;

use crate::frame::Frame;
use crate::server::{WireRx, WireTx};

/// A [`WireTx`] impl using tokio mpsc channels
#[derive(Clone)]
pub struct ChannelWireTx {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelWireTx {
    /// Create a new [`ChannelWireTx`]
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

impl WireTx for ChannelWireTx {
    type Error = ChannelWireTxError;

    async fn send(&mut self, frame: Frame) -> Result<(), Self::Error> {
        let bytes = frame.to_bytes().map_err(ChannelWireTxError::Encode)?;
        self.tx
            .send(bytes)
            .await
            .map_err(|_| ChannelWireTxError::ChannelClosed)
    }
}

/// A wire tx error
#[derive(Debug)]
pub enum ChannelWireTxError {
    /// The receiver closed the channel
    ChannelClosed,
    /// The frame could not be serialized
    Encode(postcard::Error),
}

/// A [`WireRx`] impl using tokio mpsc channels
pub struct ChannelWireRx {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelWireRx {
    /// Create a new [`ChannelWireRx`]
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }
}

impl WireRx for ChannelWireRx {
    type Error = ChannelWireRxError;

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        self.rx.recv().await.ok_or(ChannelWireRxError::ChannelClosed)
    }
}

/// A wire rx error
#[derive(Debug)]
pub enum ChannelWireRxError {
    /// The sender closed the channel
    ChannelClosed,
}
