// RouterSim: Simulating Multi-Protocol Routing and Forwarding
// Copyright (C) 2021  Tibor Schneider
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! # Link abstraction
//!
//! An interface's attachment to the outside world. Any transport that yields timestamped byte
//! buffers and accepts buffers for transmission can back an interface: a live NIC, a PCAP
//! replayer, or the in-memory loopback pair used by the tests.

use crate::Error;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::{Duration, Instant};

/// A received frame with its arrival timestamp.
pub type RxFrame = (Instant, Vec<u8>);

/// Bidirectional attachment of one interface.
pub trait Link: Send + std::fmt::Debug {
    /// Wait up to `timeout` for the next inbound frame.
    fn recv(&self, timeout: Duration) -> Option<RxFrame>;

    /// Transmit a frame. Fails with [`Error::QueueFull`] if the transmit side is congested.
    fn send(&self, bytes: Vec<u8>) -> Result<(), Error>;
}

/// In-memory loopback link. [`MemLink::pair`] creates two connected endpoints: what one side
/// sends, the other receives (timestamped at transmission).
#[derive(Debug)]
pub struct MemLink {
    tx: Sender<RxFrame>,
    rx: Receiver<RxFrame>,
}

impl MemLink {
    /// Create a connected pair of endpoints with the given queue depth per direction.
    pub fn pair(depth: usize) -> (MemLink, MemLink) {
        let (a_tx, a_rx) = bounded(depth);
        let (b_tx, b_rx) = bounded(depth);
        (MemLink { tx: a_tx, rx: b_rx }, MemLink { tx: b_tx, rx: a_rx })
    }

    /// Number of frames waiting on the receive side.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Link for MemLink {
    fn recv(&self, timeout: Duration) -> Option<RxFrame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn send(&self, bytes: Vec<u8>) -> Result<(), Error> {
        match self.tx.try_send((Instant::now(), bytes)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull(self.tx.capacity().unwrap_or(0))),
            Err(TrySendError::Disconnected(_)) => Err(Error::ShutdownRequested),
        }
    }
}
