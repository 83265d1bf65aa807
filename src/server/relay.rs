//! Active file transfers and their byte accounting
// (c) 2025 The glided developers

/// Where a live transfer is in its life cycle.
///
/// Complete and Aborted are terminal: the record is dropped from the table
/// rather than parked in a dead state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferState {
    /// Accepted; waiting for the sender's metadata frame
    AwaitingMetadata,
    /// Metadata relayed; chunks are flowing
    Streaming,
}

/// One accepted transfer being relayed between two connections.
#[derive(Debug, Clone)]
pub(crate) struct Transfer {
    /// The user sending the file (the original requester)
    pub sender: String,
    /// The user receiving it (who accepted the request)
    pub receiver: String,
    /// File name, as it appeared in the request and must appear in every
    /// metadata/chunk frame
    pub filename: String,
    /// Declared total size; meaningless until Streaming
    pub total: u64,
    /// Bytes relayed so far
    pub relayed: u64,
    pub state: TransferState,
}

/// Why a metadata or chunk frame could not be relayed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum RelayError {
    /// No live transfer matches the frame; malformed input on that
    /// connection
    #[error("no active transfer matches this file")]
    UnexpectedData,
    /// The chunk would push the byte total past the declared size.
    /// The transfer has been aborted; the named receiver should be told.
    #[error("chunk would exceed the declared file size")]
    Overflow {
        /// The receiving user of the aborted transfer
        receiver: String,
    },
}

/// Result of relaying one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Relayed {
    /// Which user the frame must be forwarded to
    pub receiver: String,
    /// Total size, if this frame completed the transfer
    pub completed: Option<u64>,
}

/// The table of live transfers, in acceptance order.
#[derive(Debug, Default)]
pub(crate) struct Relay {
    transfers: Vec<Transfer>,
}

impl Relay {
    /// Opens a transfer in `AwaitingMetadata` following an accepted request.
    pub(crate) fn begin(&mut self, sender: &str, receiver: &str, filename: &str) {
        self.transfers.push(Transfer {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            filename: filename.to_string(),
            total: 0,
            relayed: 0,
            state: TransferState::AwaitingMetadata,
        });
    }

    /// Records the declared size of a transfer and moves it to Streaming.
    ///
    /// A declared size of zero completes the transfer on the spot; the
    /// metadata frame is still forwarded so the receiver learns of the
    /// empty file.
    pub(crate) fn metadata(
        &mut self,
        sender: &str,
        filename: &str,
        size: u32,
    ) -> Result<Relayed, RelayError> {
        let idx = self
            .transfers
            .iter()
            .position(|t| {
                t.state == TransferState::AwaitingMetadata
                    && t.sender == sender
                    && t.filename == filename
            })
            .ok_or(RelayError::UnexpectedData)?;
        if size == 0 {
            let t = self.transfers.remove(idx);
            return Ok(Relayed {
                receiver: t.receiver,
                completed: Some(0),
            });
        }
        let t = &mut self.transfers[idx];
        t.total = u64::from(size);
        t.state = TransferState::Streaming;
        Ok(Relayed {
            receiver: t.receiver.clone(),
            completed: None,
        })
    }

    /// Accounts for one chunk of `len` bytes.
    ///
    /// Completion is inferred numerically: there is no end-of-file frame,
    /// so reaching the declared size terminates the transfer, and any
    /// excess is a protocol violation that aborts it.
    pub(crate) fn chunk(
        &mut self,
        sender: &str,
        filename: &str,
        len: usize,
    ) -> Result<Relayed, RelayError> {
        let idx = self
            .transfers
            .iter()
            .position(|t| {
                t.state == TransferState::Streaming
                    && t.sender == sender
                    && t.filename == filename
            })
            .ok_or(RelayError::UnexpectedData)?;
        let projected = self.transfers[idx].relayed + len as u64;
        if projected > self.transfers[idx].total {
            let t = self.transfers.remove(idx);
            return Err(RelayError::Overflow {
                receiver: t.receiver,
            });
        }
        if projected == self.transfers[idx].total {
            let t = self.transfers.remove(idx);
            return Ok(Relayed {
                receiver: t.receiver,
                completed: Some(t.total),
            });
        }
        let t = &mut self.transfers[idx];
        t.relayed = projected;
        Ok(Relayed {
            receiver: t.receiver.clone(),
            completed: None,
        })
    }

    /// Aborts every live transfer naming `user` as either party.
    /// Returns what was dropped so the surviving peers can be notified.
    pub(crate) fn drop_user(&mut self, user: &str) -> Vec<Transfer> {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.transfers)
            .into_iter()
            .partition(|t| t.sender == user || t.receiver == user);
        self.transfers = kept;
        dropped
    }
}
