/// Socket state machine: `None -> Open -> (CloseSent | CloseReceived) ->
/// Closed | Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketState {
    /// No socket has been created yet, or the previous one was reset.
    None,
    /// The connection is open and ready to communicate.
    Open,
    /// We initiated a close and are waiting for the peer's ack.
    CloseSent,
    /// The peer initiated a close; we are acknowledging it.
    CloseReceived,
    /// The close handshake completed (by either side).
    Closed,
    /// The connection ended due to a transport-level error.
    Aborted,
}

impl SocketState {
    /// `None`, `Closed`, and `Aborted` are "not active"; everything else is.
    pub(crate) fn is_active(self) -> bool {
        !matches!(self, Self::None | Self::Closed | Self::Aborted)
    }

    /// Whether this state can meaningfully be closed (open or mid-handshake).
    pub(crate) fn can_close(self) -> bool {
        matches!(self, Self::Open | Self::CloseSent | Self::CloseReceived)
    }
}
