//! The three signals the transport raises to whatever observes it: a new
//! unsolicited message, a lost connection, and a roster invalidation.
//! Delivered as one `mpsc::Receiver<ClientEvent>` returned by
//! [`crate::transport::ClientTransport::connect`]. A GUI would subscribe to
//! this channel to drive its own view; that subscription wiring is out of
//! scope here.

use jim_protocol::MessageFrame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A MESSAGE frame addressed to this account, delivered unsolicited.
    NewMessage(MessageFrame),
    /// The reader observed a fatal I/O or decode error; the transport is
    /// no longer usable.
    ConnectionLost,
    /// A 205 reply arrived; the caller should re-fetch the roster via
    /// `user_list_update`/`contacts_list_update`.
    RosterInvalidated,
}
