//! Connection handles
//!
//! A handle is the pairing engine's only view of a participant's connection:
//! it can ask whether the connection is live and push a notification to it.

use crate::error::{PairingError, Result};
use crate::transport::messages::{Notification, OutboundMessage};
use crate::types::{ParticipantId, PoolKind};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Liveness check and delivery for one participant's connection
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionHandle: Send + Sync {
    /// Whether the connection can currently receive notifications
    fn is_connected(&self) -> bool;

    /// Deliver a notification. Fails if the connection is not live.
    fn deliver(&self, notification: Notification) -> Result<()>;
}

/// Handle that forwards notifications onto an unbounded channel
#[derive(Debug)]
pub struct ChannelHandle {
    participant_id: ParticipantId,
    pool: PoolKind,
    sender: mpsc::UnboundedSender<OutboundMessage>,
    connected: AtomicBool,
}

impl ChannelHandle {
    pub fn new(
        participant_id: impl Into<ParticipantId>,
        pool: PoolKind,
        sender: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            pool,
            sender,
            connected: AtomicBool::new(true),
        }
    }

    /// Create a handle together with its own receiving end
    pub fn pair(
        participant_id: impl Into<ParticipantId>,
        pool: PoolKind,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(participant_id, pool, sender), receiver)
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Mark the connection closed; later deliveries fail
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        debug!("Closed channel handle for '{}'", self.participant_id);
    }

    /// Mark the connection live again
    pub fn reopen(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }
}

impl ConnectionHandle for ChannelHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    fn deliver(&self, notification: Notification) -> Result<()> {
        if !self.is_connected() {
            return Err(PairingError::TransportClosed {
                participant_id: self.participant_id.clone(),
            }
            .into());
        }

        self.sender
            .send(OutboundMessage {
                pool: self.pool,
                participant_id: self.participant_id.clone(),
                notification,
            })
            .map_err(|_| {
                PairingError::TransportClosed {
                    participant_id: self.participant_id.clone(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(reason: &str) -> Notification {
        Notification::RequestRejected {
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_channel_handle_delivers() {
        let (handle, mut receiver) = ChannelHandle::pair("p1", PoolKind::Video);

        assert!(handle.is_connected());
        handle.deliver(rejected("test")).unwrap();

        let message = receiver.try_recv().unwrap();
        assert_eq!(message.pool, PoolKind::Video);
        assert_eq!(message.participant_id, "p1");
        assert_eq!(message.notification, rejected("test"));
    }

    #[test]
    fn test_closed_handle_rejects_delivery() {
        let (handle, mut receiver) = ChannelHandle::pair("p1", PoolKind::Text);

        handle.close();
        assert!(!handle.is_connected());

        let err = handle.deliver(rejected("late")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PairingError>(),
            Some(PairingError::TransportClosed { .. })
        ));
        assert!(receiver.try_recv().is_err());

        handle.reopen();
        assert!(handle.deliver(rejected("again")).is_ok());
    }

    #[test]
    fn test_dropped_receiver_means_not_connected() {
        let (handle, receiver) = ChannelHandle::pair("p1", PoolKind::Text);
        drop(receiver);

        assert!(!handle.is_connected());
        assert!(handle.deliver(rejected("gone")).is_err());
    }
}
