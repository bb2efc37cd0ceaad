//! Per-session notifications.
//!
//! A [`SessionListener`] is handed to exactly one session, and its
//! [`SessionSignals`] stay with exactly one caller. Each notification is a
//! single-result channel, so a signal can never be observed by a task waiting
//! on a different peer.

use bitcoin::p2p::ServiceFlags;
use log::debug;
use std::net::IpAddr;
use tokio::sync::oneshot;

/// Sending half, owned by the session.
#[derive(Debug)]
pub struct SessionListener {
    handshake: Option<oneshot::Sender<ServiceFlags>>,
    addresses: Option<oneshot::Sender<Vec<IpAddr>>>,
}

/// Receiving half, owned by the task driving the session.
///
/// A receiver resolves with an error if the session ends before delivering.
#[derive(Debug)]
pub struct SessionSignals {
    /// Resolves with the services the peer reported once the handshake completes.
    pub handshake: oneshot::Receiver<ServiceFlags>,
    /// Resolves with the first address list the peer sends.
    pub addresses: oneshot::Receiver<Vec<IpAddr>>,
}

impl SessionListener {
    /// Create a fresh listener and the signals it feeds.
    pub fn new() -> (SessionListener, SessionSignals) {
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let (addresses_tx, addresses_rx) = oneshot::channel();
        (
            SessionListener {
                handshake: Some(handshake_tx),
                addresses: Some(addresses_tx),
            },
            SessionSignals {
                handshake: handshake_rx,
                addresses: addresses_rx,
            },
        )
    }

    /// The peer acknowledged our version.
    ///
    /// Returns `true` if this was the first acknowledgement and the owner was
    /// still listening.
    pub fn on_handshake_ack(&mut self, services: ServiceFlags) -> bool {
        match self.handshake.take() {
            Some(tx) => tx.send(services).is_ok(),
            None => {
                debug!("Ignoring repeated handshake acknowledgement");
                false
            }
        }
    }

    /// The peer sent an address list.
    ///
    /// Only the first list is delivered, later ones are dropped.
    pub fn on_address_list(&mut self, addresses: Vec<IpAddr>) -> bool {
        match self.addresses.take() {
            Some(tx) => tx.send(addresses).is_ok(),
            None => {
                debug!(
                    "Ignoring additional address list of {} entries",
                    addresses.len()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_first_notification_wins() {
        let (mut listener, signals) = SessionListener::new();

        assert!(listener.on_handshake_ack(ServiceFlags::NETWORK));
        assert!(!listener.on_handshake_ack(ServiceFlags::WITNESS));

        let first = vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))];
        assert!(listener.on_address_list(first.clone()));
        assert!(!listener.on_address_list(vec![]));

        assert_eq!(signals.handshake.await.unwrap(), ServiceFlags::NETWORK);
        assert_eq!(signals.addresses.await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_dropped_listener_closes_signals() {
        let (listener, signals) = SessionListener::new();
        drop(listener);

        assert!(signals.handshake.await.is_err());
        assert!(signals.addresses.await.is_err());
    }

    #[tokio::test]
    async fn test_listeners_are_independent() {
        let (mut first, first_signals) = SessionListener::new();
        let (_second, mut second_signals) = SessionListener::new();

        first.on_handshake_ack(ServiceFlags::NETWORK);

        assert!(second_signals.handshake.try_recv().is_err());
        assert_eq!(first_signals.handshake.await.unwrap(), ServiceFlags::NETWORK);
    }
}
