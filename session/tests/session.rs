//! Integration tests for outbound sessions against a scripted local node.

use bitcoin::p2p::address::Address;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::message_network::VersionMessage;
use bitcoin::p2p::ServiceFlags;
use bitcoin::Network;
use peer_seeder_session::{
    OutboundSession, PeerSession, SessionConfiguration, SessionError, SessionListener,
    UserAgent, V1TransportReader, V1TransportWriter, DEFAULT_PROTOCOL_VERSION,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Behavior of the scripted node.
#[derive(Clone)]
struct NodeScript {
    services: ServiceFlags,
    /// Addresses answered to getaddr, `None` ignores the request.
    addresses: Option<Vec<SocketAddr>>,
    /// Skip our verack so the handshake never completes.
    withhold_verack: bool,
}

/// Accepts one connection and plays the node side of the protocol.
///
/// Every message received from the session is forwarded on the returned channel.
async fn spawn_node(script: NodeScript) -> (SocketAddr, mpsc::UnboundedReceiver<NetworkMessage>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, writer) = stream.into_split();
        let magic = Network::Regtest.magic();
        let mut reader = V1TransportReader::new(magic, reader);
        let mut writer = V1TransportWriter::new(magic, writer);

        while let Ok(message) = reader.read().await {
            let _ = seen_tx.send(message.clone());
            let replies = match message {
                NetworkMessage::Version(_) => {
                    let mut replies = vec![NetworkMessage::Version(VersionMessage {
                        version: 70016,
                        services: script.services,
                        timestamp: 0,
                        receiver: Address::new(&address, ServiceFlags::NONE),
                        sender: Address::new(&address, script.services),
                        nonce: 0xdead_beef,
                        user_agent: "/scripted-node:0.1.0/".to_string(),
                        start_height: 0,
                        relay: false,
                    })];
                    if !script.withhold_verack {
                        replies.push(NetworkMessage::Verack);
                    }
                    replies
                }
                NetworkMessage::GetAddr => match &script.addresses {
                    Some(addresses) => vec![NetworkMessage::Addr(
                        addresses
                            .iter()
                            .map(|socket| (0, Address::new(socket, ServiceFlags::NETWORK)))
                            .collect(),
                    )],
                    None => vec![],
                },
                _ => vec![],
            };
            for reply in replies {
                if writer.write(reply).await.is_err() {
                    return;
                }
            }
        }
    });

    (address, seen_rx)
}

fn config() -> SessionConfiguration {
    SessionConfiguration::non_listening(
        Network::Regtest,
        DEFAULT_PROTOCOL_VERSION,
        UserAgent::default(),
    )
}

#[tokio::test]
async fn test_session_handshake_and_address_exchange() {
    let services = ServiceFlags::NETWORK | ServiceFlags::WITNESS;
    let (address, mut seen) = spawn_node(NodeScript {
        services,
        addresses: Some(vec![
            "10.0.0.2:18444".parse().unwrap(),
            "10.0.0.3:18444".parse().unwrap(),
        ]),
        withhold_verack: false,
    })
    .await;

    let (listener, signals) = SessionListener::new();
    let mut session = OutboundSession::new(address, config(), listener).unwrap();
    session.connect().await.expect("connect to scripted node");

    let reported = timeout(WAIT, signals.handshake)
        .await
        .expect("handshake in time")
        .expect("handshake signal");
    assert_eq!(reported, services);

    session.request_addresses().await.unwrap();
    let addresses = timeout(WAIT, signals.addresses)
        .await
        .expect("addresses in time")
        .expect("address signal");
    assert_eq!(
        addresses,
        vec![
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)),
        ]
    );

    // The node saw our version first, with relay disabled.
    match seen.recv().await {
        Some(NetworkMessage::Version(version)) => {
            assert!(!version.relay);
            assert_eq!(version.user_agent, UserAgent::default().to_string());
        }
        other => panic!("Expected Version message, got {other:?}"),
    }

    session.disconnect().await;
    session.disconnect().await;
}

#[tokio::test]
async fn test_session_without_verack_times_out() {
    let (address, _seen) = spawn_node(NodeScript {
        services: ServiceFlags::NETWORK,
        addresses: None,
        withhold_verack: true,
    })
    .await;

    let (listener, signals) = SessionListener::new();
    let mut session = OutboundSession::new(address, config(), listener).unwrap();
    session.connect().await.unwrap();

    assert!(timeout(Duration::from_millis(200), signals.handshake)
        .await
        .is_err());
    session.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_closes_pending_signals() {
    let (address, _seen) = spawn_node(NodeScript {
        services: ServiceFlags::NETWORK,
        addresses: None,
        withhold_verack: false,
    })
    .await;

    let (listener, signals) = SessionListener::new();
    let mut session = OutboundSession::new(address, config(), listener).unwrap();
    session.connect().await.unwrap();
    timeout(WAIT, signals.handshake).await.unwrap().unwrap();

    session.disconnect().await;

    // Reader task aborted, listener dropped with it.
    let closed = timeout(WAIT, signals.addresses).await.unwrap();
    assert!(closed.is_err());
    assert!(matches!(
        session.connect().await,
        Err(SessionError::Closed)
    ));
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port nobody listens on.
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let (listener, _signals) = SessionListener::new();
    let mut session = OutboundSession::new(address, config(), listener).unwrap();

    assert!(matches!(
        session.connect().await,
        Err(SessionError::Io(_))
    ));
}
