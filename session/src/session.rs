//! Outbound peer sessions.
//!
//! [`PeerSession`] is the capability the crawler drives. [`OutboundSession`] is
//! the TCP implementation: after the version message is sent, a reader task
//! runs the handshake and reports to the session's [`SessionListener`], while
//! a writer task drains queued outbound messages.

use crate::configuration::{SessionConfiguration, ADDRV2_MIN_PROTOCOL_VERSION};
use crate::error::SessionError;
use crate::handshake::{generate_nonce, version_message, HandshakeState};
use crate::listener::SessionListener;
use crate::transport::{V1TransportReader, V1TransportWriter};
use bitcoin::p2p::address::AddrV2;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::ServiceFlags;
use log::debug;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A single outbound attempt against a candidate address.
///
/// Callers bound every method with their own timeout. Handshake completion
/// and received addresses are not returned here, they are delivered to the
/// listener the session was built with.
pub trait PeerSession: Send {
    /// Open the connection and start the version handshake.
    fn connect(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Ask the peer for the addresses it knows about.
    fn request_addresses(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Tear down the connection. Safe to call more than once.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// Whether `ip` could ever be dialed.
///
/// Unspecified, multicast and broadcast addresses never can, so they are
/// neither dialed nor accepted from peers.
pub fn is_dialable(ip: IpAddr) -> bool {
    let reserved = match ip {
        IpAddr::V4(ipv4) => ipv4.is_broadcast(),
        IpAddr::V6(_) => false,
    };
    !(ip.is_unspecified() || ip.is_multicast() || reserved)
}

/// TCP session speaking the plaintext v1 protocol.
#[derive(Debug)]
pub struct OutboundSession {
    address: SocketAddr,
    configuration: SessionConfiguration,
    /// Moved into the reader task on connect.
    listener: Option<SessionListener>,
    /// Queue feeding the writer task, present while connected.
    outbound: Option<mpsc::UnboundedSender<NetworkMessage>>,
    tasks: Vec<JoinHandle<()>>,
}

impl OutboundSession {
    /// Build a session against `address`.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnsupportedAddress`] for addresses that can never be
    /// dialed (see [`is_dialable`]) or port 0.
    pub fn new(
        address: SocketAddr,
        configuration: SessionConfiguration,
        listener: SessionListener,
    ) -> Result<Self, SessionError> {
        if !is_dialable(address.ip()) || address.port() == 0 {
            return Err(SessionError::UnsupportedAddress);
        }

        Ok(Self {
            address,
            configuration,
            listener: Some(listener),
            outbound: None,
            tasks: Vec::new(),
        })
    }

    /// The remote address of this session.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    fn close(&mut self) {
        self.outbound = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl PeerSession for OutboundSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        if self.outbound.is_some() {
            return Ok(());
        }
        let listener = self.listener.take().ok_or(SessionError::Closed)?;

        let stream = TcpStream::connect(self.address).await?;
        // No delay is helpful for the small packets of the bitcoin p2p protocol.
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let magic = self.configuration.magic();
        let mut writer = V1TransportWriter::new(magic, writer);
        let nonce = generate_nonce();
        writer
            .write(version_message(&self.configuration, self.address, nonce))
            .await?;
        debug!("Sent version message to {}", self.address);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let reader = V1TransportReader::new(magic, BufReader::new(reader));
        let address = self.address;
        let enable_addrv2 = self.configuration.enable_addrv2;
        let replies = outbound_tx.clone();

        self.tasks
            .push(tokio::spawn(write_messages(writer, outbound_rx, address)));
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) =
                read_messages(reader, replies, listener, nonce, enable_addrv2).await
            {
                debug!("Session with {address} ended: {e}");
            }
        }));
        self.outbound = Some(outbound_tx);

        Ok(())
    }

    async fn request_addresses(&mut self) -> Result<(), SessionError> {
        let outbound = self.outbound.as_ref().ok_or(SessionError::NotConnected)?;
        outbound
            .send(NetworkMessage::GetAddr)
            .map_err(|_| SessionError::Closed)?;
        debug!("Queued getaddr for {}", self.address);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.close();
    }
}

impl Drop for OutboundSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drains the outbound queue until it closes or the socket fails.
async fn write_messages<W>(
    mut writer: V1TransportWriter<W>,
    mut outbound: mpsc::UnboundedReceiver<NetworkMessage>,
    address: SocketAddr,
) where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(message) = outbound.recv().await {
        if let Err(e) = writer.write(message).await {
            debug!("Write to {address} failed: {e}");
            break;
        }
    }
}

/// Reads messages from the peer, runs the handshake and reports to the listener.
///
/// Returns when the peer goes away. Dropping the listener on return closes
/// whatever signals have not fired yet.
async fn read_messages<R>(
    mut reader: V1TransportReader<R>,
    replies: mpsc::UnboundedSender<NetworkMessage>,
    mut listener: SessionListener,
    nonce: u64,
    enable_addrv2: bool,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut handshake = HandshakeState::VersionSent;
    let mut services = ServiceFlags::NONE;
    let mut acknowledged = false;

    loop {
        let message = reader.read().await?;

        match message {
            NetworkMessage::Version(version) => {
                if version.nonce == nonce {
                    return Err(SessionError::ConnectionLoop);
                }
                if handshake.awaits_version() {
                    services = version.services;
                    // BIP155 requires sendaddrv2 between version and verack.
                    if enable_addrv2 && version.version >= ADDRV2_MIN_PROTOCOL_VERSION {
                        send(&replies, NetworkMessage::SendAddrV2)?;
                    }
                    send(&replies, NetworkMessage::Verack)?;
                }
                handshake = handshake.on_version();
            }
            NetworkMessage::Verack => handshake = handshake.on_verack(),
            NetworkMessage::Ping(nonce) => send(&replies, NetworkMessage::Pong(nonce))?,
            NetworkMessage::Addr(addresses) => {
                let ips: Vec<IpAddr> = addresses
                    .iter()
                    .filter_map(|(_, address)| address.socket_addr().ok())
                    .map(|socket| socket.ip())
                    .filter(|ip| is_dialable(*ip))
                    .collect();
                debug!("Received {} addresses ({} usable)", addresses.len(), ips.len());
                listener.on_address_list(ips);
            }
            NetworkMessage::AddrV2(addresses) => {
                let ips: Vec<IpAddr> = addresses
                    .iter()
                    .filter_map(|message| match &message.addr {
                        AddrV2::Ipv4(ipv4) => Some(IpAddr::V4(*ipv4)),
                        AddrV2::Ipv6(ipv6) => Some(IpAddr::V6(*ipv6)),
                        _ => None,
                    })
                    .filter(|ip| is_dialable(*ip))
                    .collect();
                debug!(
                    "Received {} addresses in v2 format ({} usable)",
                    addresses.len(),
                    ips.len()
                );
                listener.on_address_list(ips);
            }
            other => debug!("Ignoring {} message", other.cmd()),
        }

        if handshake == HandshakeState::Complete && !acknowledged {
            acknowledged = true;
            listener.on_handshake_ack(services);
        }
    }
}

fn send(
    replies: &mpsc::UnboundedSender<NetworkMessage>,
    message: NetworkMessage,
) -> Result<(), SessionError> {
    replies.send(message).map_err(|_| SessionError::Closed)
}
