use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

/// Receive buffer size for UDP responses; matches the EDNS payload size
/// advertised in outgoing queries.
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

/// One readable unit from a transport: a datagram off the shared UDP
/// socket, or the terminal outcome of one per-query TCP connection.
#[derive(Debug)]
pub enum TransportEvent {
	Datagram(Vec<u8>),
	TcpDone {
		id: u64,
		result: io::Result<Vec<u8>>,
	},
}

pub enum Transport {
	Udp(UdpTransport),
	Tcp(TcpTransport),
}

impl Transport {
	/// Wait for the next transport event. Cancel-safe, so the dispatcher
	/// can race it against its deadline sleep.
	pub async fn next_event(&mut self) -> io::Result<TransportEvent> {
		match self {
			Transport::Udp(udp) => udp.recv().await.map(TransportEvent::Datagram),
			Transport::Tcp(tcp) => {
				let (id, result) = tcp.recv().await;
				Ok(TransportEvent::TcpDone { id, result })
			}
		}
	}
}

/// Shared non-blocking UDP socket, connected to the target so sends need
/// no address argument and ICMP errors surface on receive.
pub struct UdpTransport {
	socket: UdpSocket,
	buf: Vec<u8>,
}

impl UdpTransport {
	pub async fn connect(server: SocketAddr) -> Result<UdpTransport> {
		let bind_addr = if server.is_ipv4() {
			"0.0.0.0:0"
		} else {
			"[::]:0"
		};
		let socket = UdpSocket::bind(bind_addr)
			.await
			.map_err(|e| anyhow!("failed to bind UDP socket: {}", e))?;
		socket
			.connect(server)
			.await
			.map_err(|e| anyhow!("failed to connect UDP socket to {}: {}", server, e))?;
		Ok(UdpTransport {
			socket,
			buf: vec![0u8; MAX_UDP_RESPONSE_SIZE],
		})
	}

	/// Non-blocking send of one datagram.
	pub fn try_send(&self, bytes: &[u8]) -> io::Result<()> {
		self.socket.try_send(bytes).map(|_| ())
	}

	async fn recv(&mut self) -> io::Result<Vec<u8>> {
		let len = self.socket.recv(&mut self.buf).await?;
		Ok(self.buf[..len].to_vec())
	}
}

/// Short-lived per-query TCP connections.
///
/// Each send opens one connection on its own task; its outcome comes back
/// as a `TcpDone` event keyed by the connection handle. The whole exchange,
/// establishment included, runs under the query timeout.
pub struct TcpTransport {
	server: SocketAddr,
	query_timeout: Duration,
	next_id: u64,
	done_tx: mpsc::Sender<(u64, io::Result<Vec<u8>>)>,
	done_rx: mpsc::Receiver<(u64, io::Result<Vec<u8>>)>,
}

impl TcpTransport {
	pub fn new(server: SocketAddr, query_timeout: Duration, max_outstanding: usize) -> TcpTransport {
		let (done_tx, done_rx) = mpsc::channel(max_outstanding.max(1));
		TcpTransport {
			server,
			query_timeout,
			next_id: 0,
			done_tx,
			done_rx,
		}
	}

	/// Launch one query exchange and return its connection handle.
	pub fn send(&mut self, query: Vec<u8>) -> u64 {
		let id = self.next_id;
		self.next_id += 1;
		let server = self.server;
		let limit = self.query_timeout;
		let done = self.done_tx.clone();
		tokio::spawn(async move {
			let result = match tokio::time::timeout(limit, exchange(server, query)).await {
				Ok(result) => result,
				Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "query timed out")),
			};
			let _ = done.send((id, result)).await;
		});
		id
	}

	async fn recv(&mut self) -> (u64, io::Result<Vec<u8>>) {
		match self.done_rx.recv().await {
			Some(event) => event,
			// The transport keeps a sender of its own, so the channel
			// cannot close while it is alive.
			None => unreachable!("tcp completion channel closed"),
		}
	}
}

/// One full DNS-over-TCP exchange: connect, write the length-prefixed
/// query, half-close the write side, read the length-prefixed response.
async fn exchange(server: SocketAddr, query: Vec<u8>) -> io::Result<Vec<u8>> {
	let mut stream = TcpStream::connect(server).await?;

	let mut framed = Vec::with_capacity(2 + query.len());
	framed.extend_from_slice(&(query.len() as u16).to_be_bytes());
	framed.extend_from_slice(&query);
	stream.write_all(&framed).await?;
	stream.shutdown().await?;

	let mut len_buf = [0u8; 2];
	stream.read_exact(&mut len_buf).await?;
	let len = u16::from_be_bytes(len_buf) as usize;
	let mut response = vec![0u8; len];
	stream.read_exact(&mut response).await?;
	Ok(response)
}
