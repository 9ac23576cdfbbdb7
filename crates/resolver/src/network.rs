//! Line-oriented code fetch protocol.
//!
//! The client sends `Classname:<name>\n`. The server answers `Error\n`, or
//! `Content-Length:<n>\n` followed by the blob. Every blob starts with the
//! container marker byte `0xCA`; the client skips anything before the marker
//! and then takes the marker plus the next `n - 1` bytes.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::CodeResolver;

/// Default bound on one complete fetch exchange.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest blob a client accepts; longer `Content-Length` replies are not found.
pub const MAX_CODE_LEN: usize = 64 * 1024 * 1024;

const CODE_MARKER: u8 = 0xCA;
const REQUEST_PREFIX: &str = "Classname:";
const LENGTH_PREFIX: &str = "Content-Length";
const ERROR_REPLY: &str = "Error";

/// Resolver fetching blobs from a remote code server, one connection per lookup.
#[derive(Debug, Clone)]
pub struct NetworkResolver {
	address: String,
	timeout: Duration,
}

impl NetworkResolver {
	pub fn new(address: impl Into<String>) -> Self {
		Self {
			address: address.into(),
			timeout: DEFAULT_NETWORK_TIMEOUT,
		}
	}

	#[must_use]
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn address(&self) -> &str {
		&self.address
	}

	async fn fetch(&self, name: &str) -> io::Result<Option<Bytes>> {
		let stream = TcpStream::connect(&self.address).await?;
		let (read, mut write) = stream.into_split();
		write.write_all(format!("{REQUEST_PREFIX}{name}\n").as_bytes()).await?;
		write.flush().await?;

		let mut reader = BufReader::new(read);
		let mut header = String::new();
		if reader.read_line(&mut header).await? == 0 {
			return Ok(None);
		}
		let header = header.trim_end_matches(['\r', '\n']);
		if header == ERROR_REPLY {
			return Ok(None);
		}
		let Some(len) = parse_content_length(header) else {
			tracing::debug!(%header, "resolver.net.bad_header");
			return Ok(None);
		};
		if len == 0 {
			return Ok(None);
		}
		if len > MAX_CODE_LEN {
			tracing::warn!(len, max = MAX_CODE_LEN, "resolver.net.oversized");
			return Ok(None);
		}

		while reader.read_u8().await? != CODE_MARKER {}

		let mut code = BytesMut::with_capacity(len);
		code.put_u8(CODE_MARKER);
		let mut body = (&mut reader).take(len as u64 - 1);
		while code.len() < len {
			if body.read_buf(&mut code).await? == 0 {
				tracing::debug!(expected = len, received = code.len(), "resolver.net.short_blob");
				return Ok(None);
			}
		}
		Ok(Some(code.freeze()))
	}
}

fn parse_content_length(header: &str) -> Option<usize> {
	let rest = header.strip_prefix(LENGTH_PREFIX)?;
	let (_, len) = rest.split_once(':')?;
	len.trim().parse().ok()
}

#[async_trait]
impl CodeResolver for NetworkResolver {
	async fn find_code(&self, name: &str) -> Option<Bytes> {
		match tokio::time::timeout(self.timeout, self.fetch(name)).await {
			Ok(Ok(code)) => code,
			Ok(Err(err)) => {
				tracing::debug!(address = %self.address, name, error = %err, "resolver.net.io_error");
				None
			}
			Err(_) => {
				tracing::warn!(address = %self.address, name, timeout = ?self.timeout, "resolver.net.timeout");
				None
			}
		}
	}

	fn describe(&self) -> String {
		format!("net:{}", self.address)
	}
}

/// Serves the fetch protocol from `resolver` until `shutdown` fires.
///
/// Blobs that do not start with the container marker are answered with
/// `Error`, since a client could never find their start.
pub async fn serve_code(listener: TcpListener, resolver: Arc<dyn CodeResolver>, shutdown: CancellationToken) -> io::Result<()> {
	loop {
		let (stream, peer) = tokio::select! {
			_ = shutdown.cancelled() => return Ok(()),
			accepted = listener.accept() => accepted?,
		};
		let resolver = Arc::clone(&resolver);
		tokio::spawn(async move {
			if let Err(err) = answer(stream, resolver.as_ref()).await {
				tracing::debug!(%peer, error = %err, "resolver.net.serve_failed");
			}
		});
	}
}

async fn answer(stream: TcpStream, resolver: &dyn CodeResolver) -> io::Result<()> {
	let (read, mut write) = stream.into_split();
	let mut reader = BufReader::new(read);
	let mut request = String::new();
	reader.read_line(&mut request).await?;

	let code = match request.trim_end_matches(['\r', '\n']).strip_prefix(REQUEST_PREFIX) {
		Some(name) => resolver.find_code(name.trim()).await,
		None => None,
	};

	match code {
		Some(code) if code.first() == Some(&CODE_MARKER) => {
			write.write_all(format!("{LENGTH_PREFIX}:{}\n", code.len()).as_bytes()).await?;
			write.write_all(&code).await?;
		}
		Some(_) => {
			tracing::warn!("resolver.net.unmarked_blob");
			write.write_all(format!("{ERROR_REPLY}\n").as_bytes()).await?;
		}
		None => write.write_all(format!("{ERROR_REPLY}\n").as_bytes()).await?,
	}
	write.flush().await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::InMemoryResolver;

	/// Accepts one connection, checks the request line and writes `reply`.
	async fn one_shot_server(reply: Vec<u8>) -> (String, tokio::task::JoinHandle<String>) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let address = listener.local_addr().unwrap().to_string();
		let task = tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			let (read, mut write) = stream.into_split();
			let mut request = String::new();
			BufReader::new(read).read_line(&mut request).await.unwrap();
			write.write_all(&reply).await.unwrap();
			write.flush().await.unwrap();
			request
		});
		(address, task)
	}

	#[tokio::test]
	async fn reads_exact_blob_after_length_header() {
		let mut reply = b"Content-Length:4\n".to_vec();
		reply.extend_from_slice(&[0xCA, 0x01, 0x02, 0x03]);
		let (address, server) = one_shot_server(reply).await;

		let code = NetworkResolver::new(address).find_code("X").await;
		assert_eq!(code.as_deref(), Some(&[0xCA, 0x01, 0x02, 0x03][..]));
		assert_eq!(server.await.unwrap(), "Classname:X\n");
	}

	#[tokio::test]
	async fn skips_noise_before_marker_and_ignores_trailing_bytes() {
		let mut reply = b"Content-Length:3\r\n".to_vec();
		reply.extend_from_slice(&[0x00, 0x7F, 0xCA, 0xFE, 0xBA, 0xBE, 0xEE]);
		let (address, _server) = one_shot_server(reply).await;

		let code = NetworkResolver::new(address).find_code("billing.Ledger").await;
		assert_eq!(code.as_deref(), Some(&[0xCA, 0xFE, 0xBA][..]));
	}

	#[tokio::test]
	async fn error_reply_and_short_stream_resolve_to_none() {
		let (address, _server) = one_shot_server(b"Error\n".to_vec()).await;
		assert!(NetworkResolver::new(address).find_code("X").await.is_none());

		let (address, _server) = one_shot_server(b"Content-Length:8\n\xCA\x01".to_vec()).await;
		assert!(NetworkResolver::new(address).find_code("X").await.is_none());

		let (address, _server) = one_shot_server(b"Content-Length:lots\n".to_vec()).await;
		assert!(NetworkResolver::new(address).find_code("X").await.is_none());
	}

	#[tokio::test]
	async fn oversized_length_resolves_to_none() {
		let (address, _server) = one_shot_server(b"Content-Length:18446744073709551615\n\xCA\x01".to_vec()).await;
		assert!(NetworkResolver::new(address).find_code("X").await.is_none());

		let header = format!("Content-Length:{}\n", MAX_CODE_LEN + 1);
		let mut reply = header.into_bytes();
		reply.extend_from_slice(&[0xCA, 0x01]);
		let (address, _server) = one_shot_server(reply).await;
		assert!(NetworkResolver::new(address).find_code("X").await.is_none());
	}

	#[tokio::test]
	async fn silent_server_hits_timeout() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let address = listener.local_addr().unwrap().to_string();
		let _hold = tokio::spawn(async move {
			let (_stream, _) = listener.accept().await.unwrap();
			std::future::pending::<()>().await;
		});

		let resolver = NetworkResolver::new(address).with_timeout(Duration::from_millis(50));
		assert!(resolver.find_code("X").await.is_none());
	}

	#[tokio::test]
	async fn serve_code_answers_the_client_half() {
		let backing = InMemoryResolver::new()
			.with("Echo", vec![0xCA, 0x10, 0x20])
			.with("Unmarked", &b"plain"[..]);
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let address = listener.local_addr().unwrap().to_string();
		let shutdown = CancellationToken::new();
		let server = tokio::spawn(serve_code(listener, Arc::new(backing), shutdown.clone()));

		let client = NetworkResolver::new(address);
		assert_eq!(client.find_code("Echo").await.as_deref(), Some(&[0xCA, 0x10, 0x20][..]));
		assert!(client.find_code("Unmarked").await.is_none());
		assert!(client.find_code("Missing").await.is_none());

		shutdown.cancel();
		server.await.unwrap().unwrap();
	}
}
