//! Server side of the SSYNC replication exchange.
//!
//! One receiver lives for one `SSYNC /<device>/<partition>` request. It
//! first reconciles the peer's announced fragments against local state
//! (missing-check phase), replying with the wanted-state codes, then
//! applies the peer's PUT/POST/DELETE sub-requests to the local store
//! (updates phase). Once initialization has succeeded the HTTP status is
//! always 200: everything that goes wrong afterwards is reported in-band
//! as an `:ERROR:` line and closes the stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::{Body, Method, Request, StatusCode};
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;

use silo_proto::*;
use silo_store::policy::StoragePolicy;

use crate::error::Error;
use crate::object_handlers::{ObjectServer, SubRequest, UpdateHandler};

const UNPACK_MSG: &str = "not enough values to unpack (expected 2, got 1)";

/// Errors of a running session, mapped to in-band report lines when the
/// stream closes
enum SessionError {
	/// The peer went away cleanly between protocol elements
	Disconnect,
	Timeout { secs: f64, label: String },
	/// A read ended mid-element (most often a truncated sub-request body)
	ReadFailed(String),
	/// Anything the wire grammar forbids
	Protocol(String),
	/// The failure ratio policy fired
	Abort { failures: u64, successes: u64 },
}

impl From<WireError> for SessionError {
	fn from(e: WireError) -> SessionError {
		match e {
			WireError::Timeout { secs, label } => SessionError::Timeout { secs, label },
			WireError::UnexpectedEof(_) => SessionError::ReadFailed(e.to_string()),
			WireError::Transport(msg) => SessionError::Protocol(msg),
		}
	}
}

type LineSender = mpsc::Sender<Result<Bytes, std::io::Error>>;

pub struct Receiver<H: UpdateHandler> {
	server: Arc<ObjectServer>,
	handler: Arc<H>,
	reader: LineReader,
	peer: Option<SocketAddr>,

	device: String,
	partition: String,
	policy: StoragePolicy,
	frag_index: Option<u32>,

	successes: u64,
	failures: u64,

	// held for the whole session to bound concurrent SSYNCs
	_permit: OwnedSemaphorePermit,
}

impl<H: UpdateHandler> Receiver<H> {
	/// Validate the request and claim a replication slot. Any error here
	/// is reported as a plain HTTP error; no framing is emitted.
	pub async fn initialize(
		server: Arc<ObjectServer>,
		handler: Arc<H>,
		req: Request<Body>,
		peer: Option<SocketAddr>,
	) -> Result<Receiver<H>, Error> {
		let path = req.uri().path().to_string();
		let segments: Vec<&str> = path.split('/').collect();
		let (device, partition) = match segments.as_slice() {
			["", device, partition] if !device.is_empty() && !partition.is_empty() => {
				(device.to_string(), partition.to_string())
			}
			_ => return Err(Error::BadRequest(format!("Invalid path: {}", path))),
		};

		let policy = match header_str(&req, "x-backend-storage-policy-index")? {
			None => server.policies.legacy_default().clone(),
			Some(v) => {
				let index: u32 = v.trim().parse().map_err(|_| {
					Error::BadRequest(format!("Invalid X-Backend-Storage-Policy-Index '{}'", v))
				})?;
				server
					.policies
					.get(index)
					.ok_or_else(|| {
						Error::ServiceUnavailable(format!("No policy with index {}", index))
					})?
					.clone()
			}
		};

		// The legacy X-Backend-Ssync-Node-Index header is accepted but
		// never interpreted as a fragment index.
		let frag_index = match header_str(&req, "x-backend-ssync-frag-index")? {
			None => None,
			Some(v) => Some(v.trim().parse::<u32>().map_err(|_| {
				Error::BadRequest(format!("Invalid X-Backend-Ssync-Frag-Index '{}'", v))
			})?),
		};

		let permit = server
			.replication_semaphore
			.clone()
			.try_acquire_owned()
			.map_err(|_| Error::ServiceUnavailable("Service Unavailable".to_string()))?;

		server
			.store
			.check_device(&device)
			.await
			.map_err(|_| Error::InsufficientStorage(device.clone()))?;

		let reader = LineReader::new(
			req.into_body(),
			Duration::from_secs_f64(server.config.client_timeout),
			server.config.network_chunk_size,
		);

		Ok(Receiver {
			server,
			handler,
			reader,
			peer,
			device,
			partition,
			policy,
			frag_index,
			successes: 0,
			failures: 0,
			_permit: permit,
		})
	}

	fn ident(&self) -> String {
		match self.peer {
			Some(addr) => format!("{}/{}/{}", addr.ip(), self.device, self.partition),
			None => format!("-/{}/{}", self.device, self.partition),
		}
	}

	/// Run the session, streaming the framed response into `out`
	pub async fn run(mut self, out: LineSender) {
		// an immediate first chunk lets the peer detect a graceful
		// disconnect before any phase output
		if send(&out, "\r\n").await.is_err() {
			return;
		}

		let _lock = match self
			.server
			.store
			.replication_lock(&self.device, &self.policy, &self.partition)
			.await
		{
			Ok(guard) => guard,
			Err(e) => {
				debug!("{} SSYNC LOCK TIMEOUT: {}", self.ident(), e);
				let _ = send(&out, &error_line(0, &e.to_string())).await;
				return;
			}
		};

		if let Err(e) = self.session(&out).await {
			self.report(&out, e).await;
		}
	}

	async fn session(&mut self, out: &LineSender) -> Result<(), SessionError> {
		self.missing_check(out).await?;
		self.updates(out).await?;
		Ok(())
	}

	async fn report(&self, out: &LineSender, err: SessionError) {
		match err {
			SessionError::Disconnect => {
				error!("ssync client disconnected");
			}
			SessionError::Timeout { secs, label } => {
				let msg = format!("{} seconds: {}", secs, label);
				error!("{} TIMEOUT in ssync.Receiver: {}", self.ident(), msg);
				let _ = send(out, &error_line(408, &msg)).await;
			}
			SessionError::ReadFailed(msg) => {
				error!("{} read failed in ssync.Receiver: {}", self.ident(), msg);
				let _ = send(out, &error_line(0, &msg)).await;
			}
			SessionError::Protocol(msg) => {
				error!("{} EXCEPTION in ssync.Receiver: {}", self.ident(), msg);
				let _ = send(out, &error_line(0, &msg)).await;
			}
			SessionError::Abort {
				failures,
				successes,
			} => {
				let msg = format!("Too many {} failures to {} successes", failures, successes);
				error!("{} EXCEPTION in ssync.Receiver: {}", self.ident(), msg);
				let _ = send(out, &error_line(0, &msg)).await;
			}
		}
	}

	// ---- Missing-check phase ----

	async fn missing_check(&mut self, out: &LineSender) -> Result<(), SessionError> {
		let line = self.reader.read_line("missing_check start").await?;
		if line.is_empty() {
			return Err(SessionError::Disconnect);
		}
		if trim_line(&line) != MISSING_CHECK_START.as_bytes() {
			return Err(looking_for(MISSING_CHECK_START, &line));
		}
		send(out, &marker_line(MISSING_CHECK_START)).await?;

		loop {
			let line = self.reader.read_line("missing_check line").await?;
			if line.is_empty() {
				return Err(SessionError::Disconnect);
			}
			let line = trim_line(&line);
			if line == MISSING_CHECK_END.as_bytes() {
				break;
			}
			if let Some(reply) = self.check_missing(line).await? {
				send(out, &format!("{}\r\n", reply)).await?;
			}
		}
		send(out, &marker_line(MISSING_CHECK_END)).await?;
		Ok(())
	}

	/// Compare one announced row against local state and decide the
	/// reply. When the peer announces a durable fragment we hold
	/// non-durably at the same timestamp, commit ours instead of asking
	/// for a retransmit; if the commit fails the row falls back to a
	/// full `dm` re-request.
	async fn check_missing(&mut self, line: &[u8]) -> Result<Option<String>, SessionError> {
		let remote = decode_missing(line).map_err(|e| SessionError::Protocol(e.to_string()))?;
		let mut local = self
			.server
			.store
			.load_state(
				&self.device,
				&self.policy,
				&self.partition,
				&remote.object_hash,
				self.frag_index,
			)
			.await
			.map_err(|e| SessionError::Protocol(e.to_string()))?;

		if let (Some(frag_index), Some(version)) = (self.frag_index, local.as_mut()) {
			if remote.durable
				&& !version.durable
				&& !version.tombstone
				&& version.ts_data == remote.ts_data
			{
				match self
					.server
					.store
					.mark_durable(
						&self.device,
						&self.policy,
						&self.partition,
						&remote.object_hash,
						remote.ts_data,
						frag_index,
					)
					.await
				{
					Ok(()) => version.durable = true,
					Err(e) => {
						error!(
							"{} EXCEPTION in ssync.Receiver while attempting commit of {}: {}",
							self.ident(),
							remote.object_hash,
							e
						);
						return Ok(encode_wanted(&remote, None));
					}
				}
			}
		}

		let local = local.map(|version| LocalVersion {
			ts_data: version.ts_data,
			ts_meta: if version.tombstone {
				None
			} else {
				Some(version.ts_meta)
			},
			durable: version.durable,
		});
		Ok(encode_wanted(&remote, local.as_ref()))
	}

	// ---- Updates phase ----

	async fn updates(&mut self, out: &LineSender) -> Result<(), SessionError> {
		let line = self.reader.read_line("updates start").await?;
		if line.is_empty() {
			return Err(SessionError::Disconnect);
		}
		if trim_line(&line) != UPDATES_START.as_bytes() {
			return Err(looking_for(UPDATES_START, &line));
		}

		loop {
			let line = self.reader.read_line("updates line").await?;
			if line.is_empty() {
				return Err(SessionError::Disconnect);
			}
			let line = trim_line(&line).to_vec();
			if line == UPDATES_END.as_bytes() {
				break;
			}

			let sub = self.read_subrequest(&line).await?;
			let (method, path) = (sub.method.clone(), sub.path.clone());
			match self.handler.handle(sub).await {
				Ok(status) if status.is_success() => self.successes += 1,
				Ok(status) => {
					self.failures += 1;
					warn!(
						"ssync subrequest failed with {}: {} {}",
						status.as_u16(),
						method,
						path
					);
				}
				Err(e) => {
					self.failures += 1;
					warn!("ssync subrequest failed: {} {}: {}", method, path, e);
				}
			}

			if self.failures >= self.server.config.replication_failure_threshold
				&& (self.failures as f64)
					> self.server.config.replication_failure_ratio * (self.successes as f64)
			{
				return Err(SessionError::Abort {
					failures: self.failures,
					successes: self.successes,
				});
			}
		}

		if self.failures > 0 {
			let msg = format!(
				"ERROR: With :UPDATES: {} failures to {} successes",
				self.failures, self.successes
			);
			send(out, &error_line(500, &msg)).await?;
		} else {
			send(out, &marker_line(UPDATES_START)).await?;
			send(out, &marker_line(UPDATES_END)).await?;
		}
		Ok(())
	}

	/// Parse one embedded sub-request, headers and body included. The
	/// body is consumed in full here, so a failing dispatch can never
	/// leave unread body bytes in front of the next sub-request.
	async fn read_subrequest(&mut self, request_line: &[u8]) -> Result<SubRequest, SessionError> {
		let request_line = String::from_utf8_lossy(request_line).into_owned();
		let (method_name, path) = request_line
			.split_once(' ')
			.ok_or_else(|| SessionError::Protocol(UNPACK_MSG.to_string()))?;
		let method_name = method_name.to_string();
		let path = path.trim().to_string();

		let mut headers: Vec<(String, String)> = vec![];
		loop {
			let line = self.reader.read_line("updates line").await?;
			if line.is_empty() {
				return Err(SessionError::Protocol(format!(
					"Got no headers for {} {}",
					method_name, path
				)));
			}
			let line = trim_line(&line);
			if line.is_empty() {
				break;
			}
			let text = String::from_utf8_lossy(line);
			let (name, value) = text
				.split_once(':')
				.ok_or_else(|| SessionError::Protocol(UNPACK_MSG.to_string()))?;
			headers.push((name.trim().to_lowercase(), value.trim().to_string()));
		}

		let content_length: Option<u64> = headers
			.iter()
			.find(|(name, _)| name == "content-length")
			.map(|(_, value)| value.parse())
			.transpose()
			.map_err(|e: std::num::ParseIntError| SessionError::Protocol(e.to_string()))?;

		let method = match method_name.as_str() {
			"PUT" => Method::PUT,
			"POST" => Method::POST,
			"DELETE" => Method::DELETE,
			other => {
				return Err(SessionError::Protocol(format!(
					"Invalid subrequest method {}",
					other
				)))
			}
		};
		if method == Method::DELETE && content_length.is_some() {
			return Err(SessionError::Protocol(format!(
				"DELETE subrequest with content-length {}",
				path
			)));
		}
		if method == Method::PUT && content_length.is_none() {
			return Err(SessionError::Protocol(format!(
				"No content-length sent for {} {}",
				method_name, path
			)));
		}

		let body = match content_length {
			Some(n) => {
				let label = format!("{} {}", method_name, path);
				match self.reader.read_exact(n as usize, &label).await {
					Ok(body) => body,
					Err(e) => {
						self.failures += 1;
						return Err(e.into());
					}
				}
			}
			None => Bytes::new(),
		};

		// Compose the replication-authoritative header list before the
		// backend headers are injected. Etag and X-Backend-No-Commit are
		// never replication-authoritative.
		let replication_headers = headers
			.iter()
			.map(|(name, _)| name.as_str())
			.filter(|name| *name != "etag" && *name != "x-backend-no-commit")
			.collect::<Vec<_>>()
			.join(" ");
		headers.push((
			"x-backend-storage-policy-index".to_string(),
			self.policy.index.to_string(),
		));
		headers.push(("x-backend-replication".to_string(), "True".to_string()));
		if let Some(frag_index) = self.frag_index {
			headers.push((
				"x-backend-ssync-frag-index".to_string(),
				frag_index.to_string(),
			));
		}
		headers.push(("x-backend-replication-headers".to_string(), replication_headers));

		Ok(SubRequest {
			method,
			path: format!("/{}/{}{}", self.device, self.partition, path),
			headers,
			body,
		})
	}
}

fn looking_for(marker: &str, line: &[u8]) -> SessionError {
	let shown = String::from_utf8_lossy(&line[..std::cmp::min(line.len(), 1024)]);
	SessionError::Protocol(format!("Looking for {} got {:?}", marker, shown))
}

fn header_str<'a>(req: &'a Request<Body>, name: &str) -> Result<Option<&'a str>, Error> {
	match req.headers().get(name) {
		None => Ok(None),
		Some(value) => value
			.to_str()
			.map(Some)
			.map_err(|_| Error::BadRequest(format!("Invalid {} header", name))),
	}
}

async fn send(out: &LineSender, line: &str) -> Result<(), SessionError> {
	out.send(Ok(Bytes::from(line.to_string())))
		.await
		.map_err(|_| SessionError::Disconnect)
}

/// Serve one SSYNC request: initialize a receiver, then stream the
/// session output as a 200 response body
pub async fn handle_ssync<H: UpdateHandler>(
	server: Arc<ObjectServer>,
	handler: Arc<H>,
	req: Request<Body>,
	peer: Option<SocketAddr>,
) -> Result<hyper::Response<Body>, Error> {
	let receiver = Receiver::initialize(server, handler, req, peer).await?;
	let (tx, rx) = mpsc::channel(8);
	tokio::spawn(receiver.run(tx));
	let body = Body::wrap_stream(tokio_stream::wrappers::ReceiverStream::new(rx));
	Ok(hyper::Response::builder()
		.status(StatusCode::OK)
		.body(body)?)
}
