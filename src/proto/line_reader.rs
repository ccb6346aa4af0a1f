//! Chunked, timeout-bounded reading of CRLF-delimited lines and
//! fixed-length opaque bodies from an HTTP request body stream.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use err_derive::Error;
use futures_util::StreamExt;
use hyper::Body;
use tokio::time::timeout;

/// Errors surfaced by the reader. Every read carries a label naming the
/// protocol element it was waiting for, so failures can be reported with
/// the phase they interrupted.
#[derive(Debug, Error)]
pub enum WireError {
	#[error(display = "{} seconds: {}", secs, label)]
	Timeout { secs: f64, label: String },

	#[error(display = "Early termination for {}", _0)]
	UnexpectedEof(String),

	#[error(display = "{}", _0)]
	Transport(String),
}

pub struct LineReader {
	body: Body,
	buf: BytesMut,
	eof: bool,
	timeout: Duration,
	chunk_size: usize,
}

impl LineReader {
	pub fn new(body: Body, client_timeout: Duration, chunk_size: usize) -> Self {
		Self {
			body,
			buf: BytesMut::new(),
			eof: false,
			timeout: client_timeout,
			chunk_size,
		}
	}

	/// Read one line including its terminator. Returns an empty buffer at
	/// end of stream; a line longer than the chunk size is returned
	/// truncated, terminator-less.
	pub async fn read_line(&mut self, label: &str) -> Result<Bytes, WireError> {
		loop {
			if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
				return Ok(self.buf.split_to(pos + 1).freeze());
			}
			if self.buf.len() >= self.chunk_size {
				return Ok(self.buf.split_to(self.chunk_size).freeze());
			}
			if self.eof {
				return Ok(self.buf.split().freeze());
			}
			self.fill(label).await?;
		}
	}

	/// Read exactly `n` opaque bytes
	pub async fn read_exact(&mut self, n: usize, label: &str) -> Result<Bytes, WireError> {
		while self.buf.len() < n {
			if self.eof {
				return Err(WireError::UnexpectedEof(label.to_string()));
			}
			self.fill(label).await?;
		}
		Ok(self.buf.split_to(n).freeze())
	}

	async fn fill(&mut self, label: &str) -> Result<(), WireError> {
		match timeout(self.timeout, self.body.next()).await {
			Err(_) => Err(WireError::Timeout {
				secs: self.timeout.as_secs_f64(),
				label: label.to_string(),
			}),
			Ok(None) => {
				self.eof = true;
				Ok(())
			}
			Ok(Some(Ok(chunk))) => {
				self.buf.extend_from_slice(&chunk);
				Ok(())
			}
			Ok(Some(Err(e))) => Err(WireError::Transport(e.to_string())),
		}
	}
}
