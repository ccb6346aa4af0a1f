//! HTTP-level errors of the object server. These cover everything that
//! can fail before a replication session starts streaming; once the
//! stream is open, errors travel in-band as `:ERROR:` lines instead.

use err_derive::Error;
use hyper::StatusCode;

use silo_store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
	/// The request cannot be understood (bad path, bad header)
	#[error(display = "{}", _0)]
	BadRequest(String),

	/// The node cannot serve the request right now
	#[error(display = "{}", _0)]
	ServiceUnavailable(String),

	/// The target device is missing or not mounted
	#[error(display = "{} is not mounted", _0)]
	InsufficientStorage(String),

	#[error(display = "Method not allowed")]
	MethodNotAllowed,

	#[error(display = "{}", _0)]
	Http(#[error(source)] http::Error),

	#[error(display = "{}", _0)]
	Hyper(#[error(source)] hyper::Error),

	#[error(display = "{}", _0)]
	Store(#[error(source)] StoreError),

	#[error(display = "{}", _0)]
	Internal(#[error(source)] silo_util::error::Error),
}

impl Error {
	/// Get the HTTP status code that best represents the meaning of the
	/// error for the client
	pub fn http_status_code(&self) -> StatusCode {
		match self {
			Error::BadRequest(_) => StatusCode::BAD_REQUEST,
			Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
			Error::InsufficientStorage(_) => StatusCode::INSUFFICIENT_STORAGE,
			Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}
