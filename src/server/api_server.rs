//! HTTP front-end of the object server. Replication traffic arrives as
//! the custom `SSYNC` method on `/<device>/<partition>`; everything else
//! is refused here (client-facing object APIs are served elsewhere).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::Future;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};

use crate::error::Error;
use crate::object_handlers::ObjectServer;
use crate::receiver::handle_ssync;

pub async fn run_api_server(
	server: Arc<ObjectServer>,
	shutdown_signal: impl Future<Output = ()>,
) -> Result<(), Error> {
	let addr = server.config.bind_addr;

	let service = make_service_fn(|conn: &AddrStream| {
		let server = server.clone();
		let peer = conn.remote_addr();
		async move {
			Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
				let server = server.clone();
				handler(server, req, peer)
			}))
		}
	});

	let http_server = Server::bind(&addr).serve(service);

	info!("Object server listening on http://{}", addr);

	http_server.with_graceful_shutdown(shutdown_signal).await?;
	Ok(())
}

async fn handler(
	server: Arc<ObjectServer>,
	req: Request<Body>,
	peer: SocketAddr,
) -> Result<Response<Body>, Infallible> {
	info!("{} {} {}", peer, req.method(), req.uri());

	match handler_inner(server, req, peer).await {
		Ok(x) => {
			debug!("{} {:?}", x.status(), x.headers());
			Ok(x)
		}
		Err(e) => {
			let body: Body = Body::from(format!("{}\n", e));
			let mut http_error = Response::new(body);
			*http_error.status_mut() = e.http_status_code();
			warn!("Response: error {}, {}", e.http_status_code(), e);
			Ok(http_error)
		}
	}
}

async fn handler_inner(
	server: Arc<ObjectServer>,
	req: Request<Body>,
	peer: SocketAddr,
) -> Result<Response<Body>, Error> {
	if req.method().as_str() == "SSYNC" {
		let handler = server.clone();
		handle_ssync(server, handler, req, Some(peer)).await
	} else {
		Err(Error::MethodNotAllowed)
	}
}
