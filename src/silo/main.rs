//! silo node daemon

#[macro_use]
extern crate tracing;

mod server;

use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "silo", about = "silo object store node")]
struct Opt {
	/// Configuration file location
	#[structopt(short = "c", long = "config", default_value = "/etc/silo/silo.toml")]
	pub config_file: PathBuf,
}

#[tokio::main]
async fn main() {
	if std::env::var("RUST_LOG").is_err() {
		std::env::set_var("RUST_LOG", "silo=info")
	}
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
		.init();

	let opt = Opt::from_args();

	if let Err(e) = server::run_server(opt.config_file).await {
		error!("{}", e);
		std::process::exit(1);
	}
}
