//! `siemdb-server <port> <workers>` — binds a listening socket and serves
//! the document protocol until killed. Exits 1 if the bind fails.

use clap::Parser;
use tracing::error;

use siemdb_server::ConnectionManager;

/// Document database server.
#[derive(Parser)]
#[command(name = "siemdb-server")]
#[command(about = "TCP server for the siemdb document protocol")]
struct Args {
    /// Port to listen on.
    port: u16,

    /// Number of worker tasks draining the request queue.
    workers: usize,

    /// Directory under which per-database subdirectories are created.
    #[arg(long, default_value = "./data")]
    data_dir: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let manager = ConnectionManager::new(args.data_dir, args.workers);
    if let Err(e) = manager.run(args.port).await {
        error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
