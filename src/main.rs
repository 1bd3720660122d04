//! hello-server: a thread-per-connection TCP server
//!
//! Every client gets the same treatment:
//! - one request is read (request line plus header lines)
//! - the fixed reply `HTTP/1.1 200 OK` / `Hello!` is sent
//! - the connection is closed
//!
//! Features:
//! - One worker thread per connection, bounded by `max_workers`
//! - Interactive shutdown on Ctrl-C that waits for in-flight workers
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod console;
mod listener;
mod pool;
mod reply;
mod request;
mod server;
mod shutdown;

use config::Config;
use server::Server;
use shutdown::Confirmation;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stdout)
        .init();

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        max_workers = config.max_workers,
        buffer_size = config.buffer_size,
        confirm_shutdown = config.confirm_shutdown,
        "Starting hello-server"
    );

    let listener = match listener::open(&config.listen, config.backlog) {
        Ok(listener) => listener,
        Err(e) => console::fatal(&e, || {}),
    };

    let mut server = Server::new(listener, &config)?;

    let confirmation = if config.confirm_shutdown {
        Confirmation::Prompt
    } else {
        Confirmation::Skip
    };
    if let Err(e) = shutdown::watch(server.shutdown_handle(), confirmation) {
        console::fatal(&e, || {
            server.teardown();
        });
    }

    match server.run() {
        Ok(report) => {
            info!(
                joined = report.workers.joined,
                failed = report.workers.failed,
                "Exiting"
            );
            Ok(())
        }
        Err(e) => console::fatal(&e, || {
            server.teardown();
        }),
    }
}
