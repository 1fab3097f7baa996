use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use tracing_subscriber::EnvFilter;

use tftpd::{Directory, Server, ServerConfig, TransferConfig};

#[derive(FromArgs, Debug)]
/// Read-only TFTP server.
struct Args {
    /// address to listen on
    #[argh(option, short = 'b', default = "\"0.0.0.0:6969\".to_string()")]
    bind: String,

    /// directory to serve files from
    #[argh(option, short = 'r', default = "PathBuf::from(\".\")")]
    root: PathBuf,

    /// seconds to wait for an acknowledgement before retransmitting
    #[argh(option, default = "3")]
    timeout: u64,

    /// retransmissions of a block before giving up on a client
    #[argh(option, default = "tftpd::DEFAULT_MAX_RETRIES")]
    retries: usize,

    /// bytes of file content per data packet
    #[argh(option, default = "tftpd::packet::BLOCK_SIZE")]
    block_size: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Args = argh::from_env();

    let transfer = TransferConfig::new(Duration::from_secs(args.timeout), args.retries, args.block_size)
        .context("invalid transfer configuration")?;
    let config = ServerConfig {
        transfer,
        ..ServerConfig::default()
    };

    let root = Directory::new(&args.root)
        .with_context(|| format!("cannot serve {}", args.root.display()))?;
    let server = Server::with_config(&args.bind, root, config)
        .with_context(|| format!("cannot bind {}", args.bind))?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || shutdown.trigger()).context("cannot install Ctrl-C handler")?;

    println!(
        "Serving Trivial File Transfer Protocol (TFTP) @ {}",
        server.local_addr()?
    );
    server.run()?;

    Ok(())
}
