use std::io::{self, Write};

use anyhow::{Context, Result};
use argh::FromArgs;
use tracing_subscriber::EnvFilter;

use tftpd::Client;

#[derive(FromArgs, Debug)]
/// Fetches a file from a TFTP server and writes it to stdout.
struct Args {
    /// server address, e.g. 127.0.0.1:6969
    #[argh(positional)]
    server: String,

    /// file to fetch
    #[argh(positional)]
    file: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Args = argh::from_env();

    let client = Client::new(&args.server).with_context(|| format!("cannot reach {}", args.server))?;
    let mut stdout = client
        .get(&args.file, io::stdout())
        .with_context(|| format!("cannot fetch {}", args.file))?;
    stdout.flush()?;

    Ok(())
}
