//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use filebridge_host::HostConfig;
use filebridge_transfer::HashAlgorithm;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (created with defaults when missing)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Digest used to verify transfers: md5 or sha256
    #[arg(long, global = true)]
    pub hash: Option<HashAlgorithm>,

    /// Bytes per data chunk
    #[arg(long, global = true, value_name = "BYTES")]
    pub chunk_size: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one file to a peer
    Send {
        /// File to send
        file: PathBuf,

        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Receive files from peers
    Receive {
        #[command(flatten)]
        endpoint: Endpoint,

        /// Directory incoming files are written into
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Accept every offer without asking
        #[arg(short, long)]
        yes: bool,

        /// Ignore partial downloads and start over
        #[arg(long)]
        fresh: bool,

        /// Stop after the first peer disconnects (listen mode)
        #[arg(long)]
        once: bool,
    },
}

/// Where the TCP connection comes from.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct Endpoint {
    /// Dial a listening peer
    #[arg(long, value_name = "ADDR")]
    pub connect: Option<String>,

    /// Wait for a peer on this address
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target<'a> {
    Connect(&'a str),
    Listen(&'a str),
}

impl Endpoint {
    pub fn target(&self) -> Target<'_> {
        match (&self.connect, &self.listen) {
            (Some(addr), _) => Target::Connect(addr),
            (None, Some(addr)) => Target::Listen(addr),
            // The argument group requires exactly one of the two.
            (None, None) => Target::Listen("0.0.0.0:0"),
        }
    }
}

impl Cli {
    /// Applies flag overrides on top of the file configuration.
    pub fn apply(&self, config: &mut HostConfig) {
        if let Some(hash) = self.hash {
            config.transfer.hash_algorithm = hash;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.transfer.chunk_size = chunk_size;
        }
        if let Command::Receive { dir, fresh, .. } = &self.command {
            if let Some(dir) = dir {
                config.transfer.download_dir = dir.clone();
            }
            if *fresh {
                config.transfer.resume_enabled = false;
            }
        }
    }
}
