//! CLI entry point over `secfs::format`: formats a fresh SecFs image
//! file at the given path.

use std::path::PathBuf;

use clap::Parser;

use secfs::format::{self, DEFAULT_BLOCKS, DEFAULT_NINODES};

#[derive(Parser)]
#[command(name = "mkfs", about = "Formats a SecFs image file")]
struct Args {
    /// Path of the image file to create (overwritten if it exists).
    image: PathBuf,

    /// Total image size, in blocks.
    #[arg(long, default_value_t = DEFAULT_BLOCKS)]
    blocks: u32,

    /// Number of inodes the image has room for.
    #[arg(long, default_value_t = DEFAULT_NINODES)]
    inodes: u32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    format::format(&args.image, args.blocks, args.inodes).unwrap_or_else(|e| {
        eprintln!("mkfs: {e}");
        std::process::exit(1);
    });
}
