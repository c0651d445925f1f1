//! kboot-build-bootfs - Builds a root filesystem for kernel debugging
//!
//! Uses debootstrap to create a minimal Ubuntu tree, which the Docker and
//! QEMU builders package afterwards.

use std::path::PathBuf;

use clap::Parser;

use kboot::commands::{self, bootfs::BootfsOptions};
use kboot::core::utils;

#[derive(Parser)]
#[command(name = "kboot-build-bootfs")]
#[command(about = "Build root filesystem for kernel debugging environment", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Target architecture (e.g. i386, amd64)
    #[arg(short, long)]
    arch: Option<String>,

    /// Output directory (default: current directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Delete an existing bootfs without asking
    #[arg(short, long)]
    yes: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    commands::init_logging(cli.verbose);

    if !cli.quiet {
        utils::print_banner("kboot-build-bootfs", "debootstrap root filesystems");
    }

    let options = BootfsOptions {
        arch: cli.arch.filter(|a| !a.is_empty()),
        output_dir: cli.output,
    };

    if let Err(e) = commands::bootfs::run(&cli.file, options, cli.yes) {
        utils::print_error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
}
