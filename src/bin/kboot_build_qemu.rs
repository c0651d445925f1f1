//! kboot-build-qemu - Creates a QEMU disk image from a bootfs
//!
//! The image is meant for booting a freshly built kernel under QEMU.

use std::path::PathBuf;

use clap::Parser;

use kboot::commands::{self, qemu::QemuOptions};
use kboot::core::{config::defaults, utils};

#[derive(Parser)]
#[command(name = "kboot-build-qemu")]
#[command(about = "Generate QEMU image from root filesystem", long_about = None)]
#[command(version)]
struct Cli {
    /// Root filesystem path
    #[arg(short, long)]
    bootfs: PathBuf,

    /// Output rootfs image name
    #[arg(short, long)]
    rootfs: Option<PathBuf>,

    /// Image size
    #[arg(short, long, default_value = defaults::IMAGE_SIZE)]
    size: String,

    /// Overwrite an existing image without asking
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
        utils::print_banner("kboot-build-qemu", "raw ext3 images from a bootfs");
    }

    let options = QemuOptions {
        rootfs: cli.rootfs,
        size: cli.size,
        ..Default::default()
    };

    if let Err(e) = commands::qemu::run(cli.bootfs, options, cli.yes) {
        utils::print_error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
}
