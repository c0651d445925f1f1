//! kboot-build-docker - Creates a Docker image from a bootfs
//!
//! The image is meant as a kernel compilation environment.

use std::path::PathBuf;

use clap::Parser;

use kboot::commands::{self, docker::DockerOptions};
use kboot::core::utils;

#[derive(Parser)]
#[command(name = "kboot-build-docker")]
#[command(about = "Generate Docker image from root filesystem", long_about = None)]
#[command(version)]
struct Cli {
    /// Root filesystem path
    #[arg(short, long)]
    bootfs: PathBuf,

    /// Dockerfile path
    #[arg(short = 'f', long)]
    dockerfile: Option<PathBuf>,

    /// Image name (format: name:tag)
    #[arg(long)]
    image: Option<String>,

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
        utils::print_banner("kboot-build-docker", "Docker images from a bootfs");
    }

    let options = DockerOptions {
        dockerfile: cli.dockerfile,
        image: cli.image.filter(|i| !i.is_empty()),
    };

    if let Err(e) = commands::docker::run(cli.bootfs, options) {
        utils::print_error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
}
