//! Command docker - Packages a bootfs tree as a Docker image

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use colored::*;
use tracing::info;

use crate::core::builder::{self, BuildReport};
use crate::core::config::{Configuration, tools};
use crate::core::error::{Error, IoContext, Result};
use crate::core::runner::{HostRunner, Runner, args};
use crate::core::utils;

/// Generated Dockerfiles start with this name and are deleted after the build
const GENERATED_DOCKERFILE: &str = "Dockerfile.tmp";

#[derive(Debug, Clone, Default)]
pub struct DockerOptions {
    /// Existing Dockerfile; one is generated when unset or missing
    pub dockerfile: Option<PathBuf>,
    /// Image tag; `<distribution>-<version>-<arch>` when unset
    pub image: Option<String>,
}

pub struct DockerBuilder<'a> {
    config: Configuration,
    bootfs: PathBuf,
    options: DockerOptions,
    runner: &'a dyn Runner,
}

impl<'a> DockerBuilder<'a> {
    /// Load the configuration persisted in `bootfs`.
    pub fn new(bootfs: PathBuf, options: DockerOptions, runner: &'a dyn Runner) -> Result<Self> {
        let config = Configuration::load_from_tree(&bootfs)?;
        Ok(Self {
            config,
            bootfs,
            options,
            runner,
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn build(self) -> Result<BuildReport> {
        builder::check_root(self.runner)?;
        builder::check_tree(&self.bootfs)?;

        let arch = builder::tree_arch(&self.config, &self.bootfs);
        let image = self
            .options
            .image
            .clone()
            .unwrap_or_else(|| self.config.image_name(&arch));

        let dockerfile = self.dockerfile(&arch)?;

        let mut report = BuildReport {
            artifact: image.clone(),
            ..Default::default()
        };

        let result = self.build_image(&image, &dockerfile);
        if is_generated(&dockerfile) {
            report.best_effort(
                "failed to remove temporary Dockerfile",
                fs::remove_file(&dockerfile)
                    .io_context(|| format!("failed to remove {}", dockerfile.display())),
            );
        }
        result?;

        report.best_effort(
            "failed to list image",
            self.runner.run(tools::DOCKER, &args(["images", image.as_str()])),
        );

        info!(image = %image, "docker image built");
        Ok(report)
    }

    /// Path of the Dockerfile to build with, generating one if needed.
    fn dockerfile(&self, arch: &str) -> Result<PathBuf> {
        if let Some(path) = self.options.dockerfile.as_ref().filter(|p| p.is_file()) {
            utils::print_info(&format!("Using existing Dockerfile: {}", path.display()));
            return Ok(path.clone());
        }

        let path = builder::parent_dir(&self.bootfs).join(GENERATED_DOCKERFILE);
        fs::write(&path, render_dockerfile(&self.config, arch))
            .io_context(|| format!("failed to create Dockerfile {}", path.display()))?;
        utils::print_info(&format!("Created temporary Dockerfile: {}", path.display()));
        Ok(path)
    }

    fn build_image(&self, image: &str, dockerfile: &Path) -> Result<()> {
        utils::print_step(&format!("Building Docker image: {}", image));

        // The bootfs itself is the build context, so `ADD . /` copies the tree.
        let argv = args([
            "build".to_string(),
            "-t".to_string(),
            image.to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            self.bootfs.display().to_string(),
        ]);
        self.runner
            .run(tools::DOCKER, &argv)
            .map_err(|e| Error::Build(format!("failed to build Docker image: {}", e)))
    }
}

fn is_generated(dockerfile: &Path) -> bool {
    dockerfile
        .file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with(GENERATED_DOCKERFILE))
}

fn render_dockerfile(config: &Configuration, arch: &str) -> String {
    format!(
        r#"FROM scratch

ADD . /

ARG DEBIAN_FRONTEND=noninteractive

ENV PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin
ENV ARCH={arch}
ENV DISTRIBUTION={distribution}
ENV VERSION={version}
ENV LANG=C.UTF-8
ENV LC_ALL=C.UTF-8

WORKDIR /root

CMD ["/bin/bash"]
"#,
        arch = arch,
        distribution = config.distribution,
        version = config.version,
    )
}

/// Outermost context of a failed `run`
const FAILURE: &str = "Docker image not built";

/// `kboot-build-docker` entry point
pub fn run(bootfs: PathBuf, options: DockerOptions) -> anyhow::Result<()> {
    println!("{}", "🐳 Building Docker image...".bright_yellow());

    let runner = HostRunner::new()?;
    let builder = DockerBuilder::new(bootfs.clone(), options, &runner)?;

    let config = builder.config();
    println!("Configuration:");
    utils::print_field(
        "Distribution",
        &format!("{} {}", config.distribution, config.version),
    );
    utils::print_field(
        "Architecture",
        config.arch_current.as_deref().unwrap_or("(not recorded)"),
    );
    utils::print_field("Bootfs", &bootfs.display().to_string());

    let report = builder.build().context(FAILURE)?;

    println!();
    utils::print_success(&format!("Docker image build successful: {}", report.artifact));
    println!("   Usage: docker run -it --rm {} /bin/bash", report.artifact);
    Ok(())
}
