//! Command bootfs - Builds a root filesystem with debootstrap
//!
//! The produced tree carries its own configuration in `etc/bootstrap.conf`
//! with `arch_current` filled in, which the Docker and QEMU builders read back.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use colored::*;
use tracing::info;

use crate::core::builder::{self, BuildReport};
use crate::core::config::{Configuration, defaults, tools, tree_paths};
use crate::core::error::{Error, IoContext, Result};
use crate::core::runner::{AssumeYes, Confirm, HostRunner, Runner, StdinConfirm, args};
use crate::core::utils;

const NAMESERVERS: &[&str] = &["8.8.8.8", "8.8.4.4"];

/// Directories every bootfs gets, relative to its root
const EXTRA_DIRS: &[&str] = &["root/.ssh", "var/log", "tmp"];

#[derive(Debug, Clone, Default)]
pub struct BootfsOptions {
    /// Target architecture; resolved from the configuration or host when unset
    pub arch: Option<String>,
    /// Parent directory of the bootfs; current directory when unset
    pub output_dir: Option<PathBuf>,
}

pub struct BootfsBuilder<'a> {
    config: Configuration,
    options: BootfsOptions,
    runner: &'a dyn Runner,
    confirm: &'a dyn Confirm,
}

impl<'a> BootfsBuilder<'a> {
    pub fn new(
        config: Configuration,
        options: BootfsOptions,
        runner: &'a dyn Runner,
        confirm: &'a dyn Confirm,
    ) -> Self {
        Self {
            config,
            options,
            runner,
            confirm,
        }
    }

    pub fn build(mut self) -> Result<BuildReport> {
        builder::check_root(self.runner)?;
        builder::check_dependencies(self.runner, &[tools::DEBOOTSTRAP, tools::CHROOT])?;

        let arch = self.resolve_arch()?;
        utils::print_field("Target architecture", &arch);
        self.check_setup_script()?;

        let target = self.target_path(&arch);
        builder::clear_existing(&target, self.confirm)?;
        builder::create_dir_all(&target)?;

        self.debootstrap(&arch, &target)?;

        let mut report = BuildReport {
            artifact: target.display().to_string(),
            ..Default::default()
        };
        self.configure_system(&target, &mut report);
        self.install_setup_script(&target)?;

        self.config.arch_current = Some(arch);
        self.config.persist(&target)?;

        info!(bootfs = %target.display(), warnings = report.warnings.len(), "bootfs built");
        Ok(report)
    }

    /// Pick the architecture to bootstrap.
    ///
    /// Order: caller, configuration's recorded arch, host arch if supported,
    /// first supported arch. The result must be in `arch_supported`.
    pub fn resolve_arch(&self) -> Result<String> {
        let arch = match (&self.options.arch, &self.config.arch_current) {
            (Some(arch), _) | (None, Some(arch)) => arch.clone(),
            (None, None) => {
                let host = builder::host_arch(self.runner);
                if self.config.validate_arch(&host) {
                    host
                } else {
                    self.config
                        .arch_supported
                        .first()
                        .cloned()
                        .ok_or_else(|| Error::Architecture("cannot determine architecture".into()))?
                }
            }
        };

        if !self.config.validate_arch(&arch) {
            return Err(Error::Architecture(format!(
                "unsupported architecture: {}, supported architectures: {}",
                arch,
                self.config.arch_supported.join(", ")
            )));
        }
        Ok(arch)
    }

    /// `<output>/<distribution>-<version>-<arch>-bootfs`
    pub fn target_path(&self, arch: &str) -> PathBuf {
        let output = self
            .options
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        output.join(self.config.bootfs_name(arch))
    }

    pub fn debootstrap_args(&self, arch: &str, target: &Path) -> Vec<String> {
        let mut argv = vec![
            format!("--arch={}", arch),
            format!("--variant={}", defaults::VARIANT),
        ];
        if self.config.is_legacy() {
            argv.push("--no-check-gpg".into());
        }

        let packages = self.config.all_packages();
        if !packages.is_empty() {
            argv.push(format!("--include={}", packages.join(",")));
        }

        argv.push(self.config.suite().to_string());
        argv.push(target.display().to_string());
        argv.push(self.config.mirror.clone());
        argv
    }

    fn debootstrap(&self, arch: &str, target: &Path) -> Result<()> {
        utils::print_step("Running debootstrap...");
        self.runner
            .run(tools::DEBOOTSTRAP, &self.debootstrap_args(arch, target))
            .map_err(|e| Error::Bootstrap(e.to_string()))?;
        utils::print_success("debootstrap finished");
        Ok(())
    }

    /// Development-friendly defaults; each step is best-effort.
    fn configure_system(&self, target: &Path, report: &mut BuildReport) {
        utils::print_step("Configuring system...");

        let hostname = format!("{}-{}", self.config.distribution, self.config.version);
        report.best_effort(
            "failed to set hostname",
            write_file(&target.join("etc/hostname"), &format!("{}\n", hostname)),
        );
        report.best_effort(
            "failed to set hosts",
            write_file(&target.join("etc/hosts"), &hosts_file(&hostname)),
        );

        report.best_effort(
            "failed to clear root password",
            self.chroot(target, "passwd", &["-d", "root"]),
        );

        report.best_effort(
            "failed to set DNS",
            write_file(&target.join("etc/resolv.conf"), &resolv_conf()),
        );
        let network = target.join("etc/network");
        report.best_effort(
            "failed to configure network",
            builder::create_dir_all(&network)
                .and_then(|_| write_file(&network.join("interfaces"), INTERFACES)),
        );

        for dir in EXTRA_DIRS {
            report.best_effort(
                &format!("failed to create /{}", dir),
                builder::create_dir_all(&target.join(dir)),
            );
        }
    }

    /// Fail before anything is removed or bootstrapped.
    fn check_setup_script(&self) -> Result<()> {
        match self.config.setup_script_path() {
            Some(script) if !script.is_file() => {
                Err(Error::ScriptInstall(format!("{} not found", script.display())))
            }
            _ => Ok(()),
        }
    }

    fn install_setup_script(&self, target: &Path) -> Result<()> {
        let Some(script) = self.config.setup_script_path() else {
            return Ok(());
        };

        utils::print_step(&format!("Installing setup script {}...", script.display()));
        builder::install_file(&script, &target.join(tree_paths::SETUP_SCRIPT), 0o755)
            .map_err(|e| Error::ScriptInstall(e.to_string()))
    }

    fn chroot(&self, target: &Path, program: &str, rest: &[&str]) -> Result<()> {
        let mut argv = args([target.display().to_string(), program.to_string()]);
        argv.extend(rest.iter().map(|s| s.to_string()));
        self.runner.run(tools::CHROOT, &argv)
    }
}

const INTERFACES: &str = "\
auto lo
iface lo inet loopback

auto eth0
iface eth0 inet dhcp
";

fn hosts_file(hostname: &str) -> String {
    format!(
        "127.0.0.1\tlocalhost\n\
         127.0.1.1\t{}\n\
         \n\
         # IPv6\n\
         ::1\t\tlocalhost ip6-localhost ip6-loopback\n\
         ff02::1\t\tip6-allnodes\n\
         ff02::2\t\tip6-allrouters\n",
        hostname
    )
}

fn resolv_conf() -> String {
    NAMESERVERS
        .iter()
        .map(|ns| format!("nameserver {}\n", ns))
        .collect()
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).io_context(|| format!("failed to write {}", path.display()))
}

/// `kboot-build-bootfs` entry point
pub fn run(config_file: &Path, options: BootfsOptions, assume_yes: bool) -> anyhow::Result<()> {
    println!("{}", "🏗  Building bootfs...".bright_yellow());

    let config = Configuration::load(config_file)
        .with_context(|| format!("failed to load {}", config_file.display()))?;

    println!("Configuration:");
    utils::print_field(
        "Distribution",
        &format!("{} {}", config.distribution, config.version),
    );
    utils::print_field("Supported architectures", &config.arch_supported.join(", "));
    utils::print_field("Mirror", &config.mirror);

    let runner = HostRunner::new()?;
    let confirm: &dyn Confirm = if assume_yes { &AssumeYes } else { &StdinConfirm };

    let report = BootfsBuilder::new(config, options, &runner, confirm)
        .build()
        .context("build failed")?;

    println!();
    utils::print_success(&format!("Bootfs build successful: {}", report.artifact));
    if !report.warnings.is_empty() {
        utils::print_info(&format!("{} step(s) completed with warnings", report.warnings.len()));
    }
    Ok(())
}
