//! Command qemu - Packages a bootfs tree as a raw ext3 disk image
//!
//! The image has no partition table and no bootloader; boot it with
//! `qemu-system-* -kernel <bzImage> -append root=/dev/sda`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use colored::*;
use tracing::info;

use crate::core::builder::{self, BuildReport};
use crate::core::config::{Configuration, defaults, tools};
use crate::core::error::{Error, IoContext, Result};
use crate::core::mount::{LoopDevice, MountPoint};
use crate::core::runner::{AssumeYes, Confirm, HostRunner, Runner, StdinConfirm, args};
use crate::core::size::parse_size;
use crate::core::utils;

/// Recreated empty in the image after copying
const MOUNT_DIRS: &[&str] = &["proc", "sys", "dev", "tmp", "run"];

/// Live pseudo-filesystem contents never copied from the tree
const EXCLUDES: &[&str] = &["/proc/*", "/sys/*", "/dev/*", "/tmp/*"];

#[derive(Debug, Clone)]
pub struct QemuOptions {
    /// Output image file; `<distribution>-<version>-<arch>-rootfs.img` when unset
    pub rootfs: Option<PathBuf>,
    /// Image size such as `2G`
    pub size: String,
    /// Directory holding the temporary mount point
    pub mount_root: PathBuf,
}

impl Default for QemuOptions {
    fn default() -> Self {
        Self {
            rootfs: None,
            size: defaults::IMAGE_SIZE.to_string(),
            mount_root: std::env::temp_dir(),
        }
    }
}

pub struct QemuBuilder<'a> {
    config: Configuration,
    bootfs: PathBuf,
    options: QemuOptions,
    runner: &'a dyn Runner,
    confirm: &'a dyn Confirm,
}

impl<'a> QemuBuilder<'a> {
    /// Load the configuration persisted in `bootfs`.
    pub fn new(
        bootfs: PathBuf,
        options: QemuOptions,
        runner: &'a dyn Runner,
        confirm: &'a dyn Confirm,
    ) -> Result<Self> {
        let config = Configuration::load_from_tree(&bootfs)?;
        Ok(Self {
            config,
            bootfs,
            options,
            runner,
            confirm,
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn build(self) -> Result<BuildReport> {
        builder::check_root(self.runner)?;
        builder::check_dependencies(
            self.runner,
            &[tools::QEMU_IMG, tools::LOSETUP, tools::MKFS, tools::MOUNT, tools::UMOUNT],
        )?;
        builder::check_tree(&self.bootfs)?;
        let bytes = parse_size(&self.options.size)?;

        let image = match &self.options.rootfs {
            Some(path) => path.clone(),
            None => {
                let arch = builder::tree_arch(&self.config, &self.bootfs);
                PathBuf::from(self.config.rootfs_name(&arch))
            }
        };

        let mut report = BuildReport {
            artifact: image.display().to_string(),
            ..Default::default()
        };

        builder::clear_existing(&image, self.confirm)?;
        self.create_image(&image, bytes)?;
        self.format_image(&image)?;

        {
            utils::print_step("Mounting image...");
            let mount_path = self
                .options
                .mount_root
                .join(format!("qemu-mount-{}", std::process::id()));
            let mnt = MountPoint::mount(self.runner, &image, mount_path)?;
            self.copy_rootfs(mnt.path(), &mut report)?;
            self.install_bootloader(mnt.path());
        }

        info!(image = %image.display(), bytes, "qemu image built");
        Ok(report)
    }

    fn create_image(&self, image: &Path, bytes: u64) -> Result<()> {
        utils::print_step(&format!(
            "Creating image file: {} (size: {})",
            image.display(),
            self.options.size
        ));
        let argv = args([
            "create".to_string(),
            "-f".to_string(),
            "raw".to_string(),
            image.display().to_string(),
            bytes.to_string(),
        ]);
        self.runner
            .run(tools::QEMU_IMG, &argv)
            .map_err(|e| Error::Build(format!("failed to create image: {}", e)))
    }

    fn format_image(&self, image: &Path) -> Result<()> {
        utils::print_step("Formatting image as ext3...");
        let dev = LoopDevice::attach(self.runner, image)?;
        self.runner
            .run(tools::MKFS, &args(["-F", dev.device()]))
            .map_err(|e| Error::Build(format!("formatting failed: {}", e)))
    }

    fn copy_rootfs(&self, mount: &Path, report: &mut BuildReport) -> Result<()> {
        utils::print_step("Copying root filesystem to image...");

        let (program, argv) = if self.runner.exists(tools::RSYNC) {
            let mut argv = vec!["-a".to_string()];
            argv.extend(EXCLUDES.iter().map(|e| format!("--exclude={}", e)));
            argv.push(format!("{}/", self.bootfs.display()));
            argv.push(format!("{}/", mount.display()));
            (tools::RSYNC, argv)
        } else {
            let mut argv = vec!["-a".to_string()];
            argv.extend(self.copy_entries()?.iter().map(|p| p.display().to_string()));
            argv.push(format!("{}/", mount.display()));
            (tools::CP, argv)
        };
        // cp with only `-a` and the destination would be an error
        if argv.len() > 2 {
            self.runner
                .run(program, &argv)
                .map_err(|e| Error::Build(format!("failed to copy files: {}", e)))?;
        }

        for dir in MOUNT_DIRS {
            report.best_effort(
                &format!("failed to create /{}", dir),
                builder::create_dir_all(&mount.join(dir)),
            );
        }
        let tmp = mount.join("tmp");
        report.best_effort(
            "failed to set /tmp permissions",
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o1777))
                .map_err(|e| Error::io(format!("chmod {}", tmp.display()), e)),
        );
        Ok(())
    }

    /// Top-level entries of the tree, minus the directories in `EXCLUDES`.
    fn copy_entries(&self) -> Result<Vec<PathBuf>> {
        let read = fs::read_dir(&self.bootfs)
            .io_context(|| format!("failed to read {}", self.bootfs.display()))?;

        let mut entries = Vec::new();
        for entry in read {
            let entry =
                entry.io_context(|| format!("failed to read {}", self.bootfs.display()))?;
            let name = entry.file_name();
            if is_excluded(&name.to_string_lossy()) {
                continue;
            }
            entries.push(entry.path());
        }
        entries.sort();
        Ok(entries)
    }

    fn install_bootloader(&self, _mount: &Path) {
        utils::print_info("Skipping bootloader installation, use -kernel parameter to start QEMU");
    }
}

fn is_excluded(name: &str) -> bool {
    EXCLUDES
        .iter()
        .any(|e| e.strip_prefix('/').and_then(|e| e.strip_suffix("/*")) == Some(name))
}

/// Outermost context of a failed `run`
const FAILURE: &str = "QEMU image not built";

/// `kboot-build-qemu` entry point
pub fn run(bootfs: PathBuf, options: QemuOptions, assume_yes: bool) -> anyhow::Result<()> {
    println!("{}", "💽 Building QEMU image...".bright_yellow());

    let runner = HostRunner::new()?;
    let confirm: &dyn Confirm = if assume_yes { &AssumeYes } else { &StdinConfirm };
    let size = options.size.clone();
    let builder = QemuBuilder::new(bootfs.clone(), options, &runner, confirm)?;

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
    utils::print_field("Image size", &size);

    let report = builder.build().context(FAILURE)?;

    println!();
    utils::print_success(&format!("QEMU image build successful: {}", report.artifact));
    println!("   Size: {}", size);
    println!("   Usage:");
    println!(
        "   qemu-system-x86_64 -kernel <bzImage> -hda {} -append \"root=/dev/sda\" \
         -m 1024 -enable-kvm",
        report.artifact
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::testing::{Answer, FakeRunner};

    struct Fixture {
        dir: tempfile::TempDir,
        tree: PathBuf,
    }

    impl Fixture {
        fn new(arch_current: Option<&str>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let tree = dir.path().join("ubuntu-22.04-i386-bootfs");
            fs::create_dir_all(&tree).unwrap();
            let mut config = Configuration::parse(
                "[ubuntu]\ndistribution = Ubuntu\nversion = 22.04\narch_supported = amd64, i386\n",
            )
            .unwrap();
            config.arch_current = arch_current.map(String::from);
            config.persist(&tree).unwrap();
            Self { dir, tree }
        }

        fn options(&self) -> QemuOptions {
            QemuOptions {
                rootfs: None,
                size: "512M".into(),
                mount_root: self.dir.path().to_path_buf(),
            }
        }

        fn mount_path(&self) -> PathBuf {
            self.dir.path().join(format!("qemu-mount-{}", std::process::id()))
        }
    }

    fn runner() -> FakeRunner {
        let mut runner = FakeRunner::new();
        runner.outputs.push(("losetup", "/dev/loop3".into()));
        runner
    }

    #[test]
    fn full_sequence() {
        let fx = Fixture::new(Some("amd64"));
        let runner = runner();
        let mut options = fx.options();
        let image = fx.dir.path().join("disk.img");
        options.rootfs = Some(image.clone());

        QemuBuilder::new(fx.tree.clone(), options, &runner, &Answer(true))
            .unwrap()
            .build()
            .unwrap();

        let mnt = fx.mount_path();
        let calls = runner.calls();
        assert_eq!(
            calls,
            vec![
                format!("qemu-img create -f raw {} {}", image.display(), 512 * 1024 * 1024),
                "losetup -f".to_string(),
                format!("losetup /dev/loop3 {}", image.display()),
                "mkfs.ext3 -F /dev/loop3".to_string(),
                "losetup -d /dev/loop3".to_string(),
                format!("mount -o loop {} {}", image.display(), mnt.display()),
                format!(
                    "rsync -a --exclude=/proc/* --exclude=/sys/* --exclude=/dev/* --exclude=/tmp/* {}/ {}/",
                    fx.tree.display(),
                    mnt.display()
                ),
                format!("umount {}", mnt.display()),
            ]
        );
        // Nothing was really mounted, so the recreated directories stay behind
        assert!(mnt.join("proc").is_dir());
        assert!(mnt.join("run").is_dir());
    }

    #[test]
    fn names_image_from_recorded_arch() {
        let fx = Fixture::new(Some("amd64"));
        let runner = runner();

        let report = QemuBuilder::new(fx.tree.clone(), fx.options(), &runner, &Answer(true))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(report.artifact, "ubuntu-22.04-amd64-rootfs.img");
    }

    #[test]
    fn names_image_from_directory_when_unrecorded() {
        let fx = Fixture::new(None);
        let runner = runner();

        let report = QemuBuilder::new(fx.tree.clone(), fx.options(), &runner, &Answer(true))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(report.artifact, "ubuntu-22.04-i386-rootfs.img");
    }

    #[test]
    fn releases_resources_when_copy_fails() {
        let fx = Fixture::new(Some("amd64"));
        let mut runner = runner();
        runner.failing.push("rsync");
        let mut options = fx.options();
        options.rootfs = Some(fx.dir.path().join("disk.img"));

        let err = QemuBuilder::new(fx.tree.clone(), options, &runner, &Answer(true))
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Build(_)));

        let detach = runner.position("losetup -d /dev/loop3").unwrap();
        let copy = runner.position("rsync").unwrap();
        let umount = runner.position("umount").unwrap();
        assert!(detach < copy);
        assert!(copy < umount);
        assert!(!fx.mount_path().exists());
    }

    #[test]
    fn detaches_loop_device_when_format_fails() {
        let fx = Fixture::new(Some("amd64"));
        let mut runner = runner();
        runner.failing.push("mkfs.ext3");
        let mut options = fx.options();
        options.rootfs = Some(fx.dir.path().join("disk.img"));

        let err = QemuBuilder::new(fx.tree.clone(), options, &runner, &Answer(true))
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Build(_)));
        assert!(runner.position("losetup -d /dev/loop3").is_some());
        assert!(runner.position("mount").is_none());
    }

    #[test]
    fn falls_back_to_cp_without_rsync() {
        let fx = Fixture::new(Some("amd64"));
        for dir in ["bin", "proc", "sys", "dev", "tmp"] {
            fs::create_dir_all(fx.tree.join(dir)).unwrap();
        }
        fs::write(fx.tree.join("dev/null"), "").unwrap();
        fs::write(fx.tree.join("tmp/leftover"), "x").unwrap();
        let mut runner = runner();
        runner.missing = vec!["rsync"];
        let mut options = fx.options();
        options.rootfs = Some(fx.dir.path().join("disk.img"));

        QemuBuilder::new(fx.tree.clone(), options, &runner, &Answer(true))
            .unwrap()
            .build()
            .unwrap();

        let mnt = fx.mount_path();
        let expected = format!(
            "cp -a {} {} {}/",
            fx.tree.join("bin").display(),
            fx.tree.join("etc").display(),
            mnt.display()
        );
        assert!(runner.calls().contains(&expected), "{:?}", runner.calls());
        assert!(runner.position("rsync").is_none());
        assert!(mnt.join("tmp").is_dir());
    }

    #[test]
    fn excluded_directories() {
        assert!(is_excluded("proc"));
        assert!(is_excluded("sys"));
        assert!(is_excluded("dev"));
        assert!(is_excluded("tmp"));
        assert!(!is_excluded("etc"));
        assert!(!is_excluded("run"));
    }

    #[test]
    fn declined_overwrite_keeps_image() {
        let fx = Fixture::new(Some("amd64"));
        let image = fx.dir.path().join("disk.img");
        fs::write(&image, "old").unwrap();
        let runner = runner();
        let mut options = fx.options();
        options.rootfs = Some(image.clone());

        let err = QemuBuilder::new(fx.tree.clone(), options, &runner, &Answer(false))
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(fs::read_to_string(&image).unwrap(), "old");
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn rejects_bad_size_before_touching_anything() {
        let fx = Fixture::new(Some("amd64"));
        let runner = runner();
        let mut options = fx.options();
        options.size = "7X".into();

        let err = QemuBuilder::new(fx.tree.clone(), options, &runner, &Answer(true))
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSize(_)));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn missing_tools() {
        let fx = Fixture::new(Some("amd64"));
        let mut runner = runner();
        runner.missing = vec!["qemu-img"];

        let err = QemuBuilder::new(fx.tree.clone(), fx.options(), &runner, &Answer(true))
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Dependency { .. }));
    }

    #[test]
    fn failure_message_names_the_cause_once() {
        let err = anyhow::Error::from(Error::Build("failed to copy files".into())).context(FAILURE);
        let msg = format!("{:#}", err);
        assert_eq!(msg.matches("build failed").count(), 1, "{}", msg);
        assert!(msg.starts_with("QEMU image not built: "));
    }
}
