//! Builder module - Steps shared by the bootfs, Docker and QEMU builders

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::config::{Configuration, KNOWN_ARCHES, defaults, tools};
use super::error::{Error, IoContext, Result};
use super::runner::{Confirm, Runner, args};
use super::utils;

/// Outcome of a successful build.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Produced bootfs directory, image file, or image tag
    pub artifact: String,
    /// Non-fatal problems hit along the way
    pub warnings: Vec<String>,
}

impl BuildReport {
    /// Record and print a non-fatal problem.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        utils::print_warning(&message);
        self.warnings.push(message);
    }

    /// Record the failure of a best-effort step, if it failed.
    pub fn best_effort<T>(&mut self, what: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.warn(format!("{}: {}", what, e));
                None
            }
        }
    }
}

pub fn check_root(runner: &dyn Runner) -> Result<()> {
    if runner.is_root() {
        Ok(())
    } else {
        Err(Error::Permission)
    }
}

/// Fail with every tool in `required` missing from PATH.
pub fn check_dependencies(runner: &dyn Runner, required: &[&str]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|t| !runner.exists(t))
        .map(|t| t.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::Dependency { missing })
    }
}

/// Ask before destroying an existing build output, then remove it.
///
/// Nothing is touched unless the user agrees.
pub fn clear_existing(path: &Path, confirm: &dyn Confirm) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    utils::print_info(&format!("{} already exists", path.display()));
    if !confirm.confirm("Delete and recreate?") {
        return Err(Error::Cancelled);
    }

    if path.is_dir() {
        fs::remove_dir_all(path).io_context(|| format!("failed to remove {}", path.display()))?;
    } else {
        fs::remove_file(path).io_context(|| format!("failed to remove {}", path.display()))?;
    }
    debug!(path = %path.display(), "removed previous output");
    Ok(())
}

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).io_context(|| format!("failed to create directory {}", path.display()))
}

/// Copy `src` to `dest` with `mode`, creating parent directories
pub fn install_file(src: &Path, dest: &Path, mode: u32) -> Result<()> {
    if let Some(parent) = dest.parent() {
        create_dir_all(parent)?;
    }

    fs::copy(src, dest)
        .io_context(|| format!("failed to copy {} to {}", src.display(), dest.display()))?;
    fs::set_permissions(dest, fs::Permissions::from_mode(mode))
        .io_context(|| format!("failed to set permissions on {}", dest.display()))?;
    Ok(())
}

/// Host architecture as reported by dpkg, `amd64` if dpkg is unavailable.
pub fn host_arch(runner: &dyn Runner) -> String {
    match runner.output(tools::DPKG, &args(["--print-architecture"])) {
        Ok(arch) if !arch.is_empty() => arch,
        _ => defaults::ARCH.to_string(),
    }
}

/// Guess an architecture from a bootfs directory name.
pub fn infer_arch(tree: &Path) -> Option<&'static str> {
    let name = tree.file_name()?.to_string_lossy();
    KNOWN_ARCHES.iter().copied().find(|a| name.contains(a))
}

/// Architecture of an existing bootfs tree.
///
/// Prefers the architecture recorded in its configuration, then the directory
/// name, then [`defaults::ARCH`].
pub fn tree_arch(config: &Configuration, tree: &Path) -> String {
    if let Some(arch) = &config.arch_current {
        return arch.clone();
    }
    let inferred = infer_arch(tree).unwrap_or(defaults::ARCH);
    debug!(arch = inferred, tree = %tree.display(), "no recorded architecture, using inferred");
    inferred.to_string()
}

/// Validate that `tree` is an existing directory.
pub fn check_tree(tree: &Path) -> Result<()> {
    if tree.is_dir() {
        Ok(())
    } else {
        Err(Error::Environment(format!(
            "bootfs directory does not exist: {}",
            tree.display()
        )))
    }
}

/// Directory a sibling file of `path` should be placed in.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::testing::{Answer, FakeRunner};

    #[test]
    fn dependencies_report_all_missing() {
        let mut runner = FakeRunner::new();
        runner.missing = vec!["qemu-img", "losetup"];

        let err = check_dependencies(&runner, &["qemu-img", "mount", "losetup"]).unwrap_err();
        match err {
            Error::Dependency { missing } => assert_eq!(missing, vec!["qemu-img", "losetup"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(check_dependencies(&runner, &["mount"]).is_ok());
    }

    #[test]
    fn clear_existing_keeps_path_when_declined() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("marker"), "x").unwrap();

        let err = clear_existing(&target, &Answer(false)).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(target.join("marker").exists());

        clear_existing(&target, &Answer(true)).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn clear_existing_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("rootfs.img");
        fs::write(&image, "data").unwrap();

        clear_existing(&image, &Answer(true)).unwrap();
        assert!(!image.exists());
    }

    #[test]
    fn infer_arch_from_directory_name() {
        assert_eq!(infer_arch(Path::new("/out/ubuntu-5.10-i386-bootfs")), Some("i386"));
        assert_eq!(infer_arch(Path::new("ubuntu-22.04-arm64-bootfs")), Some("arm64"));
        assert_eq!(infer_arch(Path::new("/out/rootfs")), None);
    }

    #[test]
    fn tree_arch_prefers_recorded() {
        let mut config =
            Configuration::parse("[u]\ndistribution = ubuntu\nversion = 22.04\n").unwrap();
        let tree = Path::new("/out/ubuntu-22.04-i386-bootfs");
        assert_eq!(tree_arch(&config, tree), "i386");
        assert_eq!(tree_arch(&config, Path::new("/out/rootfs")), "amd64");

        config.arch_current = Some("amd64".into());
        assert_eq!(tree_arch(&config, tree), "amd64");
    }

    #[test]
    fn host_arch_falls_back() {
        let mut runner = FakeRunner::new();
        runner.outputs.push(("dpkg", "arm64".into()));
        assert_eq!(host_arch(&runner), "arm64");

        let mut broken = FakeRunner::new();
        broken.failing.push("dpkg");
        assert_eq!(host_arch(&broken), "amd64");
    }

    #[test]
    fn best_effort_collects_warnings() {
        let mut report = BuildReport::default();
        assert_eq!(report.best_effort("first", Ok(1)), Some(1));
        assert_eq!(report.best_effort::<()>("second", Err(Error::Cancelled)), None);
        assert_eq!(report.warnings, vec!["second: operation cancelled by user"]);
    }

    #[test]
    fn parent_dir_of_bare_name() {
        assert_eq!(parent_dir(Path::new("bootfs")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/out/bootfs")), PathBuf::from("/out"));
    }
}
