//! Mount module - Loop devices and mount points released on drop
//!
//! Both guards undo their kernel state on every exit path. Release failures
//! are logged and never replace the error that caused the unwinding.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::config::tools;
use super::error::{Error, IoContext, Result};
use super::runner::{Runner, args};
use super::utils;

/// A disk image attached to a loop device; detached on drop.
pub struct LoopDevice<'a> {
    runner: &'a dyn Runner,
    device: String,
}

impl<'a> LoopDevice<'a> {
    /// Attach `image` to the first free loop device.
    pub fn attach(runner: &'a dyn Runner, image: &Path) -> Result<Self> {
        let device = runner
            .output(tools::LOSETUP, &args(["-f"]))
            .map_err(|e| Error::Build(format!("failed to get free loop device: {}", e)))?;
        if device.is_empty() {
            return Err(Error::Build("no free loop device".into()));
        }

        runner
            .run(tools::LOSETUP, &args([device.clone(), image.display().to_string()]))
            .map_err(|e| Error::Build(format!("failed to associate loop device: {}", e)))?;

        debug!(device = %device, image = %image.display(), "attached loop device");
        Ok(Self { runner, device })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Drop for LoopDevice<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.runner.run(tools::LOSETUP, &args(["-d", self.device.as_str()])) {
            warn!(device = %self.device, error = %e, "failed to detach loop device");
            utils::print_warning(&format!("failed to detach {}: {}", self.device, e));
        }
    }
}

/// A loop-mounted disk image; unmounted and its directory removed on drop.
pub struct MountPoint<'a> {
    runner: &'a dyn Runner,
    path: PathBuf,
}

impl<'a> MountPoint<'a> {
    /// Create `path` and loop-mount `image` on it.
    pub fn mount(runner: &'a dyn Runner, image: &Path, path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path)
            .io_context(|| format!("failed to create mount point {}", path.display()))?;

        let mount_args = args([
            "-o".to_string(),
            "loop".to_string(),
            image.display().to_string(),
            path.display().to_string(),
        ]);
        if let Err(e) = runner.run(tools::MOUNT, &mount_args) {
            if let Err(e) = fs::remove_dir(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove mount point");
            }
            return Err(Error::Build(format!("failed to mount image: {}", e)));
        }

        debug!(image = %image.display(), path = %path.display(), "mounted image");
        Ok(Self { runner, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MountPoint<'_> {
    fn drop(&mut self) {
        utils::print_step("Unmounting image...");
        if let Err(e) = self.runner.run(tools::UMOUNT, &args([self.path.display().to_string()])) {
            warn!(path = %self.path.display(), error = %e, "failed to unmount");
            utils::print_warning(&format!("failed to unmount {}: {}", self.path.display(), e));
            // Still mounted: leave the directory alone rather than touch image contents.
            return;
        }
        if let Err(e) = fs::remove_dir(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove mount point");
        }
    }
}
