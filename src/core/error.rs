//! Error module - Failure kinds shared by all builders

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("please run with sudo or root privileges")]
    Permission,

    #[error("missing dependencies: {} (install with: apt-get install {})", .missing.join(", "), .missing.join(" "))]
    Dependency { missing: Vec<String> },

    #[error("architecture error: {0}")]
    Architecture(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("operation cancelled by user")]
    Cancelled,

    #[error("debootstrap failed: {0}")]
    Bootstrap(String),

    #[error("build failed: {0}")]
    Build(String),

    #[error("{0}")]
    Environment(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("failed to install setup script: {0}")]
    ScriptInstall(String),

    /// An external program could not be started or exited non-zero.
    #[error("command execution failed {program}: {message}")]
    Command { program: String, message: String },
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attach a context message to `std::io` results, anyhow-style.
pub trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::io(f(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_message_lists_every_tool() {
        let err = Error::Dependency {
            missing: vec!["qemu-img".into(), "mkfs.ext3".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("qemu-img, mkfs.ext3"));
        assert!(msg.contains("apt-get install qemu-img mkfs.ext3"));
    }

    #[test]
    fn io_context_wraps_source() {
        let res: std::io::Result<()> = Err(std::io::Error::other("disk full"));
        let err = res.io_context(|| "failed to write hosts").unwrap_err();
        assert_eq!(err.to_string(), "failed to write hosts: disk full");
    }
}
