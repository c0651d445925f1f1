//! Configuration module - Build constants and the bootstrap configuration file
//!
//! A configuration file has one named section:
//!
//! ```ini
//! [ubuntu]
//! distribution = Ubuntu
//! version = 22.04
//! arch_supported = amd64, i386
//! base_packages = vim, git
//! setup_script = setup.sh
//! ```
//!
//! Files ending in `.toml` are read with the same schema in TOML syntax. The
//! copy persisted into a bootfs tree is always written as INI.

use std::fs;
use std::path::{Path, PathBuf};

use ini::Ini;
use serde::Deserialize;
use tracing::debug;

use super::error::{Error, IoContext, Result};

/// External programs
pub mod tools {
    pub const DEBOOTSTRAP: &str = "debootstrap";
    pub const CHROOT: &str = "chroot";
    pub const DOCKER: &str = "docker";
    pub const QEMU_IMG: &str = "qemu-img";
    pub const LOSETUP: &str = "losetup";
    pub const MKFS: &str = "mkfs.ext3";
    pub const MOUNT: &str = "mount";
    pub const UMOUNT: &str = "umount";
    pub const RSYNC: &str = "rsync";
    pub const CP: &str = "cp";
    pub const DPKG: &str = "dpkg";
}

/// Package mirrors
pub mod mirrors {
    /// Versions starting with this prefix are end-of-life releases
    pub const LEGACY_VERSION_PREFIX: &str = "5.";

    /// Archive for end-of-life releases
    pub const LEGACY: &str = "http://old-releases.ubuntu.com/ubuntu/";

    /// Mirror for current releases
    pub const CURRENT: &str = "http://mirrors.aliyun.com/ubuntu/";
}

/// Paths inside a bootfs tree
pub mod tree_paths {
    /// Persisted configuration
    pub const CONFIG: &str = "etc/bootstrap.conf";

    /// Installed setup script
    pub const SETUP_SCRIPT: &str = "usr/local/sbin/kboot-setup";
}

/// Defaults
pub mod defaults {
    /// Architecture used when nothing else resolves one
    pub const ARCH: &str = "amd64";

    /// VM image size
    pub const IMAGE_SIZE: &str = "2G";

    /// debootstrap variant
    pub const VARIANT: &str = "buildd";
}

/// Architecture tokens recognised in bootfs directory names
pub const KNOWN_ARCHES: &[&str] = &[
    "amd64", "i386", "arm64", "armhf", "ppc64el", "s390x", "riscv64",
];

/// Release version to debootstrap suite
const SUITES: &[(&str, &str)] = &[
    ("5.10", "breezy"),
    ("10.10", "maverick"),
    ("16.04", "xenial"),
    ("18.04", "bionic"),
    ("20.04", "focal"),
    ("22.04", "jammy"),
    ("24.04", "noble"),
];

const PACKAGES_SUFFIX: &str = "_packages";

/// Suite name for a release version.
///
/// Versions missing from the table are passed through unchanged, so a suite
/// codename can be written directly as the version.
pub fn suite(version: &str) -> &str {
    SUITES
        .iter()
        .find(|(v, _)| *v == version)
        .map(|(_, s)| *s)
        .unwrap_or(version)
}

pub fn is_legacy(version: &str) -> bool {
    version.starts_with(mirrors::LEGACY_VERSION_PREFIX)
}

/// Mirror used when the configuration names none.
pub fn default_mirror(version: &str) -> &'static str {
    if is_legacy(version) {
        mirrors::LEGACY
    } else {
        mirrors::CURRENT
    }
}

/// Parsed bootstrap configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub section: String,
    pub distribution: String,
    pub version: String,
    pub arch_supported: Vec<String>,
    /// Architecture bootstrapped into a tree; unset until a bootfs build runs
    pub arch_current: Option<String>,
    pub mirror: String,
    /// `<category>_packages` keys in file order
    pub packages: Vec<(String, String)>,
    pub setup_script: Option<String>,
    /// File this configuration was loaded from
    pub source: Option<PathBuf>,
}

// `source` only locates relative scripts; it is not part of the identity.
impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.section == other.section
            && self.distribution == other.distribution
            && self.version == other.version
            && self.arch_supported == other.arch_supported
            && self.arch_current == other.arch_current
            && self.mirror == other.mirror
            && self.packages == other.packages
            && self.setup_script == other.setup_script
    }
}

/// Section fields before defaulting, common to both syntaxes.
#[derive(Default)]
struct RawSection {
    name: String,
    distribution: Option<String>,
    version: Option<String>,
    arch_supported: Vec<String>,
    arch_current: Option<String>,
    mirror: Option<String>,
    setup_script: Option<String>,
    packages: Vec<(String, String)>,
}

impl Configuration {
    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let is_toml = path.extension().is_some_and(|e| e == "toml");
        let raw = if is_toml {
            let text = fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
            parse_toml(&text)?
        } else {
            let ini = Ini::load_from_file(path)
                .map_err(|e| Error::Config(format!("cannot load {}: {}", path.display(), e)))?;
            parse_ini(&ini)?
        };

        let mut config = Self::from_raw(raw)?;
        config.source = Some(path.to_path_buf());
        debug!(path = %path.display(), section = %config.section, "loaded configuration");
        Ok(config)
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> Result<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        Self::from_raw(parse_ini(&ini)?)
    }

    fn from_raw(raw: RawSection) -> Result<Self> {
        let distribution = required(raw.distribution, "distribution", &raw.name)?;
        let version = required(raw.version, "version", &raw.name)?;
        let mirror = raw
            .mirror
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| default_mirror(&version).to_string());

        Ok(Self {
            section: raw.name,
            distribution,
            version,
            arch_supported: raw.arch_supported,
            arch_current: raw.arch_current.filter(|a| !a.is_empty()),
            mirror,
            packages: raw.packages,
            setup_script: raw.setup_script.filter(|s| !s.is_empty()),
            source: None,
        })
    }

    pub fn suite(&self) -> &str {
        suite(&self.version)
    }

    pub fn is_legacy(&self) -> bool {
        is_legacy(&self.version)
    }

    /// Every package from every `*_packages` list, in file order.
    ///
    /// Duplicates across lists are kept.
    pub fn all_packages(&self) -> Vec<String> {
        self.packages
            .iter()
            .flat_map(|(_, list)| split_list(list))
            .collect()
    }

    pub fn validate_arch(&self, arch: &str) -> bool {
        self.arch_supported.iter().any(|a| a == arch)
    }

    /// Docker image tag, e.g. `ubuntu-22.04-amd64`.
    pub fn image_name(&self, arch: &str) -> String {
        format!("{}-{}-{}", self.distribution.to_lowercase(), self.version, arch)
    }

    /// VM disk image filename, e.g. `ubuntu-22.04-amd64-rootfs.img`.
    pub fn rootfs_name(&self, arch: &str) -> String {
        format!("{}-rootfs.img", self.image_name(arch))
    }

    /// Bootfs directory name, e.g. `ubuntu-22.04-amd64-bootfs`.
    pub fn bootfs_name(&self, arch: &str) -> String {
        format!("{}-bootfs", self.image_name(arch))
    }

    /// Setup script location, relative to the configuration file's directory.
    pub fn setup_script_path(&self) -> Option<PathBuf> {
        let script = self.setup_script.as_ref()?;
        let base = self
            .source
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or_else(|| Path::new(""));
        Some(base.join(script))
    }

    /// Serialize to INI.
    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        let section = Some(self.section.as_str());
        ini.with_section(section)
            .set("distribution", self.distribution.as_str())
            .set("version", self.version.as_str())
            .set("arch_supported", self.arch_supported.join(","));
        if let Some(arch) = &self.arch_current {
            ini.with_section(section).set("arch_current", arch.as_str());
        }
        ini.with_section(section).set("mirror", self.mirror.as_str());
        if let Some(script) = &self.setup_script {
            ini.with_section(section).set("setup_script", script.as_str());
        }
        for (key, list) in &self.packages {
            ini.with_section(section).set(key.as_str(), list.as_str());
        }
        ini
    }

    /// Write this configuration into a bootfs tree at [`tree_paths::CONFIG`].
    pub fn persist(&self, tree: &Path) -> Result<PathBuf> {
        let path = tree.join(tree_paths::CONFIG);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        self.to_ini()
            .write_to_file(&path)
            .io_context(|| format!("failed to save configuration to {}", path.display()))?;
        Ok(path)
    }

    /// Load the configuration persisted inside a bootfs tree.
    pub fn load_from_tree(tree: &Path) -> Result<Self> {
        let path = tree.join(tree_paths::CONFIG);
        if !path.is_file() {
            return Err(Error::ConfigNotFound(path));
        }
        Self::load(&path)
    }
}

fn required(value: Option<String>, key: &str, section: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("missing '{}' in section [{}]", key, section)))
}

fn split_list(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn parse_ini(ini: &Ini) -> Result<RawSection> {
    let (name, props) = ini
        .iter()
        .find_map(|(name, props)| name.map(|n| (n, props)))
        .ok_or_else(|| Error::Config("no section found in configuration file".into()))?;

    let mut raw = RawSection {
        name: name.to_string(),
        ..Default::default()
    };
    for (key, value) in props.iter() {
        let value = value.trim();
        match key {
            "distribution" => raw.distribution = Some(value.to_string()),
            "version" => raw.version = Some(value.to_string()),
            "arch_supported" => raw.arch_supported = split_list(value).collect(),
            "arch_current" => raw.arch_current = Some(value.to_string()),
            "mirror" => raw.mirror = Some(value.to_string()),
            "setup_script" => raw.setup_script = Some(value.to_string()),
            k if k.ends_with(PACKAGES_SUFFIX) => {
                raw.packages.push((k.to_string(), value.to_string()))
            }
            other => debug!(key = other, "ignoring unknown configuration key"),
        }
    }
    Ok(raw)
}

/// A list written either as `"a, b"` or `["a", "b"]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum TomlList {
    Joined(String),
    Items(Vec<String>),
}

impl TomlList {
    fn joined(self) -> String {
        match self {
            TomlList::Joined(s) => s,
            TomlList::Items(v) => v.join(","),
        }
    }
}

#[derive(Deserialize)]
struct TomlSection {
    distribution: Option<String>,
    version: Option<String>,
    arch_supported: Option<TomlList>,
    arch_current: Option<String>,
    mirror: Option<String>,
    setup_script: Option<String>,
    #[serde(flatten)]
    rest: toml::Table,
}

fn parse_toml(text: &str) -> Result<RawSection> {
    let doc: toml::Table = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
    let (name, value) = doc
        .into_iter()
        .find(|(_, v)| v.is_table())
        .ok_or_else(|| Error::Config("no section found in configuration file".into()))?;

    let section: TomlSection = value
        .try_into()
        .map_err(|e: toml::de::Error| Error::Config(format!("section [{}]: {}", name, e)))?;

    let mut packages = Vec::new();
    for (key, value) in section.rest {
        if !key.ends_with(PACKAGES_SUFFIX) {
            debug!(key = %key, "ignoring unknown configuration key");
            continue;
        }
        let list: TomlList = value
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(format!("{}: {}", key, e)))?;
        packages.push((key, list.joined()));
    }

    Ok(RawSection {
        name,
        distribution: section.distribution,
        version: section.version,
        arch_supported: section
            .arch_supported
            .map(|l| split_list(&l.joined()).collect())
            .unwrap_or_default(),
        arch_current: section.arch_current,
        mirror: section.mirror,
        setup_script: section.setup_script,
        packages,
    })
}
