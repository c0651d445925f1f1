//! kboot - Kernel development root filesystems
//!
//! Three tools share this library:
//!
//! ```bash
//! sudo kboot-build-bootfs -f ubuntu-22.04.conf -a amd64
//! sudo kboot-build-docker -b ubuntu-22.04-amd64-bootfs
//! sudo kboot-build-qemu -b ubuntu-22.04-amd64-bootfs -s 4G
//! ```
//!
//! The bootfs builder runs debootstrap and stores its configuration inside the
//! tree; the other two read it back from there.

pub mod commands;
pub mod core;
