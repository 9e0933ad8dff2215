//! The host link.
//!
//! The emulator exposes either a PTY (with a stable symlink the host can
//! put in its `serial:` setting) or a Unix-domain socket. Either way the
//! session sees a byte reader and a byte writer.

use anyhow::{Context, Result};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::openpty;
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::symlink;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Which transport to expose to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Pty,
    Socket,
}

/// Cleans up filesystem artifacts (symlink / socket file) on shutdown and
/// keeps the PTY slave end open so reads never hit EOF while the host is
/// away.
pub struct LinkGuard {
    path: Option<PathBuf>,
    _slave: Option<File>,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// An open host link.
pub struct HostLink {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub guard: LinkGuard,
}

impl HostLink {
    /// Wraps pre-connected endpoints; used by in-process harnesses.
    pub fn from_parts(reader: Box<dyn Read + Send>, writer: Box<dyn Write + Send>) -> HostLink {
        HostLink {
            reader,
            writer,
            guard: LinkGuard {
                path: None,
                _slave: None,
            },
        }
    }
}

/// Opens the host link at `path`.
///
/// For [`LinkKind::Socket`] this blocks until a host connects.
pub fn open(kind: LinkKind, path: &Path) -> Result<HostLink> {
    match kind {
        LinkKind::Pty => open_pty(path),
        LinkKind::Socket => open_socket(path),
    }
}

fn open_pty(link_path: &Path) -> Result<HostLink> {
    let pty = openpty(None, None).context("failed to allocate a PTY")?;

    // Raw mode on the slave side; a line-disciplined PTY would echo the
    // protocol bytes straight back at the host.
    let mut termios = tcgetattr(pty.slave.as_fd()).context("tcgetattr on PTY slave")?;
    cfmakeraw(&mut termios);
    tcsetattr(pty.slave.as_fd(), SetArg::TCSANOW, &termios).context("tcsetattr on PTY slave")?;

    // Non-blocking master so the protocol thread can observe shutdown.
    let flags = fcntl(pty.master.as_raw_fd(), FcntlArg::F_GETFL)?;
    fcntl(
        pty.master.as_raw_fd(),
        FcntlArg::F_SETFL(OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK),
    )?;

    let slave_path = nix::unistd::ttyname(pty.slave.as_fd()).context("ttyname on PTY slave")?;
    let _ = std::fs::remove_file(link_path);
    symlink(&slave_path, link_path).with_context(|| {
        format!(
            "failed to link {} -> {}",
            link_path.display(),
            slave_path.display()
        )
    })?;
    info!(pty = %slave_path.display(), link = %link_path.display(), "host PTY ready");

    let master = File::from(pty.master);
    let reader = master.try_clone().context("failed to clone PTY master")?;
    Ok(HostLink {
        reader: Box::new(reader),
        writer: Box::new(master),
        guard: LinkGuard {
            path: Some(link_path.to_path_buf()),
            _slave: Some(File::from(pty.slave)),
        },
    })
}

fn open_socket(path: &Path) -> Result<HostLink> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind host socket {}", path.display()))?;
    info!(socket = %path.display(), "waiting for host connection");
    let (stream, _) = listener.accept().context("host socket accept failed")?;
    info!("host connected");
    stream
        .set_read_timeout(Some(Duration::from_millis(100)))
        .context("failed to set socket read timeout")?;
    let reader = stream.try_clone().context("failed to clone host socket")?;
    Ok(HostLink {
        reader: Box::new(reader),
        writer: Box::new(stream),
        guard: LinkGuard {
            path: Some(path.to_path_buf()),
            _slave: None,
        },
    })
}
