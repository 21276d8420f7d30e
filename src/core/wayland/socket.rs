//! Unix-socket transport with ancillary file-descriptor support.
//!
//! The compositor socket lives at `$XDG_RUNTIME_DIR/$WAYLAND_DISPLAY`
//! (display name defaulting to `wayland-0`). Some messages carry a file
//! descriptor alongside their payload (shared-memory pools outbound, the
//! keymap event inbound), so both directions go through
//! `sendmsg`/`recvmsg` with `SCM_RIGHTS` control messages.

use std::ffi::OsString;
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};

use crate::core::errors::{DisplayError, Result};

/// libwayland never sends more than 28 descriptors with one message; a
/// handful is plenty for the events this client consumes.
const MAX_FDS_PER_READ: usize = 8;

/// Resolve the compositor socket path from the environment values.
///
/// `XDG_RUNTIME_DIR` is mandatory; `WAYLAND_DISPLAY` defaults to
/// `wayland-0`.
pub fn resolve_socket_path(
    runtime_dir: Option<OsString>,
    display_name: Option<OsString>,
) -> Result<PathBuf> {
    let dir = runtime_dir.ok_or_else(|| DisplayError::config("$XDG_RUNTIME_DIR is not set"))?;
    let name = display_name.unwrap_or_else(|| OsString::from("wayland-0"));
    Ok(PathBuf::from(dir).join(name))
}

/// The connection's stream socket.
pub struct WireSocket {
    stream: UnixStream,
}

impl WireSocket {
    /// Connect to the compositor named by the environment.
    pub fn connect() -> Result<Self> {
        let path = resolve_socket_path(
            std::env::var_os("XDG_RUNTIME_DIR"),
            std::env::var_os("WAYLAND_DISPLAY"),
        )?;
        let stream = UnixStream::connect(&path).map_err(|err| {
            DisplayError::transport(format!(
                "unable to connect to compositor socket {}: {err}",
                path.display()
            ))
        })?;
        tracing::info!("connected to compositor at {}", path.display());
        Ok(Self { stream })
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.send_with_fd(bytes, None)
    }

    /// Write one whole message, optionally attaching a descriptor as
    /// ancillary data. A short write is a transport error, not retried.
    pub fn send_with_fd(&mut self, bytes: &[u8], fd: Option<BorrowedFd<'_>>) -> Result<()> {
        let iov = [IoSlice::new(bytes)];
        let raw_fds;
        let rights;
        let cmsgs: &[ControlMessage<'_>] = match fd {
            Some(fd) => {
                raw_fds = [fd.as_raw_fd()];
                rights = [ControlMessage::ScmRights(&raw_fds)];
                &rights
            }
            None => &[],
        };

        let sent = socket::sendmsg::<()>(
            self.stream.as_raw_fd(),
            &iov,
            cmsgs,
            MsgFlags::empty(),
            None,
        )
        .map_err(|err| DisplayError::transport(format!("send failed: {err}")))?;

        if sent != bytes.len() {
            return Err(DisplayError::transport(format!(
                "short write: sent {sent} of {} bytes",
                bytes.len()
            )));
        }
        Ok(())
    }

    /// One blocking read. Returns the bytes placed in `buf` plus any
    /// descriptors carried as `SCM_RIGHTS`. Blocks until the compositor
    /// sends something or the socket errors; there is no timeout.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<(usize, Vec<OwnedFd>)> {
        let mut iov = [IoSliceMut::new(buf)];
        let mut cmsg_space = nix::cmsg_space!([RawFd; MAX_FDS_PER_READ]);

        let msg = socket::recvmsg::<socket::UnixAddr>(
            self.stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_space),
            MsgFlags::empty(),
        )
        .map_err(|err| {
            DisplayError::transport(format!(
                "failed to read from compositor, is the display system still alive? ({err})"
            ))
        })?;

        let mut fds = Vec::new();
        for cmsg in msg
            .cmsgs()
            .map_err(|err| DisplayError::transport(format!("bad control message: {err}")))?
        {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                for raw in received {
                    // SAFETY: the kernel installed this descriptor for us
                    // and nothing else has claimed it
                    fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
                }
            }
        }

        Ok((msg.bytes, fds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_socket_path_defaults_to_wayland_0() {
        let path =
            resolve_socket_path(Some(OsString::from("/run/user/1000")), None).unwrap();
        assert_eq!(path, PathBuf::from("/run/user/1000/wayland-0"));
    }

    #[test]
    fn test_socket_path_honors_display_name() {
        let path = resolve_socket_path(
            Some(OsString::from("/run/user/1000")),
            Some(OsString::from("wayland-7")),
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/run/user/1000/wayland-7"));
    }

    #[test]
    fn test_missing_runtime_dir_is_config_error() {
        let err = resolve_socket_path(None, None).unwrap_err();
        assert!(matches!(err, DisplayError::Config(_)));
    }

    #[test]
    fn test_send_receive_round_trip() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut tx = WireSocket::from_stream(a);
        let mut rx = WireSocket::from_stream(b);

        tx.send(b"\x01\x00\x00\x00\x01\x00\x0c\x00abcd").unwrap();

        let mut buf = [0u8; 64];
        let (n, fds) = rx.receive(&mut buf).unwrap();
        assert_eq!(n, 12);
        assert_eq!(&buf[8..12], b"abcd");
        assert!(fds.is_empty());
    }

    #[test]
    fn test_descriptor_passing() {
        use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
        use std::os::fd::AsFd;

        let (a, b) = UnixStream::pair().unwrap();
        let mut tx = WireSocket::from_stream(a);
        let mut rx = WireSocket::from_stream(b);

        let memfd = memfd_create(c"socket-test", MemFdCreateFlag::MFD_CLOEXEC).unwrap();
        let mut file = std::fs::File::from(memfd);
        file.write_all(b"pixels").unwrap();

        tx.send_with_fd(b"\x03\x00\x00\x00\x00\x00\x08\x00", Some(file.as_fd()))
            .unwrap();

        let mut buf = [0u8; 64];
        let (n, fds) = rx.receive(&mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(fds.len(), 1);

        let received = std::fs::File::from(fds.into_iter().next().unwrap());
        assert_eq!(received.metadata().unwrap().len(), 6);
    }
}
