//! Connection state: the socket, the id allocator, and every request this
//! client can issue.
//!
//! Object ids are client-assigned, strictly increasing, and never recycled
//! from this side; the compositor hands ids back through delete_id events
//! but a fresh `next_id` never collides with a live proxy.

use std::os::fd::{BorrowedFd, OwnedFd};

use crate::core::errors::Result;
use crate::core::wayland::socket::WireSocket;
use crate::core::wayland::wire::MessageWriter;
use crate::core::wayland::{opcode, DISPLAY_OBJECT_ID};

pub struct Connection {
    socket: WireSocket,
    current_id: u32,
}

impl Connection {
    pub fn new(socket: WireSocket) -> Self {
        Self {
            socket,
            current_id: DISPLAY_OBJECT_ID,
        }
    }

    /// Allocate the next object id. Monotonic; the first call after
    /// connecting yields the registry's id.
    pub fn next_id(&mut self) -> u32 {
        self.current_id += 1;
        self.current_id
    }

    /// Highest id handed out so far. Events naming anything above this are
    /// protocol violations.
    pub fn current_id(&self) -> u32 {
        self.current_id
    }

    pub fn receive(&mut self, buf: &mut [u8]) -> Result<(usize, Vec<OwnedFd>)> {
        self.socket.receive(buf)
    }

    fn submit(&mut self, msg: &[u8], what: &'static str) -> Result<()> {
        self.socket.send(msg).map_err(|err| {
            tracing::error!("{what}: {err}");
            err
        })
    }

    fn submit_with_fd(
        &mut self,
        msg: &[u8],
        fd: BorrowedFd<'_>,
        what: &'static str,
    ) -> Result<()> {
        self.socket.send_with_fd(msg, Some(fd)).map_err(|err| {
            tracing::error!("{what}: {err}");
            err
        })
    }

    // wl_display

    pub fn get_registry(&mut self) -> Result<u32> {
        let registry = self.next_id();
        let msg = MessageWriter::new(DISPLAY_OBJECT_ID, opcode::wl_display::REQ_GET_REGISTRY)
            .uint(registry)
            .finish()?;
        self.submit(&msg, "failed to create registry")?;
        tracing::debug!("-> wl_display@{DISPLAY_OBJECT_ID}.get_registry: wl_registry={registry}");
        Ok(registry)
    }

    // wl_registry

    pub fn registry_bind(
        &mut self,
        registry: u32,
        name: u32,
        interface: &str,
        version: u32,
    ) -> Result<u32> {
        let new_id = self.next_id();
        let msg = MessageWriter::new(registry, opcode::wl_registry::REQ_BIND)
            .uint(name)
            .string(interface)
            .uint(version)
            .uint(new_id)
            .finish()?;
        self.submit(&msg, "failed to bind global interface")?;
        tracing::debug!(
            "-> wl_registry@{registry}.bind: name={name} interface={interface} version={version} id={new_id}"
        );
        Ok(new_id)
    }

    // wl_seat

    pub fn seat_get_keyboard(&mut self, seat: u32) -> Result<u32> {
        let keyboard = self.next_id();
        let msg = MessageWriter::new(seat, opcode::wl_seat::REQ_GET_KEYBOARD)
            .uint(keyboard)
            .finish()?;
        self.submit(&msg, "failed to get keyboard from seat")?;
        tracing::debug!("-> wl_seat@{seat}.get_keyboard: wl_keyboard={keyboard}");
        Ok(keyboard)
    }

    // wl_shm / wl_shm_pool / wl_buffer

    /// Announce a shared-memory pool. The backing descriptor travels as
    /// ancillary data; from here on the memory's lifetime is shared with
    /// the compositor.
    pub fn shm_create_pool(&mut self, shm: u32, fd: BorrowedFd<'_>, size: u32) -> Result<u32> {
        let pool = self.next_id();
        let msg = MessageWriter::new(shm, opcode::wl_shm::REQ_CREATE_POOL)
            .uint(pool)
            .uint(size)
            .finish()?;
        self.submit_with_fd(&msg, fd, "failed to announce shm pool")?;
        tracing::debug!("-> wl_shm@{shm}.create_pool: wl_shm_pool={pool} size={size}");
        Ok(pool)
    }

    pub fn pool_create_buffer(
        &mut self,
        pool: u32,
        width: u32,
        height: u32,
        stride: u32,
        format: u32,
    ) -> Result<u32> {
        let buffer = self.next_id();
        let msg = MessageWriter::new(pool, opcode::wl_shm_pool::REQ_CREATE_BUFFER)
            .uint(buffer)
            .uint(0) // offset
            .uint(width)
            .uint(height)
            .uint(stride)
            .uint(format)
            .finish()?;
        self.submit(&msg, "failed to create buffer")?;
        tracing::debug!(
            "-> wl_shm_pool@{pool}.create_buffer: wl_buffer={buffer} {width}x{height} stride={stride}"
        );
        Ok(buffer)
    }

    pub fn buffer_destroy(&mut self, buffer: u32) -> Result<()> {
        let msg = MessageWriter::new(buffer, opcode::wl_buffer::REQ_DESTROY).finish()?;
        self.submit(&msg, "failed to destroy wl_buffer")?;
        tracing::debug!("-> wl_buffer@{buffer}.destroy");
        Ok(())
    }

    pub fn pool_destroy(&mut self, pool: u32) -> Result<()> {
        let msg = MessageWriter::new(pool, opcode::wl_shm_pool::REQ_DESTROY).finish()?;
        self.submit(&msg, "failed to destroy wl_shm_pool")?;
        tracing::debug!("-> wl_shm_pool@{pool}.destroy");
        Ok(())
    }

    // wl_compositor / wl_surface

    pub fn compositor_create_surface(&mut self, compositor: u32) -> Result<u32> {
        let surface = self.next_id();
        let msg = MessageWriter::new(compositor, opcode::wl_compositor::REQ_CREATE_SURFACE)
            .uint(surface)
            .finish()?;
        self.submit(&msg, "failed to create surface")?;
        tracing::debug!("-> wl_compositor@{compositor}.create_surface: wl_surface={surface}");
        Ok(surface)
    }

    pub fn surface_attach(&mut self, surface: u32, buffer: u32) -> Result<()> {
        let msg = MessageWriter::new(surface, opcode::wl_surface::REQ_ATTACH)
            .uint(buffer)
            .int(0)
            .int(0)
            .finish()?;
        self.submit(&msg, "failed to attach buffer to surface")?;
        tracing::debug!("-> wl_surface@{surface}.attach: wl_buffer={buffer}");
        Ok(())
    }

    pub fn surface_commit(&mut self, surface: u32) -> Result<()> {
        let msg = MessageWriter::new(surface, opcode::wl_surface::REQ_COMMIT).finish()?;
        self.submit(&msg, "failed to commit surface")?;
        tracing::debug!("-> wl_surface@{surface}.commit");
        Ok(())
    }

    pub fn surface_destroy(&mut self, surface: u32) -> Result<()> {
        let msg = MessageWriter::new(surface, opcode::wl_surface::REQ_DESTROY).finish()?;
        self.submit(&msg, "failed to destroy wl_surface")?;
        tracing::debug!("-> wl_surface@{surface}.destroy");
        Ok(())
    }

    // xdg_wm_base / xdg_surface / xdg_toplevel

    pub fn wm_base_get_xdg_surface(&mut self, wm_base: u32, surface: u32) -> Result<u32> {
        let xdg_surface = self.next_id();
        let msg = MessageWriter::new(wm_base, opcode::xdg_wm_base::REQ_GET_XDG_SURFACE)
            .uint(xdg_surface)
            .uint(surface)
            .finish()?;
        self.submit(&msg, "failed to get xdg surface")?;
        tracing::debug!(
            "-> xdg_wm_base@{wm_base}.get_xdg_surface: xdg_surface={xdg_surface} wl_surface={surface}"
        );
        Ok(xdg_surface)
    }

    pub fn wm_base_pong(&mut self, wm_base: u32, serial: u32) -> Result<()> {
        let msg = MessageWriter::new(wm_base, opcode::xdg_wm_base::REQ_PONG)
            .uint(serial)
            .finish()?;
        self.submit(&msg, "failed to answer xdg_wm_base ping")?;
        tracing::debug!("-> xdg_wm_base@{wm_base}.pong: serial={serial}");
        Ok(())
    }

    pub fn xdg_surface_get_toplevel(&mut self, xdg_surface: u32) -> Result<u32> {
        let toplevel = self.next_id();
        let msg = MessageWriter::new(xdg_surface, opcode::xdg_surface::REQ_GET_TOPLEVEL)
            .uint(toplevel)
            .finish()?;
        self.submit(&msg, "failed to get xdg toplevel")?;
        tracing::debug!("-> xdg_surface@{xdg_surface}.get_toplevel: xdg_toplevel={toplevel}");
        Ok(toplevel)
    }

    pub fn xdg_surface_ack_configure(&mut self, xdg_surface: u32, serial: u32) -> Result<()> {
        let msg = MessageWriter::new(xdg_surface, opcode::xdg_surface::REQ_ACK_CONFIGURE)
            .uint(serial)
            .finish()?;
        self.submit(&msg, "failed to acknowledge configure")?;
        tracing::debug!("-> xdg_surface@{xdg_surface}.ack_configure: serial={serial}");
        Ok(())
    }

    pub fn xdg_surface_destroy(&mut self, xdg_surface: u32) -> Result<()> {
        let msg = MessageWriter::new(xdg_surface, opcode::xdg_surface::REQ_DESTROY).finish()?;
        self.submit(&msg, "failed to destroy xdg_surface")?;
        tracing::debug!("-> xdg_surface@{xdg_surface}.destroy");
        Ok(())
    }

    pub fn toplevel_destroy(&mut self, toplevel: u32) -> Result<()> {
        let msg = MessageWriter::new(toplevel, opcode::xdg_toplevel::REQ_DESTROY).finish()?;
        self.submit(&msg, "failed to destroy xdg_toplevel")?;
        tracing::debug!("-> xdg_toplevel@{toplevel}.destroy");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn pair() -> (Connection, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        (Connection::new(WireSocket::from_stream(a)), b)
    }

    #[test]
    fn test_ids_strictly_increase() {
        let (mut conn, _peer) = pair();
        let mut last = conn.current_id();
        for _ in 0..100 {
            let id = conn.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_first_id_follows_display() {
        let (mut conn, _peer) = pair();
        assert_eq!(conn.next_id(), DISPLAY_OBJECT_ID + 1);
    }
}
