//! The connection context and the per-frame event pump.
//!
//! One `Display` owns everything the protocol client is: the socket, the
//! id allocator, the bound globals, the live windows, and the retired
//! memory awaiting deletion confirmation. The engine calls `pump` once
//! per frame; each pump drains one read, dispatches every buffered
//! message in arrival order, then renders every ready window.

use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;

use rand::Rng;

use crate::core::errors::{DisplayError, Result};
use crate::core::wayland::connection::Connection;
use crate::core::wayland::globals::GlobalBindings;
use crate::core::wayland::shm::DeferredTable;
use crate::core::wayland::socket::WireSocket;
use crate::core::wayland::wire::{MessageHeader, MessageReader};
use crate::core::wayland::{opcode, DISPLAY_OBJECT_ID, HEADER_SIZE, RECV_BUFFER_SIZE};
use crate::core::window::{Window, WindowConfig};
use crate::elog;
use crate::util::logging;

pub struct Display {
    pub(crate) conn: Connection,
    pub(crate) globals: GlobalBindings,
    pub(crate) windows: Vec<Window>,
    pub(crate) deferred: DeferredTable,
    pub(crate) pending_fds: VecDeque<OwnedFd>,
}

impl Display {
    /// Connect to the compositor named by the environment and block until
    /// every required global is bound.
    pub fn connect() -> Result<Self> {
        let mut display = Self::from_socket(WireSocket::connect()?);
        display.bind_globals()?;
        Ok(display)
    }

    /// Wrap an already-connected stream. No handshake is performed; call
    /// `bind_globals` to run it.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self::from_socket(WireSocket::from_stream(stream))
    }

    fn from_socket(socket: WireSocket) -> Self {
        Self {
            conn: Connection::new(socket),
            globals: GlobalBindings::default(),
            windows: Vec::new(),
            deferred: DeferredTable::new(),
            pending_fds: VecDeque::new(),
        }
    }

    /// Startup handshake: request the registry, then pump until the
    /// shared-memory factory, shell factory, and surface factory have all
    /// been announced and bound. Blocks without timeout; a compositor
    /// disconnect surfaces as the pump's transport error.
    pub fn bind_globals(&mut self) -> Result<()> {
        self.globals.wl_registry = self.conn.get_registry()?;

        while !self.globals.required_bound() {
            self.dispatch_pending()?;
        }

        elog!(
            logging::DISPLAY,
            "required globals bound: wl_shm@{} xdg_wm_base@{} wl_compositor@{}",
            self.globals.wl_shm,
            self.globals.xdg_wm_base,
            self.globals.wl_compositor
        );
        Ok(())
    }

    /// Drain one read, dispatch every contained message, then run a render
    /// pass over all windows. Call once per frame; the receive blocks
    /// until the compositor sends something.
    pub fn pump(&mut self) -> Result<()> {
        self.dispatch_pending()?;
        self.render_all()
    }

    /// One blocking read, every buffered message dispatched in arrival
    /// order. Rendering is not interleaved here.
    pub(crate) fn dispatch_pending(&mut self) -> Result<()> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (read, fds) = self.conn.receive(&mut buf)?;
        if read == 0 {
            return Err(DisplayError::transport("compositor closed the connection"));
        }
        self.pending_fds.extend(fds);
        tracing::trace!("received {read} bytes from compositor");

        let mut cursor = 0;
        while cursor < read {
            let header = MessageHeader::parse(&buf[cursor..read])?;
            let payload = &buf[cursor + HEADER_SIZE..cursor + header.size];
            cursor += header.size;
            self.dispatch(header, payload)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, header: MessageHeader, payload: &[u8]) -> Result<()> {
        if header.object_id > self.conn.current_id() {
            return Err(DisplayError::protocol(format!(
                "event for unallocated object id {} (highest allocated is {})",
                header.object_id,
                self.conn.current_id()
            )));
        }

        let mut reader = MessageReader::new(payload);

        // display-scoped events come first and may be fatal
        if header.object_id == DISPLAY_OBJECT_ID {
            return self.handle_display_event(header, &mut reader);
        }

        if self
            .globals
            .handle_event(&mut self.conn, &mut self.pending_fds, header, &mut reader)?
        {
            return Ok(());
        }

        // release events for buffers already retired into the deferred table
        if header.opcode == opcode::wl_buffer::EV_RELEASE
            && self.deferred.owns_buffer(header.object_id)
        {
            tracing::debug!("<- wl_buffer@{}.release (retired)", header.object_id);
            return Ok(());
        }

        // offer to each window in registration order, first claim wins
        for window in &mut self.windows {
            if window.handle_event(&mut self.conn, &mut self.deferred, header, &mut reader)? {
                return Ok(());
            }
        }

        // an event nobody claims means client and compositor no longer
        // agree on the object space; that is not recoverable
        tracing::error!(
            "unhandled event: object_id={} opcode={}",
            header.object_id,
            header.opcode
        );
        Err(DisplayError::protocol(format!(
            "unhandled event: object_id={} opcode={}",
            header.object_id, header.opcode
        )))
    }

    fn handle_display_event(
        &mut self,
        header: MessageHeader,
        reader: &mut MessageReader<'_>,
    ) -> Result<()> {
        match header.opcode {
            opcode::wl_display::EV_ERROR => {
                let object = reader.uint()?;
                let code = reader.uint()?;
                let message = reader.string()?;
                tracing::error!(
                    "compositor error: object_id={object} code={code} message={message}"
                );
                Err(DisplayError::protocol(format!(
                    "compositor error on object {object} (code {code}): {message}"
                )))
            }
            opcode::wl_display::EV_DELETE_ID => {
                let id = reader.uint()?;
                tracing::debug!("<- wl_display@{DISPLAY_OBJECT_ID}.delete_id: id={id}");
                // only pool ids carry local memory to reclaim; everything
                // else is just the compositor returning the id
                self.deferred.reclaim(id);
                Ok(())
            }
            _ => Err(DisplayError::protocol(format!(
                "unknown wl_display event: opcode={}",
                header.opcode
            ))),
        }
    }

    pub(crate) fn render_all(&mut self) -> Result<()> {
        for window in &mut self.windows {
            window.render(&mut self.conn, self.globals.wl_shm)?;
        }
        Ok(())
    }

    // Windowing boundary, consumed by the engine.

    /// Create a window: map its pixel memory, create its surface and shell
    /// roles, and hand back an opaque public id.
    pub fn create_window(&mut self, config: &WindowConfig) -> Result<u64> {
        if !self.globals.required_bound() {
            return Err(DisplayError::state(
                "display globals not yet bound; connect first",
            ));
        }

        let mut rng = rand::thread_rng();
        let mut id: u64 = rng.gen();
        while id == 0 || self.windows.iter().any(|w| w.id == id) {
            id = rng.gen();
        }

        let mut window = Window::new(id, config)?;
        window.create_surface(
            &mut self.conn,
            self.globals.wl_compositor,
            self.globals.xdg_wm_base,
        )?;
        self.windows.push(window);

        elog!(
            logging::WINDOW,
            "created window {id:#018x} ({}x{})",
            config.width,
            config.height
        );
        Ok(id)
    }

    /// Whether the compositor has asked this window to close. The close
    /// event only sets a local flag; issuing `destroy_window` is the
    /// caller's move. A stale id reads as "close it".
    pub fn should_close(&self, id: u64) -> bool {
        self.windows
            .iter()
            .find(|w| w.id == id)
            .map_or(true, |w| w.should_close())
    }

    pub fn window(&self, id: u64) -> Option<&Window> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Destroy a window from any state: retire its memory (deferred when
    /// the pool was announced) and tear down its surface roles.
    pub fn destroy_window(&mut self, id: u64) -> Result<()> {
        let idx = self
            .windows
            .iter()
            .position(|w| w.id == id)
            .ok_or(DisplayError::UnknownWindow(id))?;

        let mut window = self.windows.remove(idx);
        window.unbind_memory(&mut self.conn, &mut self.deferred)?;
        window.destroy_surface(&mut self.conn)?;

        elog!(logging::WINDOW, "destroyed window {id:#018x}");
        Ok(())
    }
}
