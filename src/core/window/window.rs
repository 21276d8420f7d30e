//! Per-window protocol state and the configure/attach lifecycle.
//!
//! A window owns the object ids of its surface, shell roles, pool and
//! buffer, plus the mapped pixel memory behind them. Dimensions change in
//! two phases: the toplevel configure proposes, the surface configure
//! applies and acknowledges.

use crate::core::errors::{DisplayError, Result};
use crate::core::wayland::connection::Connection;
use crate::core::wayland::shm::{DeferredChunk, DeferredTable, ShmMapping};
use crate::core::wayland::wire::{MessageHeader, MessageReader};
use crate::core::wayland::{opcode, COLOR_CHANNELS, FORMAT_XRGB8888};
use crate::elog;
use crate::util::logging;

/// Diagnostic fill pattern written on every attach: 0xRRGGBB in XRGB8888.
const DIAGNOSTIC_FILL: u32 = 0x00FF_FF00;

/// Requested window geometry and title.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub title: String,
}

/// Lifecycle of a window's surface. The close request is an orthogonal
/// flag: it can arrive in any state and sends nothing on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowState {
    #[default]
    None,
    AckedConfigure,
    Attached,
}

pub struct Window {
    /// Public handle, random and unique among live windows. The engine
    /// only ever holds this id, never the window itself.
    pub id: u64,
    pub title: String,

    pub(crate) width: u32,
    pub(crate) height: u32,

    // candidate dimensions from the last toplevel configure, applied when
    // the paired surface configure is acknowledged
    pub(crate) width_req: u32,
    pub(crate) height_req: u32,

    pub(crate) wl_surface: u32,
    pub(crate) xdg_surface: u32,
    pub(crate) xdg_toplevel: u32,
    pub(crate) wl_shm_pool: u32,
    pub(crate) wl_buffer: u32,

    pub(crate) shm: Option<ShmMapping>,

    pub(crate) state: WindowState,
    pub(crate) should_close: bool,
}

impl Window {
    /// Build the window and map its initial pixel memory. Surface roles
    /// are created separately so the id is placed in the registry first.
    pub(crate) fn new(id: u64, config: &WindowConfig) -> Result<Self> {
        let shm = ShmMapping::alloc(pool_size(config.width, config.height))?;
        Ok(Self {
            id,
            title: config.title.clone(),
            width: config.width,
            height: config.height,
            width_req: 0,
            height_req: 0,
            wl_surface: 0,
            xdg_surface: 0,
            xdg_toplevel: 0,
            wl_shm_pool: 0,
            wl_buffer: 0,
            shm: Some(shm),
            state: WindowState::None,
            should_close: false,
        })
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn should_close(&self) -> bool {
        self.should_close
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Give the surface its shell roles: wl_surface, xdg_surface,
    /// xdg_toplevel, then an initial commit so the compositor starts the
    /// configure handshake.
    pub(crate) fn create_surface(
        &mut self,
        conn: &mut Connection,
        wl_compositor: u32,
        xdg_wm_base: u32,
    ) -> Result<()> {
        if self.wl_surface != 0 {
            return Ok(());
        }
        self.wl_surface = conn.compositor_create_surface(wl_compositor)?;
        self.xdg_surface = conn.wm_base_get_xdg_surface(xdg_wm_base, self.wl_surface)?;
        self.xdg_toplevel = conn.xdg_surface_get_toplevel(self.xdg_surface)?;
        conn.surface_commit(self.wl_surface)?;
        Ok(())
    }

    /// Tear down the shell roles, innermost first. Each request is guarded
    /// so destruction is permitted from any state.
    pub(crate) fn destroy_surface(&mut self, conn: &mut Connection) -> Result<()> {
        if self.xdg_toplevel != 0 {
            conn.toplevel_destroy(self.xdg_toplevel)?;
            self.xdg_toplevel = 0;
        }
        if self.xdg_surface != 0 {
            conn.xdg_surface_destroy(self.xdg_surface)?;
            self.xdg_surface = 0;
        }
        if self.wl_surface != 0 {
            conn.surface_destroy(self.wl_surface)?;
            self.wl_surface = 0;
        }
        Ok(())
    }

    /// Let go of the current pixel memory. A pool the compositor has never
    /// seen can be dropped on the spot; an announced pool is parked in the
    /// deferred table and its destroy requests sent, with the actual unmap
    /// waiting for the delete_id confirmation.
    pub(crate) fn unbind_memory(
        &mut self,
        conn: &mut Connection,
        deferred: &mut DeferredTable,
    ) -> Result<()> {
        if self.wl_shm_pool != 0 && !deferred.has_capacity() {
            return Err(DisplayError::DeferredTableFull(
                crate::core::wayland::shm::DEFERRED_CHUNK_CAP,
            ));
        }

        let Some(mapping) = self.shm.take() else {
            return Ok(());
        };

        if self.wl_shm_pool == 0 {
            // never announced, nothing shared to wait for
            return Ok(());
        }

        deferred.park(DeferredChunk {
            pool: self.wl_shm_pool,
            buffer: self.wl_buffer,
            mapping,
        })?;

        if self.wl_buffer != 0 {
            conn.buffer_destroy(self.wl_buffer)?;
            self.wl_buffer = 0;
        }
        conn.pool_destroy(self.wl_shm_pool)?;
        self.wl_shm_pool = 0;

        Ok(())
    }

    /// Offer one event to this window. Returns true when the (object id,
    /// opcode) pair names one of its surface/shell/buffer objects.
    pub(crate) fn handle_event(
        &mut self,
        conn: &mut Connection,
        deferred: &mut DeferredTable,
        header: MessageHeader,
        reader: &mut MessageReader<'_>,
    ) -> Result<bool> {
        let object_id = header.object_id;

        if object_id == self.wl_buffer
            && self.wl_buffer != 0
            && header.opcode == opcode::wl_buffer::EV_RELEASE
        {
            tracing::debug!("<- wl_buffer@{}.release", self.wl_buffer);
            return Ok(true);
        }

        if object_id == self.xdg_surface
            && self.xdg_surface != 0
            && header.opcode == opcode::xdg_surface::EV_CONFIGURE
        {
            let serial = reader.uint()?;
            tracing::debug!("<- xdg_surface@{}.configure: serial={serial}", self.xdg_surface);

            self.apply_pending_resize(conn, deferred)?;
            conn.xdg_surface_ack_configure(self.xdg_surface, serial)?;

            // pool and buffer are recreated lazily on the next render pass
            self.state = WindowState::AckedConfigure;
            return Ok(true);
        }

        if object_id == self.xdg_toplevel && self.xdg_toplevel != 0 {
            match header.opcode {
                opcode::xdg_toplevel::EV_CONFIGURE => {
                    let w = reader.int()?;
                    let h = reader.int()?;
                    let states = reader.array()?;
                    tracing::debug!(
                        "<- xdg_toplevel@{}.configure: w={w} h={h} states[{}]",
                        self.xdg_toplevel,
                        states.len()
                    );
                    if w > 0
                        && h > 0
                        && (w as u32 != self.width || h as u32 != self.height)
                    {
                        // applied when the surface configure is acked
                        self.width_req = w as u32;
                        self.height_req = h as u32;
                    }
                    return Ok(true);
                }
                opcode::xdg_toplevel::EV_CLOSE => {
                    tracing::debug!("<- xdg_toplevel@{}.close", self.xdg_toplevel);
                    self.should_close = true;
                    return Ok(true);
                }
                opcode::xdg_toplevel::EV_WM_CAPABILITIES => {
                    let caps = reader.array()?;
                    tracing::debug!(
                        "<- xdg_toplevel@{}.wm_capabilities: capabilities[{}]",
                        self.xdg_toplevel,
                        caps.len()
                    );
                    return Ok(true);
                }
                _ => {}
            }
        }

        if object_id == self.wl_surface && self.wl_surface != 0 {
            match header.opcode {
                opcode::wl_surface::EV_ENTER => {
                    let output = reader.uint()?;
                    tracing::debug!("<- wl_surface@{}.enter: output={output}", self.wl_surface);
                    return Ok(true);
                }
                opcode::wl_surface::EV_PREFERRED_BUFFER_SCALE => {
                    let factor = reader.int()?;
                    tracing::debug!(
                        "<- wl_surface@{}.preferred_buffer_scale: factor={factor}",
                        self.wl_surface
                    );
                    return Ok(true);
                }
                opcode::wl_surface::EV_PREFERRED_BUFFER_TRANSFORM => {
                    let transform = reader.uint()?;
                    tracing::debug!(
                        "<- wl_surface@{}.preferred_buffer_transform: transform={transform}",
                        self.wl_surface
                    );
                    return Ok(true);
                }
                _ => {}
            }
        }

        Ok(false)
    }

    /// Commit a pending resize, if any. The old memory goes through the
    /// unbind path (deferred when announced); fresh memory is mapped at
    /// the requested size.
    fn apply_pending_resize(
        &mut self,
        conn: &mut Connection,
        deferred: &mut DeferredTable,
    ) -> Result<()> {
        let requested = self.width_req != 0 && self.height_req != 0;
        if !requested || (self.width_req == self.width && self.height_req == self.height) {
            return Ok(());
        }

        self.unbind_memory(conn, deferred)?;

        self.width = self.width_req;
        self.height = self.height_req;
        self.shm = Some(ShmMapping::alloc(pool_size(self.width, self.height))?);
        elog!(
            logging::WINDOW,
            "window {:#018x} resized to {}x{}",
            self.id,
            self.width,
            self.height
        );
        Ok(())
    }

    /// One render pass. After an acknowledged configure the pool and
    /// buffer are (re)created as needed, the diagnostic pattern written,
    /// and the buffer attached and committed.
    pub(crate) fn render(&mut self, conn: &mut Connection, wl_shm: u32) -> Result<()> {
        if self.state != WindowState::AckedConfigure {
            return Ok(());
        }
        debug_assert!(self.wl_surface != 0);
        debug_assert!(self.xdg_surface != 0);
        debug_assert!(self.xdg_toplevel != 0);

        if self.wl_shm_pool == 0 {
            let mapping = self
                .shm
                .as_ref()
                .ok_or_else(|| DisplayError::state("window has no mapped pixel memory"))?;
            self.wl_shm_pool =
                conn.shm_create_pool(wl_shm, mapping.fd(), mapping.len() as u32)?;
        }
        if self.wl_buffer == 0 {
            self.wl_buffer = conn.pool_create_buffer(
                self.wl_shm_pool,
                self.width,
                self.height,
                self.width * COLOR_CHANNELS,
                FORMAT_XRGB8888,
            )?;
        }

        let mapping = self
            .shm
            .as_mut()
            .ok_or_else(|| DisplayError::state("window has no mapped pixel memory"))?;
        for px in mapping.pixels_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&DIAGNOSTIC_FILL.to_ne_bytes());
        }

        conn.surface_attach(self.wl_surface, self.wl_buffer)?;
        conn.surface_commit(self.wl_surface)?;

        self.state = WindowState::Attached;
        Ok(())
    }
}

/// Pool bytes for one window: width * height at 4 bytes per pixel.
pub(crate) fn pool_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * COLOR_CHANNELS as usize
}
