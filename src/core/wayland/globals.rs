//! Global objects: registry binding and display-scoped event handling.
//!
//! During connection setup the registry announces every global the
//! compositor offers; the binder picks out the interfaces this client
//! needs and binds each to a fresh local id. After setup the same ids
//! route seat, keyboard, output, shm and wm_base events.

use std::collections::VecDeque;
use std::os::fd::OwnedFd;

use crate::core::errors::{DisplayError, Result};
use crate::core::wayland::connection::Connection;
use crate::core::wayland::wire::{MessageHeader, MessageReader};
use crate::core::wayland::{interface, opcode};
use crate::elog;
use crate::util::logging;

/// The keymap the compositor shared through the keyboard's keymap event.
/// The descriptor is held, not yet compiled; closing happens on drop.
pub struct Keymap {
    pub format: u32,
    pub size: u32,
    pub fd: OwnedFd,
}

#[derive(Default)]
pub struct SeatState {
    pub name: Option<String>,
    pub capabilities: u32,
    pub keymap: Option<Keymap>,
}

/// What the single output has told us about itself. Informational only;
/// windows size themselves through the configure handshake.
#[derive(Default)]
pub struct OutputState {
    pub name: Option<String>,
    pub description: Option<String>,
    pub scale: i32,
    pub width: i32,
    pub height: i32,
    pub refresh: i32,
}

/// Locally bound global ids plus the state their events feed. An id of 0
/// means "not announced yet".
#[derive(Default)]
pub struct GlobalBindings {
    pub wl_registry: u32,
    pub wl_shm: u32,
    pub xdg_wm_base: u32,
    pub wl_compositor: u32,
    pub wl_output: u32,
    pub wl_seat: u32,
    pub wl_keyboard: u32,

    pub seat: SeatState,
    pub output: OutputState,
}

impl GlobalBindings {
    /// The interfaces a window cannot exist without.
    pub fn required_bound(&self) -> bool {
        self.wl_shm != 0 && self.xdg_wm_base != 0 && self.wl_compositor != 0
    }

    /// Offer a message to the global handlers. Returns false when the
    /// object id belongs to no bound global; an unknown opcode on a bound
    /// global is a protocol violation.
    pub fn handle_event(
        &mut self,
        conn: &mut Connection,
        pending_fds: &mut VecDeque<OwnedFd>,
        header: MessageHeader,
        reader: &mut MessageReader<'_>,
    ) -> Result<bool> {
        if header.object_id == self.wl_registry && self.wl_registry != 0 {
            self.handle_registry(conn, header, reader)?;
            return Ok(true);
        }
        if header.object_id == self.wl_shm && self.wl_shm != 0 {
            self.handle_shm(header, reader)?;
            return Ok(true);
        }
        if header.object_id == self.xdg_wm_base && self.xdg_wm_base != 0 {
            self.handle_wm_base(conn, header, reader)?;
            return Ok(true);
        }
        if header.object_id == self.wl_output && self.wl_output != 0 {
            self.handle_output(header, reader)?;
            return Ok(true);
        }
        if header.object_id == self.wl_seat && self.wl_seat != 0 {
            self.handle_seat(header, reader)?;
            return Ok(true);
        }
        if header.object_id == self.wl_keyboard && self.wl_keyboard != 0 {
            self.handle_keyboard(pending_fds, header, reader)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn handle_registry(
        &mut self,
        conn: &mut Connection,
        header: MessageHeader,
        reader: &mut MessageReader<'_>,
    ) -> Result<()> {
        if header.opcode != opcode::wl_registry::EV_GLOBAL {
            return Err(unknown_event("wl_registry", header));
        }

        let name = reader.uint()?;
        let iface = reader.string()?;
        let version = reader.uint()?;
        tracing::debug!(
            "<- wl_registry@{}.global: name={name} interface={iface} version={version}",
            self.wl_registry
        );

        match iface.as_str() {
            interface::WL_SHM => {
                self.wl_shm = conn.registry_bind(self.wl_registry, name, &iface, version)?;
            }
            interface::XDG_WM_BASE => {
                self.xdg_wm_base = conn.registry_bind(self.wl_registry, name, &iface, version)?;
            }
            interface::WL_COMPOSITOR => {
                self.wl_compositor =
                    conn.registry_bind(self.wl_registry, name, &iface, version)?;
            }
            interface::WL_OUTPUT => {
                self.wl_output = conn.registry_bind(self.wl_registry, name, &iface, version)?;
            }
            interface::WL_SEAT => {
                self.wl_seat = conn.registry_bind(self.wl_registry, name, &iface, version)?;
                self.wl_keyboard = conn.seat_get_keyboard(self.wl_seat)?;
            }
            _ => {
                tracing::trace!("ignoring global {iface} v{version}");
            }
        }
        Ok(())
    }

    fn handle_shm(&mut self, header: MessageHeader, reader: &mut MessageReader<'_>) -> Result<()> {
        if header.opcode != opcode::wl_shm::EV_FORMAT {
            return Err(unknown_event("wl_shm", header));
        }
        let format = reader.uint()?;
        tracing::debug!("<- wl_shm@{}.format: format={format:#x}", self.wl_shm);
        Ok(())
    }

    fn handle_wm_base(
        &mut self,
        conn: &mut Connection,
        header: MessageHeader,
        reader: &mut MessageReader<'_>,
    ) -> Result<()> {
        if header.opcode != opcode::xdg_wm_base::EV_PING {
            return Err(unknown_event("xdg_wm_base", header));
        }
        let serial = reader.uint()?;
        tracing::debug!("<- xdg_wm_base@{}.ping: serial={serial}", self.xdg_wm_base);
        conn.wm_base_pong(self.xdg_wm_base, serial)
    }

    fn handle_output(
        &mut self,
        header: MessageHeader,
        reader: &mut MessageReader<'_>,
    ) -> Result<()> {
        let output = self.wl_output;
        match header.opcode {
            opcode::wl_output::EV_GEOMETRY => {
                let x = reader.int()?;
                let y = reader.int()?;
                let physical_width = reader.int()?;
                let physical_height = reader.int()?;
                let subpixel = reader.int()?;
                let make = reader.string()?;
                let model = reader.string()?;
                let transform = reader.int()?;
                tracing::debug!(
                    "<- wl_output@{output}.geometry: x={x} y={y} physical={physical_width}x{physical_height}mm subpixel={subpixel} make={make} model={model} transform={transform}"
                );
            }
            opcode::wl_output::EV_MODE => {
                let flags = reader.uint()?;
                self.output.width = reader.int()?;
                self.output.height = reader.int()?;
                self.output.refresh = reader.int()?;
                tracing::debug!(
                    "<- wl_output@{output}.mode: flags={flags:#x} {}x{} refresh={}mHz",
                    self.output.width,
                    self.output.height,
                    self.output.refresh
                );
            }
            opcode::wl_output::EV_DONE => {
                tracing::debug!("<- wl_output@{output}.done");
            }
            opcode::wl_output::EV_SCALE => {
                self.output.scale = reader.int()?;
                tracing::debug!("<- wl_output@{output}.scale: factor={}", self.output.scale);
            }
            opcode::wl_output::EV_NAME => {
                let name = reader.string()?;
                tracing::debug!("<- wl_output@{output}.name: {name}");
                self.output.name = Some(name);
            }
            opcode::wl_output::EV_DESCRIPTION => {
                let description = reader.string()?;
                tracing::debug!("<- wl_output@{output}.description: {description}");
                self.output.description = Some(description);
            }
            _ => return Err(unknown_event("wl_output", header)),
        }
        Ok(())
    }

    fn handle_seat(&mut self, header: MessageHeader, reader: &mut MessageReader<'_>) -> Result<()> {
        match header.opcode {
            opcode::wl_seat::EV_CAPABILITIES => {
                self.seat.capabilities = reader.uint()?;
                tracing::debug!(
                    "<- wl_seat@{}.capabilities: {:#x}",
                    self.wl_seat,
                    self.seat.capabilities
                );
            }
            opcode::wl_seat::EV_NAME => {
                let name = reader.string()?;
                elog!(logging::SEAT, "seat announced itself as {name}");
                self.seat.name = Some(name);
            }
            _ => return Err(unknown_event("wl_seat", header)),
        }
        Ok(())
    }

    fn handle_keyboard(
        &mut self,
        pending_fds: &mut VecDeque<OwnedFd>,
        header: MessageHeader,
        reader: &mut MessageReader<'_>,
    ) -> Result<()> {
        let keyboard = self.wl_keyboard;
        match header.opcode {
            opcode::wl_keyboard::EV_KEYMAP => {
                let format = reader.uint()?;
                let size = reader.uint()?;
                // the keymap itself arrives out-of-band as a descriptor
                let fd = pending_fds.pop_front().ok_or_else(|| {
                    DisplayError::protocol("keymap event arrived without a descriptor")
                })?;
                tracing::debug!(
                    "<- wl_keyboard@{keyboard}.keymap: format={format} size={size}"
                );
                self.seat.keymap = Some(Keymap { format, size, fd });
            }
            opcode::wl_keyboard::EV_ENTER => {
                let serial = reader.uint()?;
                let surface = reader.uint()?;
                let keys = reader.array()?;
                tracing::debug!(
                    "<- wl_keyboard@{keyboard}.enter: serial={serial} surface={surface} keys[{}]",
                    keys.len()
                );
            }
            opcode::wl_keyboard::EV_LEAVE => {
                let serial = reader.uint()?;
                let surface = reader.uint()?;
                tracing::debug!(
                    "<- wl_keyboard@{keyboard}.leave: serial={serial} surface={surface}"
                );
            }
            opcode::wl_keyboard::EV_KEY => {
                let serial = reader.uint()?;
                let time = reader.uint()?;
                let key = reader.uint()?;
                let state = reader.uint()?;
                tracing::debug!(
                    "<- wl_keyboard@{keyboard}.key: serial={serial} time={time} key={key} state={state}"
                );
            }
            opcode::wl_keyboard::EV_MODIFIERS => {
                let serial = reader.uint()?;
                let depressed = reader.uint()?;
                let latched = reader.uint()?;
                let locked = reader.uint()?;
                let group = reader.uint()?;
                tracing::debug!(
                    "<- wl_keyboard@{keyboard}.modifiers: serial={serial} depressed={depressed} latched={latched} locked={locked} group={group}"
                );
            }
            opcode::wl_keyboard::EV_REPEAT_INFO => {
                let rate = reader.int()?;
                let delay = reader.int()?;
                tracing::debug!(
                    "<- wl_keyboard@{keyboard}.repeat_info: rate={rate} delay={delay}"
                );
            }
            _ => return Err(unknown_event("wl_keyboard", header)),
        }
        Ok(())
    }
}

fn unknown_event(iface: &str, header: MessageHeader) -> DisplayError {
    DisplayError::protocol(format!(
        "unknown {iface} event: object_id={} opcode={}",
        header.object_id, header.opcode
    ))
}
