use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use crate::core::wayland::connection::Connection;
use crate::core::wayland::opcode;
use crate::core::wayland::shm::DeferredTable;
use crate::core::wayland::socket::WireSocket;
use crate::core::wayland::wire::{MessageHeader, MessageReader, MessageWriter};
use crate::core::window::window::{pool_size, Window, WindowConfig, WindowState};

fn conn_pair() -> (Connection, UnixStream) {
    let (a, b) = UnixStream::pair().unwrap();
    b.set_nonblocking(true).unwrap();
    (Connection::new(WireSocket::from_stream(a)), b)
}

fn test_window(conn: &mut Connection) -> Window {
    let config = WindowConfig {
        x: 0,
        y: 0,
        width: 600,
        height: 400,
        title: "test".to_string(),
    };
    let mut window = Window::new(0xDEAD_BEEF, &config).unwrap();
    // compositor and wm_base would normally be bound globals
    window.create_surface(conn, 90, 91).unwrap();
    window
}

/// Drain whatever requests reached the fake compositor side.
fn read_requests(server: &mut UnixStream) -> Vec<(u32, u16, Vec<u8>)> {
    let mut bytes = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match server.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => bytes.extend_from_slice(&chunk[..n]),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("fake compositor read failed: {e}"),
        }
    }

    let mut out = Vec::new();
    let mut cursor = 0;
    while cursor < bytes.len() {
        let header = MessageHeader::parse(&bytes[cursor..]).unwrap();
        out.push((
            header.object_id,
            header.opcode,
            bytes[cursor + 8..cursor + header.size].to_vec(),
        ));
        cursor += header.size;
    }
    out
}

fn deliver(
    window: &mut Window,
    conn: &mut Connection,
    deferred: &mut DeferredTable,
    msg: &[u8],
) -> bool {
    let header = MessageHeader::parse(msg).unwrap();
    let mut reader = MessageReader::new(&msg[8..header.size]);
    window.handle_event(conn, deferred, header, &mut reader).unwrap()
}

fn toplevel_configure(toplevel: u32, w: i32, h: i32) -> Vec<u8> {
    MessageWriter::new(toplevel, opcode::xdg_toplevel::EV_CONFIGURE)
        .int(w)
        .int(h)
        .uint(0) // empty states array
        .finish()
        .unwrap()
}

fn surface_configure(xdg_surface: u32, serial: u32) -> Vec<u8> {
    MessageWriter::new(xdg_surface, opcode::xdg_surface::EV_CONFIGURE)
        .uint(serial)
        .finish()
        .unwrap()
}

#[test]
fn test_initial_window_state() {
    let (mut conn, _server) = conn_pair();
    let window = test_window(&mut conn);

    assert_eq!(window.state(), WindowState::None);
    assert!(!window.should_close());
    assert_eq!(window.dimensions(), (600, 400));
    // 600 * 400 * 4 bytes of pixel memory are mapped up front
    assert_eq!(window.shm.as_ref().unwrap().len(), 960_000);
}

#[test]
fn test_close_event_sets_flag_and_sends_nothing() {
    let (mut conn, mut server) = conn_pair();
    let mut deferred = DeferredTable::new();
    let mut window = test_window(&mut conn);
    read_requests(&mut server); // surface creation traffic

    let close = MessageWriter::new(window.xdg_toplevel, opcode::xdg_toplevel::EV_CLOSE)
        .finish()
        .unwrap();
    assert!(deliver(&mut window, &mut conn, &mut deferred, &close));

    assert!(window.should_close());
    assert_eq!(window.state(), WindowState::None);
    assert!(read_requests(&mut server).is_empty());
}

#[test]
fn test_toplevel_configure_only_stores_candidates() {
    let (mut conn, _server) = conn_pair();
    let mut deferred = DeferredTable::new();
    let mut window = test_window(&mut conn);

    let msg = toplevel_configure(window.xdg_toplevel, 800, 600);
    assert!(deliver(&mut window, &mut conn, &mut deferred, &msg));

    assert_eq!((window.width_req, window.height_req), (800, 600));
    // nothing applied yet
    assert_eq!(window.dimensions(), (600, 400));
    assert_eq!(window.shm.as_ref().unwrap().len(), 960_000);
    assert!(deferred.is_empty());
}

#[test]
fn test_noop_resize_never_reallocates() {
    let (mut conn, mut server) = conn_pair();
    let mut deferred = DeferredTable::new();
    let mut window = test_window(&mut conn);
    read_requests(&mut server);

    let fd_before = window.shm.as_ref().unwrap().fd().as_raw_fd();

    let msg = toplevel_configure(window.xdg_toplevel, 600, 400);
    deliver(&mut window, &mut conn, &mut deferred, &msg);
    assert_eq!(window.width_req, 0);

    let msg = surface_configure(window.xdg_surface, 7);
    deliver(&mut window, &mut conn, &mut deferred, &msg);

    assert_eq!(window.state(), WindowState::AckedConfigure);
    assert!(deferred.is_empty());
    assert_eq!(window.shm.as_ref().unwrap().fd().as_raw_fd(), fd_before);

    // only the acknowledge went out
    let requests = read_requests(&mut server);
    assert_eq!(requests.len(), 1);
    let (object, op, payload) = &requests[0];
    assert_eq!(*object, window.xdg_surface);
    assert_eq!(*op, opcode::xdg_surface::REQ_ACK_CONFIGURE);
    assert_eq!(MessageReader::new(payload).uint().unwrap(), 7);
}

#[test]
fn test_resize_with_announced_pool_defers_teardown() {
    let (mut conn, mut server) = conn_pair();
    let mut deferred = DeferredTable::new();
    let mut window = test_window(&mut conn);

    // pretend the render pass already announced pool and buffer
    window.wl_shm_pool = conn.next_id();
    window.wl_buffer = conn.next_id();
    let old_pool = window.wl_shm_pool;
    let old_buffer = window.wl_buffer;
    read_requests(&mut server);

    let msg = toplevel_configure(window.xdg_toplevel, 800, 600);
    deliver(&mut window, &mut conn, &mut deferred, &msg);
    let msg = surface_configure(window.xdg_surface, 5);
    deliver(&mut window, &mut conn, &mut deferred, &msg);

    // old memory is parked, not freed; new memory is mapped at the new size
    assert_eq!(deferred.len(), 1);
    assert!(deferred.owns_buffer(old_buffer));
    assert_eq!(window.dimensions(), (800, 600));
    assert_eq!(window.shm.as_ref().unwrap().len(), 800 * 600 * 4);
    assert_eq!(window.state(), WindowState::AckedConfigure);
    assert_eq!(window.wl_shm_pool, 0);
    assert_eq!(window.wl_buffer, 0);

    let requests = read_requests(&mut server);
    let opcodes: Vec<(u32, u16)> = requests.iter().map(|(o, op, _)| (*o, *op)).collect();
    assert!(opcodes.contains(&(old_buffer, opcode::wl_buffer::REQ_DESTROY)));
    assert!(opcodes.contains(&(old_pool, opcode::wl_shm_pool::REQ_DESTROY)));

    let ack = requests
        .iter()
        .find(|(o, op, _)| *o == window.xdg_surface && *op == opcode::xdg_surface::REQ_ACK_CONFIGURE)
        .expect("ack_configure was not sent");
    assert_eq!(MessageReader::new(&ack.2).uint().unwrap(), 5);
}

#[test]
fn test_resize_of_unannounced_pool_frees_immediately() {
    let (mut conn, _server) = conn_pair();
    let mut deferred = DeferredTable::new();
    let mut window = test_window(&mut conn);

    let msg = toplevel_configure(window.xdg_toplevel, 1024, 768);
    deliver(&mut window, &mut conn, &mut deferred, &msg);
    let msg = surface_configure(window.xdg_surface, 2);
    deliver(&mut window, &mut conn, &mut deferred, &msg);

    assert!(deferred.is_empty());
    assert_eq!(window.shm.as_ref().unwrap().len(), pool_size(1024, 768));
}

#[test]
fn test_unrelated_event_is_not_claimed() {
    let (mut conn, _server) = conn_pair();
    let mut deferred = DeferredTable::new();
    let mut window = test_window(&mut conn);

    let msg = MessageWriter::new(4242, opcode::xdg_toplevel::EV_CLOSE)
        .finish()
        .unwrap();
    assert!(!deliver(&mut window, &mut conn, &mut deferred, &msg));

    // right object, unknown opcode: also unclaimed
    let msg = MessageWriter::new(window.wl_surface, 42).finish().unwrap();
    assert!(!deliver(&mut window, &mut conn, &mut deferred, &msg));
}

#[test]
fn test_render_attaches_after_acked_configure() {
    let (mut conn, mut server) = conn_pair();
    let mut deferred = DeferredTable::new();
    let mut window = test_window(&mut conn);

    let msg = surface_configure(window.xdg_surface, 1);
    deliver(&mut window, &mut conn, &mut deferred, &msg);
    read_requests(&mut server);

    window.render(&mut conn, 95).unwrap();

    assert_ne!(window.wl_shm_pool, 0);
    assert_ne!(window.wl_buffer, 0);
    assert_eq!(window.state(), WindowState::Attached);

    // the diagnostic pattern landed in the mapping
    let pixels = window.shm.as_mut().unwrap().pixels_mut();
    assert_eq!(&pixels[0..4], &0x00FF_FF00u32.to_ne_bytes());

    let requests = read_requests(&mut server);
    let opcodes: Vec<(u32, u16)> = requests.iter().map(|(o, op, _)| (*o, *op)).collect();
    assert!(opcodes.contains(&(95, opcode::wl_shm::REQ_CREATE_POOL)));
    assert!(opcodes.contains(&(window.wl_shm_pool, opcode::wl_shm_pool::REQ_CREATE_BUFFER)));
    assert!(opcodes.contains(&(window.wl_surface, opcode::wl_surface::REQ_ATTACH)));
    assert!(opcodes.contains(&(window.wl_surface, opcode::wl_surface::REQ_COMMIT)));
}

#[test]
fn test_render_is_a_noop_before_configure() {
    let (mut conn, mut server) = conn_pair();
    let mut window = test_window(&mut conn);
    read_requests(&mut server);

    window.render(&mut conn, 95).unwrap();

    assert_eq!(window.state(), WindowState::None);
    assert!(read_requests(&mut server).is_empty());
}

#[test]
fn test_destroy_surface_is_guarded() {
    let (mut conn, mut server) = conn_pair();
    let mut window = test_window(&mut conn);
    read_requests(&mut server);

    window.destroy_surface(&mut conn).unwrap();
    let requests = read_requests(&mut server);
    assert_eq!(requests.len(), 3);

    // ids are zeroed, a second destroy sends nothing
    window.destroy_surface(&mut conn).unwrap();
    assert!(read_requests(&mut server).is_empty());
}
