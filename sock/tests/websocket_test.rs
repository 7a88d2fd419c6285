//! End-to-end WebSocket tests against a minimal in-test server.
//!
//! The server side speaks just enough RFC 6455 to upgrade one connection and
//! exchange a handful of frames; frame encoding is shared with the client.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use sock::transport::websocket::{compute_accept_key, Frame, Opcode};
use sock::{Sock, SockConfig, SockError, Timeout};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read the upgrade request head and return it.
fn read_request(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

fn header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    request.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

fn accept(stream: &mut TcpStream) -> String {
    let request = read_request(stream);
    let key = header(&request, "Sec-WebSocket-Key").expect("client key");
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(key)
    );
    stream.write_all(response.as_bytes()).unwrap();
    request
}

/// Read one complete frame from the client.
fn read_frame(stream: &mut TcpStream, pending: &mut Vec<u8>) -> Frame {
    let mut chunk = [0u8; 1024];
    loop {
        if let Some((frame, used)) = Frame::decode(pending).unwrap() {
            pending.drain(..used);
            return frame;
        }
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "client closed before sending a full frame");
        pending.extend_from_slice(&chunk[..n]);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn fragmented_message_ping_and_close() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let request = accept(&mut stream);

        let first = Frame {
            fin: false,
            opcode: Opcode::Text,
            payload: b"Hel".to_vec(),
        };
        let ping = Frame::new(Opcode::Ping, b"p".to_vec());
        let last = Frame::new(Opcode::Continuation, b"lo\n".to_vec());
        for frame in [first, ping, last] {
            stream.write_all(&frame.encode(None)).unwrap();
        }

        let mut pending = Vec::new();
        let pong = read_frame(&mut stream, &mut pending);
        let data = read_frame(&mut stream, &mut pending);

        stream
            .write_all(&Frame::new(Opcode::Close, 1000u16.to_be_bytes().to_vec()).encode(None))
            .unwrap();
        let close = read_frame(&mut stream, &mut pending);

        (request, vec![pong, data, close])
    });

    let url = format!("ws://127.0.0.1:{}/chat", port);
    let mut conn = Sock::websocket(&url, SockConfig::default()).unwrap();

    assert_eq!(conn.read_line(None).unwrap(), b"Hello\n");
    conn.send(b"hi").unwrap();
    assert_eq!(conn.read_all(None).unwrap(), b"");
    assert!(conn.is_eof());

    let (request, frames) = server.join().unwrap();
    assert!(request.starts_with("GET /chat HTTP/1.1\r\n"), "{}", request);
    assert_eq!(header(&request, "Host"), Some(format!("127.0.0.1:{}", port).as_str()));
    assert_eq!(header(&request, "Sec-WebSocket-Version"), Some("13"));

    assert_eq!(frames[0], Frame::new(Opcode::Pong, b"p".to_vec()));
    assert_eq!(frames[1], Frame::new(Opcode::Binary, b"hi".to_vec()));
    assert_eq!(frames[2].opcode, Opcode::Close);
    assert_eq!(frames[2].payload, 1000u16.to_be_bytes());
}

#[test]
fn frames_in_the_same_segment_as_the_upgrade() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream);
        let key = header(&request, "Sec-WebSocket-Key").unwrap();
        let mut out = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            compute_accept_key(key)
        )
        .into_bytes();
        out.extend(Frame::new(Opcode::Binary, b"early\n".to_vec()).encode(None));
        stream.write_all(&out).unwrap();
        // Hold the stream open until the client has read.
        let mut pending = Vec::new();
        read_frame(&mut stream, &mut pending)
    });

    let url = format!("ws://127.0.0.1:{}", port);
    let mut conn = Sock::websocket(&url, SockConfig::default()).unwrap();
    assert_eq!(conn.read_line(None).unwrap(), b"early\n");
    drop(conn);

    // Dropping the client sends a normal close.
    let close = server.join().unwrap();
    assert_eq!(close.opcode, Opcode::Close);
}

#[test]
fn trickled_frame_stays_within_bounded_read() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        accept(&mut stream);
        stream.set_nodelay(true).unwrap();
        // One byte every 50 ms: no single read waits long, the frame does.
        let frame = Frame::new(Opcode::Binary, b"slow line\n".to_vec()).encode(None);
        for byte in frame {
            stream.write_all(&[byte]).unwrap();
            thread::sleep(Duration::from_millis(50));
        }
        let mut pending = Vec::new();
        read_frame(&mut stream, &mut pending)
    });

    let url = format!("ws://127.0.0.1:{}", port);
    let mut conn = Sock::websocket(&url, SockConfig::default()).unwrap();

    let start = Instant::now();
    let err = conn
        .read_line(Some(Timeout::Bounded(Duration::from_millis(200))))
        .unwrap_err();
    let elapsed = start.elapsed();
    assert!(err.is_timeout(), "got {:?}", err);
    assert!(elapsed < Duration::from_millis(400), "returned after {:?}", elapsed);

    // The bytes read so far are kept; the rest of the frame completes it.
    assert_eq!(conn.read_line(Some(Timeout::Blocking)).unwrap(), b"slow line\n");
    drop(conn);
    assert_eq!(server.join().unwrap().opcode, Opcode::Close);
}

#[test]
fn refused_upgrade_is_handshake_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_request(&mut stream);
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let url = format!("ws://127.0.0.1:{}/missing", port);
    let err = Sock::websocket(&url, SockConfig::default()).unwrap_err();
    assert!(matches!(err, SockError::Handshake(_)), "got {:?}", err);
    server.join().unwrap();
}
