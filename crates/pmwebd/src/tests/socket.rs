//! Requests over a real loopback socket.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};

use pmweb_config::SocketEndpoint;

use crate::transport::{ListenerHandle, SocketListener};
use crate::webapi::{self, GatewayHandle, HttpConnectionHandler};

use super::support::{self, wire_get};

struct Server {
    address: SocketAddr,
    listener: ListenerHandle,
    gateway: GatewayHandle,
}

impl Server {
    fn stop(self) {
        self.listener.shutdown();
        self.listener.join().expect("join listener");
        self.gateway.shutdown().expect("gateway shutdown");
    }
}

#[fixture]
fn server() -> Server {
    let listener =
        SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind listener");
    let address = listener.local_addr().expect("bound address");
    let gateway =
        webapi::start(Arc::new(support::catalogue()), support::settings()).expect("gateway");
    let handler = Arc::new(HttpConnectionHandler::new(gateway.events()));
    let listener = listener.start(handler).expect("start listener");
    Server {
        address,
        listener,
        gateway,
    }
}

/// Sends `requests`, half-closes and reads until the server hangs up.
fn converse(address: SocketAddr, requests: &[String]) -> String {
    let mut stream = TcpStream::connect(address).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    for request in requests {
        stream.write_all(request.as_bytes()).expect("write request");
    }
    stream.shutdown(Shutdown::Write).expect("half close");
    let mut text = String::new();
    stream.read_to_string(&mut text).expect("read response");
    text
}

/// Splits one response into its head and de-chunked body.
fn split_response(raw: &str) -> (&str, String) {
    let (head, mut rest) = raw.split_once("\r\n\r\n").expect("response head");
    if !head.contains("transfer-encoding: chunked") {
        return (head, rest.to_owned());
    }
    let mut body = String::new();
    loop {
        let (size, tail) = rest.split_once("\r\n").expect("chunk size");
        let size = usize::from_str_radix(size, 16).expect("hex chunk size");
        if size == 0 {
            break;
        }
        body.push_str(&tail[..size]);
        rest = &tail[size + 2..];
    }
    (head, body)
}

#[rstest]
fn fetch_is_streamed_in_chunks(server: Server) {
    let raw = converse(server.address, &[wire_get("/pmapi/fetch?names=hinv.ncpu")]);
    let (head, body) = split_response(&raw);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    assert!(head.contains("content-type: application/json"), "{head}");
    assert!(head.contains("transfer-encoding: chunked"), "{head}");
    assert_eq!(
        body,
        "{\"context\":\"1\",\"timestamp\":{\"sec\":1700000000,\"nsec\":250000000},\
         \"values\":[{\"pmid\":\"60.0.32\",\"name\":\"hinv.ncpu\",\
         \"instances\":[{\"instance\":null,\"value\":2}]}]}\r\n"
    );
    server.stop();
}

#[rstest]
fn unknown_url_gets_a_sized_reply(server: Server) {
    let raw = converse(server.address, &[wire_get("/series/query")]);
    let (head, body) = split_response(&raw);
    let expected = "{\"success\":false,\"message\":\"unknown URL\"}\r\n";
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"), "{head}");
    assert!(head.contains("content-type: application/json"), "{head}");
    assert!(
        head.contains(&format!("content-length: {}", expected.len())),
        "{head}"
    );
    assert_eq!(body, expected);
    server.stop();
}

#[rstest]
fn scrape_uses_the_text_content_type(server: Server) {
    let raw = converse(server.address, &[wire_get("/metrics?names=kernel.all.sysfork")]);
    let (head, body) = split_response(&raw);
    assert!(
        head.contains("content-type: text/plain; version=0.0.4; charset=utf-8"),
        "{head}"
    );
    assert!(body.contains("# TYPE kernel_all_sysfork counter\n"), "{body}");
    server.stop();
}

#[rstest]
fn malformed_request_line_is_refused(server: Server) {
    let raw = converse(server.address, &["NONSENSE\r\n\r\n".to_owned()]);
    assert!(raw.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{raw}");
    server.stop();
}

#[rstest]
fn sequential_requests_share_a_connection(server: Server) {
    let mut stream = TcpStream::connect(server.address).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    let mut reader = stream.try_clone().expect("clone stream");

    stream
        .write_all(wire_get("/pmapi/context").as_bytes())
        .expect("write context");
    let first = read_until(&mut reader, "0\r\n\r\n");
    assert!(first.contains("\"context\":\"1\""), "{first}");

    stream
        .write_all(wire_get("/pmapi/1/store?name=hinv.ncpu&value=4").as_bytes())
        .expect("write store");
    let second = read_until(&mut reader, "{\"success\":true}\r\n");
    assert!(second.starts_with("HTTP/1.1 200 OK\r\n"), "{second}");

    drop(stream);
    server.stop();
}

#[rstest]
fn pipelined_requests_are_answered_in_order(server: Server) {
    let raw = converse(
        server.address,
        &[
            wire_get("/pmapi/context"),
            wire_get("/series/query"),
            wire_get("/pmapi/1/store?name=hinv.ncpu&value=4"),
        ],
    );
    let statuses: Vec<&str> = raw
        .split("HTTP/1.1 ")
        .skip(1)
        .filter_map(|response| response.get(..3))
        .collect();
    assert_eq!(statuses, ["200", "404", "200"], "{raw}");
    server.stop();
}

#[rstest]
fn unread_pipeline_does_not_stall_other_clients(server: Server) {
    let mut hog = TcpStream::connect(server.address).expect("connect hog");
    hog.set_write_timeout(Some(Duration::from_secs(2)))
        .expect("write timeout");
    let flood = wire_get("/metrics").repeat(4096);
    let writer = thread::spawn(move || {
        // The server stops reading once its replies back up; that is fine.
        hog.write_all(flood.as_bytes()).ok();
        hog
    });

    let raw = converse(server.address, &[wire_get("/pmapi/context")]);
    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "{raw}");
    let (_, body) = split_response(&raw);
    assert!(body.contains("\"context\":\"1\""), "{body}");

    server.stop();
    drop(writer.join().expect("hog writer"));
}

fn read_until(reader: &mut TcpStream, terminator: &str) -> String {
    let mut text = String::new();
    let mut buffer = [0_u8; 1024];
    while !text.ends_with(terminator) {
        let read = reader.read(&mut buffer).expect("read response");
        assert!(read > 0, "connection closed early: {text}");
        text.push_str(std::str::from_utf8(&buffer[..read]).expect("utf8 response"));
    }
    text
}
