//! Loopback HTTP fixtures for unit tests.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;

/// Canned reply served by `serve_once`.
pub(crate) struct CannedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

/// What the fixture received.
pub(crate) struct CapturedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

/// Accept a single connection on an ephemeral port, drain the request and
/// answer with `response`. Returns the base URL and the join handle.
pub(crate) fn serve_once(response: CannedResponse) -> (String, JoinHandle<CapturedRequest>) {
    let (url, join) = serve_sequence(vec![response]);
    let join = std::thread::spawn(move || {
        join.join()
            .expect("fixture thread")
            .pop()
            .expect("one request")
    });
    (url, join)
}

/// Answer one connection per canned response, in order.
pub(crate) fn serve_sequence(
    responses: Vec<CannedResponse>,
) -> (String, JoinHandle<Vec<CapturedRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener addr");
    let join = std::thread::spawn(move || {
        let mut captured = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().expect("accept");
            captured.push(read_request(&mut stream));
            let header = format!(
                "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                response.status,
                response.content_type,
                response.body.len()
            );
            stream.write_all(header.as_bytes()).expect("write header");
            stream.write_all(&response.body).expect("write body");
        }
        captured
    });
    (format!("http://{}", addr), join)
}

fn read_request(stream: &mut std::net::TcpStream) -> CapturedRequest {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).expect("read request");
        if n == 0 {
            break data.len();
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).expect("read body");
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    CapturedRequest { head, body }
}

/// Small JPEG with a dark rectangle on a light background.
pub(crate) fn jpeg_with_box(width: u32, height: u32, boxed: (u32, u32, u32, u32)) -> Vec<u8> {
    let (bx, by, bw, bh) = boxed;
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        if x >= bx && x < bx + bw && y >= by && y < by + bh {
            image::Rgb([20, 20, 20])
        } else {
            image::Rgb([220, 220, 220])
        }
    });
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 92)
        .encode_image(&img)
        .expect("encode fixture jpeg");
    bytes
}
