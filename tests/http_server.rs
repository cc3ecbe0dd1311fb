//! End-to-end HTTP server tests over loopback TCP.
//!
//! The runtime under test stays on the test thread; the client side is a
//! plain blocking socket on a helper thread.

use sprocket::http::{
    HttpError, HttpServer, HttpServerConfig, RequestFence, ResponseState,
};
use sprocket::runtime::Dispatcher;
use sprocket::time::sleep;
use std::future::Future;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sprocket::http::HttpResponse;

/// Sets the flag when dropped, so a panicking client still releases the
/// server loop.
struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn with_server<H, Fut, C>(config: HttpServerConfig, handler: H, client: C)
where
    H: Fn(RequestFence) -> Fut + 'static,
    Fut: Future<Output = Result<HttpResponse, HttpError>> + 'static,
    C: FnOnce(SocketAddr) + Send + 'static,
{
    let dispatcher = Dispatcher::new().expect("dispatcher");
    let server = HttpServer::bind("127.0.0.1:0".parse().expect("addr"), config, handler)
        .expect("bind");
    let addr = server.local_addr().expect("local addr");
    server.start();

    let done = Arc::new(AtomicBool::new(false));
    let guard_flag = Arc::clone(&done);
    let client_thread = std::thread::spawn(move || {
        let _guard = SetOnDrop(guard_flag);
        client(addr);
    });

    dispatcher.block_on(async {
        while !done.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(5)).await;
        }
    });
    dispatcher.block_on(server.close_wait());
    client_thread.join().expect("client thread");
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream
}

fn read_until_double_crlf(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => head.push(byte[0]),
            Err(e) => panic!("reading response head: {e}"),
        }
    }
    head
}

struct ClientResponse {
    status: u16,
    head: String,
    body: Vec<u8>,
}

impl ClientResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.trim()
                .eq_ignore_ascii_case(name)
                .then(|| v.trim())
        })
    }

    fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).expect("utf8 body")
    }
}

fn read_exact_len(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).expect("body");
    body
}

fn read_chunked_body(stream: &mut TcpStream) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while !line.ends_with(b"\r\n") {
            stream.read_exact(&mut byte).expect("chunk size");
            line.push(byte[0]);
        }
        let size_str = std::str::from_utf8(&line[..line.len() - 2]).expect("size line");
        let size = usize::from_str_radix(size_str.split(';').next().unwrap().trim(), 16)
            .expect("hex size");
        if size == 0 {
            // Trailer lines (none expected) end at a bare CRLF.
            loop {
                let mut trailer = Vec::new();
                while !trailer.ends_with(b"\r\n") {
                    stream.read_exact(&mut byte).expect("trailer");
                    trailer.push(byte[0]);
                }
                if trailer == b"\r\n" {
                    return body;
                }
            }
        }
        let mut data = vec![0u8; size];
        stream.read_exact(&mut data).expect("chunk data");
        body.extend_from_slice(&data);
        let mut crlf = [0u8; 2];
        stream.read_exact(&mut crlf).expect("chunk crlf");
        assert_eq!(&crlf, b"\r\n");
    }
}

fn read_response(stream: &mut TcpStream) -> ClientResponse {
    let head_bytes = read_until_double_crlf(stream);
    let head = String::from_utf8(head_bytes).expect("ascii head");
    let status: u16 = head
        .split_ascii_whitespace()
        .nth(1)
        .expect("status code")
        .parse()
        .expect("numeric status");

    let content_length = head.lines().skip(1).find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim()
            .eq_ignore_ascii_case("content-length")
            .then(|| v.trim().parse::<usize>().expect("length"))
    });
    let chunked = head.lines().skip(1).any(|line| {
        line.split_once(':').is_some_and(|(n, v)| {
            n.trim().eq_ignore_ascii_case("transfer-encoding")
                && v.trim().eq_ignore_ascii_case("chunked")
        })
    });

    let body = if chunked {
        read_chunked_body(stream)
    } else if let Some(len) = content_length {
        read_exact_len(stream, len)
    } else {
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
        rest
    };
    ClientResponse { status, head, body }
}

fn ok_handler(fence: RequestFence) -> impl Future<Output = Result<HttpResponse, HttpError>> {
    async move {
        let request = fence.into_request()?;
        let mut response = request.take_response();
        response.send_body(b"ok").await?;
        Ok(response)
    }
}

#[test]
fn get_returns_fixed_length_ok() {
    with_server(HttpServerConfig::default(), ok_handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 200);
        assert!(response.head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.header("date").is_some());
        assert_eq!(
            response.header("content-type"),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(response.header("content-length"), Some("2"));
        assert_eq!(response.header("connection"), Some("keep-alive"));
        assert_eq!(response.body_str(), "ok");
    });
}

#[test]
fn keep_alive_serves_sequential_requests() {
    with_server(HttpServerConfig::default(), ok_handler, |addr| {
        let mut stream = connect(addr);
        for _ in 0..3 {
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
                .expect("request");
            let response = read_response(&mut stream);
            assert_eq!(response.status, 200);
            assert_eq!(response.body_str(), "ok");
        }
    });
}

#[test]
fn connection_close_is_honored() {
    with_server(HttpServerConfig::default(), ok_handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 200);
        assert_eq!(response.header("connection"), Some("close"));
        // EOF follows.
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).expect("eof");
        assert!(rest.is_empty());
    });
}

#[test]
fn urlencoded_post_decodes_to_the_form_table() {
    let handler = |fence: RequestFence| async move {
        let request = fence.into_request()?;
        let post = request.post().await?;
        let body = format!(
            "a={};b={}",
            post.get("a").unwrap_or("?"),
            post.get("b").unwrap_or("?")
        );
        let mut response = request.take_response();
        response.set_header("content-type", "text/plain");
        response.send_body(body.as_bytes()).await?;
        Ok(response)
    };
    with_server(HttpServerConfig::default(), handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(
                b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 11\r\n\
                  Content-Type: application/x-www-form-urlencoded\r\n\r\na=1&b=two%20",
            )
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 200);
        assert_eq!(response.body_str(), "a=1;b=two ");
    });
}

#[test]
fn expect_100_continue_precedes_the_body_read() {
    let handler = |fence: RequestFence| async move {
        let request = fence.into_request()?;
        let body = request.read_body().await?;
        let mut response = request.take_response();
        response.send_body(&body).await?;
        Ok(response)
    };
    with_server(HttpServerConfig::default(), handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(
                b"POST /x HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\
                  Expect: 100-continue\r\n\r\n",
            )
            .expect("head");
        let interim = read_until_double_crlf(&mut stream);
        assert_eq!(interim, b"HTTP/1.1 100 Continue\r\n\r\n");
        stream
            .write_all(b"5\r\nhello\r\n0\r\n\r\n")
            .expect("chunked body");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 200);
        assert_eq!(response.body_str(), "hello");
    });
}

#[test]
fn length_and_chunked_together_yield_400() {
    with_server(HttpServerConfig::default(), ok_handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(
                b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 10\r\n\
                  Transfer-Encoding: chunked\r\n\r\n",
            )
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 400);
        // The connection closes after the error response.
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).expect("eof");
        assert!(rest.is_empty());
    });
}

#[test]
fn idle_connection_gets_408() {
    let config = HttpServerConfig::default().headers_timeout(Duration::from_millis(100));
    with_server(config, ok_handler, |addr| {
        let mut stream = connect(addr);
        let response = read_response(&mut stream);
        assert_eq!(response.status, 408);
    });
}

#[test]
fn unsupported_version_gets_505() {
    with_server(HttpServerConfig::default(), ok_handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(b"GET / HTTP/2.0\r\nHost: x\r\n\r\n")
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 505);
    });
}

#[test]
fn empty_response_becomes_404() {
    let handler = |fence: RequestFence| async move {
        let request = fence.into_request()?;
        Ok(request.take_response())
    };
    with_server(HttpServerConfig::default(), handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 404);
    });
}

#[test]
fn prepared_but_unsent_response_becomes_409() {
    let handler = |fence: RequestFence| async move {
        let request = fence.into_request()?;
        let mut response = request.take_response();
        response.prepare();
        assert_eq!(response.state(), ResponseState::Prepared);
        Ok(response)
    };
    with_server(HttpServerConfig::default(), handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 409);
    });
}

#[test]
fn handler_error_becomes_its_mapped_status() {
    let handler = |fence: RequestFence| async move {
        let _request = fence.into_request()?;
        Err(HttpError::unclassified("backend exploded"))
    };
    with_server(HttpServerConfig::default(), handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 503);
    });
}

#[test]
fn chunked_response_reassembles_byte_for_byte() {
    let handler = |fence: RequestFence| async move {
        let request = fence.into_request()?;
        let mut response = request.take_response();
        response.prepare();
        response.send_chunk(b"alpha ").await?;
        response.send_chunk(b"beta ").await?;
        response.send_chunk(b"gamma").await?;
        response.finish().await?;
        Ok(response)
    };
    with_server(HttpServerConfig::default(), handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 200);
        assert_eq!(response.header("transfer-encoding"), Some("chunked"));
        assert_eq!(response.body_str(), "alpha beta gamma");
    });
}

#[test]
fn headers_at_the_exact_cap_parse_and_one_more_byte_is_413() {
    const CAP: usize = 256;

    fn request_of_len(total: usize) -> Vec<u8> {
        let skeleton = b"GET / HTTP/1.1\r\nHost: x\r\nX-Pad: \r\n\r\n".len();
        let mut head = Vec::new();
        head.extend_from_slice(b"GET / HTTP/1.1\r\nHost: x\r\nX-Pad: ");
        head.extend(std::iter::repeat(b'p').take(total - skeleton));
        head.extend_from_slice(b"\r\n\r\n");
        assert_eq!(head.len(), total);
        head
    }

    let config = HttpServerConfig::default().max_headers_size(CAP);
    with_server(config, ok_handler, |addr| {
        let mut stream = connect(addr);
        stream.write_all(&request_of_len(CAP)).expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 200);
        drop(stream);

        let mut stream = connect(addr);
        stream.write_all(&request_of_len(CAP + 1)).expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 413);
    });
}

#[test]
fn body_at_the_exact_cap_is_accepted_and_one_more_byte_is_413() {
    const CAP: usize = 16;
    let handler = |fence: RequestFence| async move {
        let request = fence.into_request()?;
        let body = request.read_body().await?;
        let mut response = request.take_response();
        response.send_body(format!("{}", body.len()).as_bytes()).await?;
        Ok(response)
    };
    let config = HttpServerConfig::default().max_request_body_size(CAP);
    with_server(config, handler, |addr| {
        let mut stream = connect(addr);
        let body = "b".repeat(CAP);
        let request =
            format!("POST / HTTP/1.1\r\nHost: x\r\nContent-Length: {CAP}\r\n\r\n{body}");
        stream.write_all(request.as_bytes()).expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 200);
        assert_eq!(response.body_str(), "16");
        drop(stream);

        let mut stream = connect(addr);
        let request = format!(
            "POST / HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
            CAP + 1
        );
        stream.write_all(request.as_bytes()).expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 413);
    });
}

#[test]
fn oversized_chunked_body_is_413() {
    let handler = |fence: RequestFence| async move {
        let request = fence.into_request()?;
        let body = request.read_body().await?;
        let mut response = request.take_response();
        response.send_body(&body).await?;
        Ok(response)
    };
    let config = HttpServerConfig::default().max_request_body_size(16);
    with_server(config, handler, |addr| {
        let mut stream = connect(addr);
        let payload = "c".repeat(64);
        let request = format!(
            "POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
             40\r\n{payload}\r\n0\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 413);
    });
}

#[test]
fn multipart_post_decodes_each_part() {
    let handler = |fence: RequestFence| async move {
        let request = fence.into_request()?;
        let post = request.post().await?;
        let body = format!(
            "{}+{}",
            post.get("first").unwrap_or("?"),
            post.get("second").unwrap_or("?")
        );
        let mut response = request.take_response();
        response.set_header("content-type", "text/plain");
        response.send_body(body.as_bytes()).await?;
        Ok(response)
    };
    with_server(HttpServerConfig::default(), handler, |addr| {
        let body = "--BND\r\n\
            Content-Disposition: form-data; name=\"first\"\r\n\r\n\
            one\r\n\
            --BND\r\n\
            Content-Disposition: form-data; name=\"second\"\r\n\r\n\
            two\r\n\
            --BND--\r\n";
        let request = format!(
            "POST / HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\
             Content-Type: multipart/form-data; boundary=BND\r\n\r\n{body}",
            body.len()
        );
        let mut stream = connect(addr);
        stream.write_all(request.as_bytes()).expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 200);
        assert_eq!(response.body_str(), "one+two");
    });
}

#[test]
fn http10_without_keep_alive_closes() {
    with_server(HttpServerConfig::default(), ok_handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(b"GET / HTTP/1.0\r\nHost: x\r\n\r\n")
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 200);
        assert!(response.head.starts_with("HTTP/1.0 200 OK\r\n"));
        assert_eq!(response.header("connection"), Some("close"));
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).expect("eof");
        assert!(rest.is_empty());
    });
}

#[test]
fn request_metadata_is_exposed_to_the_handler() {
    let handler = |fence: RequestFence| async move {
        let request = fence.into_request()?;
        assert_eq!(request.method(), sprocket::http::Method::Get);
        assert_eq!(request.uri().path, "/items");
        assert_eq!(request.query().get("id"), Some("7"));
        assert_eq!(request.headers().get("x-token"), Some("t"));
        let _ = request.absolute_uri();
        let mut response = request.take_response();
        response.send_body(b"ok").await?;
        Ok(response)
    };
    with_server(HttpServerConfig::default(), handler, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(b"GET /items?id=7 HTTP/1.1\r\nHost: x\r\nX-Token: t\r\n\r\n")
            .expect("request");
        let response = read_response(&mut stream);
        assert_eq!(response.status, 200);
    });
}
