//! TLS handshake and data flow over an in-memory duplex.

use sprocket::io::{duplex, AsyncReadExt, AsyncWriteExt};
use sprocket::promise::Promise;
use sprocket::runtime::Dispatcher;
use sprocket::tls::{
    CertificateChain, PrivateKey, TlsAcceptor, TlsConnector, TlsError, TlsFlags, TlsVersion,
};
use std::time::Duration;

fn test_acceptor() -> TlsAcceptor {
    let chain =
        CertificateChain::from_pem_file("tests/certs/cert.pem").expect("certificate chain");
    let key = PrivateKey::from_pem_file("tests/certs/key.pem").expect("private key");
    TlsAcceptor::builder(chain, key).build().expect("acceptor")
}

#[test]
fn handshake_and_echo_round_trip() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    dispatcher.block_on(async {
        let acceptor = test_acceptor();
        let connector = TlsConnector::builder()
            .flags(TlsFlags::NO_VERIFY_HOST)
            .build()
            .expect("connector");

        let (client_io, server_io) = duplex(64 * 1024);

        let server_done: Promise<Vec<u8>> = Promise::new();
        {
            let server_done = server_done.clone();
            sprocket::runtime::spawn(async move {
                let mut tls = acceptor.accept(server_io).await.expect("accept");
                assert!(tls.is_ready());
                assert!(tls.handshake_promise().is_terminal());
                let mut buf = [0u8; 4];
                tls.read_exact(&mut buf).await.expect("server read");
                tls.write_all(b"pong").await.expect("server write");
                server_done.complete(buf.to_vec());
            });
        }

        let mut tls = connector
            .connect("localhost", client_io)
            .await
            .expect("connect");
        assert!(tls.is_ready());
        tls.write_all(b"ping").await.expect("client write");
        let mut buf = [0u8; 4];
        tls.read_exact(&mut buf).await.expect("client read");
        assert_eq!(&buf, b"pong");

        let got = server_done
            .wait_with_timeout(Duration::from_secs(5))
            .await
            .expect("server side");
        assert_eq!(got, b"ping");
    });
}

#[test]
fn version_pair_restricts_the_handshake() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    dispatcher.block_on(async {
        let chain =
            CertificateChain::from_pem_file("tests/certs/cert.pem").expect("chain");
        let key = PrivateKey::from_pem_file("tests/certs/key.pem").expect("key");
        let acceptor = TlsAcceptor::builder(chain, key)
            .versions(TlsVersion::Tls13, TlsVersion::Tls13)
            .build()
            .expect("acceptor");
        let connector = TlsConnector::builder()
            .versions(TlsVersion::Tls13, TlsVersion::Tls13)
            .flags(TlsFlags::NO_VERIFY_HOST)
            .build()
            .expect("connector");

        let (client_io, server_io) = duplex(64 * 1024);
        sprocket::runtime::spawn(async move {
            let _ = acceptor.accept(server_io).await;
        });
        let tls = connector
            .connect("localhost", client_io)
            .await
            .expect("tls 1.3 handshake");
        assert!(tls.is_ready());
    });
}

#[test]
fn garbage_from_the_peer_fails_the_handshake() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    dispatcher.block_on(async {
        let acceptor = test_acceptor();
        let (mut client_io, server_io) = duplex(64 * 1024);
        sprocket::runtime::spawn(async move {
            let _ = client_io.write_all(b"GET / HTTP/1.1\r\n\r\n").await;
            let _ = client_io.shutdown().await;
        });
        let err = acceptor.accept(server_io).await.expect_err("not tls");
        assert!(matches!(err, TlsError::Handshake(_) | TlsError::Io(_)));
    });
}

#[test]
fn alpn_mismatch_fails_when_required() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    dispatcher.block_on(async {
        // Server advertises no protocols; client requires h2.
        let acceptor = test_acceptor();
        let connector = TlsConnector::builder()
            .alpn_protocol(&b"h2"[..])
            .flags(TlsFlags::NO_VERIFY_HOST.with(TlsFlags::FAIL_ON_ALPN_MISMATCH))
            .build()
            .expect("connector");

        let (client_io, server_io) = duplex(64 * 1024);
        sprocket::runtime::spawn(async move {
            let _ = acceptor.accept(server_io).await;
        });
        let err = connector
            .connect("localhost", client_io)
            .await
            .expect_err("alpn mismatch");
        assert!(matches!(err, TlsError::AlpnMismatch { .. }));
    });
}

#[test]
fn https_server_serves_a_request_end_to_end() {
    use sprocket::http::{HttpServer, HttpServerConfig, RequestFence};

    let dispatcher = Dispatcher::new().expect("dispatcher");
    dispatcher.block_on(async {
        let config = HttpServerConfig::default().secure(test_acceptor());
        let server = HttpServer::bind(
            "127.0.0.1:0".parse().expect("addr"),
            config,
            |fence: RequestFence| async move {
                let request = fence.into_request()?;
                let mut response = request.take_response();
                response.send_body(b"ok").await?;
                Ok(response)
            },
        )
        .expect("bind");
        server.start();
        let addr = server.local_addr().expect("addr");

        let tcp = sprocket::net::TcpStream::connect(addr)
            .await
            .expect("tcp connect");
        let connector = TlsConnector::builder()
            .flags(TlsFlags::NO_VERIFY_HOST)
            .build()
            .expect("connector");
        let mut tls = connector.connect("localhost", tcp).await.expect("tls");

        tls.write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .expect("request");
        let mut out = Vec::new();
        tls.read_to_end(&mut out).await.expect("response");
        let text = String::from_utf8(out).expect("ascii response");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
        assert!(text.ends_with("\r\n\r\nok"), "{text}");

        server.close_wait().await;
    });
}

#[test]
fn mismatched_version_ranges_cannot_handshake() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    dispatcher.block_on(async {
        let chain =
            CertificateChain::from_pem_file("tests/certs/cert.pem").expect("chain");
        let key = PrivateKey::from_pem_file("tests/certs/key.pem").expect("key");
        let acceptor = TlsAcceptor::builder(chain, key)
            .versions(TlsVersion::Tls13, TlsVersion::Tls13)
            .build()
            .expect("acceptor");
        let connector = TlsConnector::builder()
            .versions(TlsVersion::Tls12, TlsVersion::Tls12)
            .flags(TlsFlags::NO_VERIFY_HOST)
            .build()
            .expect("connector");

        let (client_io, server_io) = duplex(64 * 1024);
        let server_result: Promise<bool> = Promise::new();
        {
            let server_result = server_result.clone();
            sprocket::runtime::spawn(async move {
                server_result.complete(acceptor.accept(server_io).await.is_err());
            });
        }
        let client_err = connector.connect("localhost", client_io).await.is_err();
        let server_err = server_result
            .wait_with_timeout(Duration::from_secs(5))
            .await
            .expect("server side");
        assert!(client_err && server_err);
    });
}
