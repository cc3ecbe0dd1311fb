//! Minimal demo server: answers every request with a fixed body.
//!
//! ```text
//! serve --listen 127.0.0.1:8080 --body "hello"
//! RUST_LOG=sprocket=debug serve
//! ```

use clap::Parser;
use sprocket::http::{HttpServer, HttpServerConfig, RequestFence};
use sprocket::runtime::Dispatcher;
use std::net::SocketAddr;
use std::rc::Rc;

#[derive(Parser)]
#[command(about = "Single-threaded HTTP/1.1 demo server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Body returned for every request.
    #[arg(long, default_value = "hello from sprocket\n")]
    body: String,
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dispatcher = Dispatcher::new()?;
    let body = Rc::new(args.body);
    let server = HttpServer::bind(
        args.listen,
        HttpServerConfig::default(),
        move |fence: RequestFence| {
            let body = Rc::clone(&body);
            async move {
                let request = fence.into_request()?;
                let mut response = request.take_response();
                response.set_header("content-type", "text/plain; charset=utf-8");
                response.send_body(body.as_bytes()).await?;
                Ok(response)
            }
        },
    )?;
    server.start();
    println!("listening on http://{}", server.local_addr()?);
    dispatcher.block_on(server.join());
    Ok(())
}
