//! Standalone echo server for poking at the HTTP actions by hand.
//!
//! `MOCK_SERVER_ADDR` overrides the bind address (default `127.0.0.1:3000`).

use tokio::net::TcpListener;

const DEFAULT_ADDR: &str = "127.0.0.1:3000";

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let addr = std::env::var("MOCK_SERVER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr).await?;
    println!("echo server on http://{}", listener.local_addr()?);
    println!("routes: /json /json/500 /form/urlencoded /form/multipart /static/file.txt /status/:code /slow");
    mock_server::run(listener).await
}
