//! Socket helpers shared by unit tests.

use std::net::Ipv4Addr;

use tokio::net::{TcpListener, TcpStream};

/// Connect a loopback pair and return `(accepted, client)`.
pub async fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener addr");
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let client = client.expect("connect loopback");
    let (server, _) = accepted.expect("accept loopback");
    (server, client)
}
