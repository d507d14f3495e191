//! Tests for the relay engine over loopback sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socksrelay::config::Config;
use socksrelay::filter::{Identity, PronounSwap};
use socksrelay::protocol::Endpoint;
use socksrelay::relay::{RelayEngine, RelaySession};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Connected pair of loopback sockets
async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (connected.unwrap(), accepted.unwrap().0)
}

fn endpoint(addr: SocketAddr) -> Endpoint {
    Endpoint::from_socket_addr(&addr)
}

#[tokio::test]
async fn test_target_connection_establishment() {
    let relay_engine = RelayEngine::from_config(&Config::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = listener.local_addr().unwrap();
    let accepted = tokio::spawn(async move { listener.accept().await.unwrap().1 });

    let (stream, local) = relay_engine
        .connect_to_target(endpoint(server_addr))
        .await
        .unwrap();
    assert_eq!(stream.peer_addr().unwrap(), server_addr);
    // the target sees the same address the proxy reports as bound
    assert_eq!(accepted.await.unwrap(), local);
}

#[tokio::test]
async fn test_relay_between_sockets() {
    let engine = RelayEngine::new(
        1024,
        Duration::from_secs(1),
        Duration::from_secs(5),
        Arc::new(PronounSwap),
    );

    let (mut client, proxy_client_side) = socket_pair().await;
    let (proxy_target_side, mut target) = socket_pair().await;
    let session = RelaySession::new(
        proxy_client_side.peer_addr().unwrap(),
        proxy_target_side.peer_addr().unwrap(),
    );

    let relay = engine.relay(&session, proxy_client_side, proxy_target_side);
    let peers = async {
        client.write_all(b"Hallo").await.unwrap();
        let mut request = [0u8; 5];
        target.read_exact(&mut request).await.unwrap();
        assert_eq!(&request, b"Hallo");

        target.write_all(b"She is a nice girl.").await.unwrap();
        target.shutdown().await.unwrap();

        let mut answer = Vec::new();
        client.read_to_end(&mut answer).await.unwrap();
        assert_eq!(answer, b"He is a nice girl.");
        drop(client);
        drop(target);
    };

    let (stats, ()) = tokio::join!(relay, peers);
    let stats = stats.unwrap();
    assert_eq!(stats.session_id, session.session_id);
    assert_eq!(stats.bytes_up, 5);
    assert_eq!(stats.bytes_down, 18);
    assert_eq!(stats.total_bytes, 23);
}

#[tokio::test]
async fn test_client_half_close_still_delivers_answer() {
    let engine = RelayEngine::new(
        1024,
        Duration::from_secs(1),
        Duration::from_secs(5),
        Arc::new(Identity),
    );

    let (mut client, proxy_client_side) = socket_pair().await;
    let (proxy_target_side, mut target) = socket_pair().await;
    let session = RelaySession::new(
        proxy_client_side.peer_addr().unwrap(),
        proxy_target_side.peer_addr().unwrap(),
    );

    let relay = engine.relay(&session, proxy_client_side, proxy_target_side);
    let peers = async {
        client.write_all(b"question").await.unwrap();
        client.shutdown().await.unwrap();

        // the target sees the request followed by end of stream
        let mut request = Vec::new();
        target.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"question");

        target.write_all(b"answer").await.unwrap();
        drop(target);

        let mut answer = Vec::new();
        client.read_to_end(&mut answer).await.unwrap();
        assert_eq!(answer, b"answer");
    };

    let (stats, ()) = tokio::join!(relay, peers);
    assert!(stats.is_ok());
}
