//! TCP transport integration tests: handshake, request/response and events
//! over real sockets on a loopback port.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use remoting::guard;
use remoting::transport::tcp::codec::{self, write_frame, Hello, MSG_HELLO, MSG_REJECT, MSG_WELCOME};
use remoting::transport::tcp::{TcpClient, TcpServer};
use remoting::{
    Args, ChannelDecl, Declaration, Error, GlobalEvent, GlobalFunction, PeerId, Reply, TcpConfig, Target,
    Transport,
};

const WAIT: Duration = Duration::from_secs(5);

/// Bind on a random port and run the accept loop in the background.
async fn start_server() -> Arc<TcpServer> {
    let server = Arc::new(TcpServer::bind("127.0.0.1:0", TcpConfig::default()).await.unwrap());
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve().await;
    });
    server
}

async fn connect(server: &TcpServer, name: &str) -> Arc<TcpClient> {
    Arc::new(
        TcpClient::connect(server.local_addr(), PeerId::named(name), TcpConfig::default())
            .await
            .unwrap(),
    )
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn functions() -> GlobalFunction {
    GlobalFunction::new(
        "rpc",
        Declaration::new()
            .server_bound("concat", ChannelDecl::new().rest(guard::string()).returns(guard::string()))
            .bidirectional("sync", ChannelDecl::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_function_round_trip() {
    let server = start_server().await;
    let client = connect(&server, "alice").await;

    let scope = functions();
    let server_handler = scope.create_server(server.clone()).unwrap();
    let client_handler = scope.create_client(client.clone()).unwrap();

    server_handler
        .get("concat")
        .unwrap()
        .set_callback(|sender: Option<PeerId>, args: Args| async move {
            let joined: String = args.iter().filter_map(Value::as_str).collect();
            let from = sender.map(|peer| peer.to_string()).unwrap_or_default();
            Ok::<_, Error>(Reply::from(json!(format!("{}:{}", from, joined))))
        })
        .unwrap();

    let value = client_handler
        .get("concat")
        .unwrap()
        .invoke_with_timeout(Target::Server, WAIT, vec![json!("a"), json!("b")])
        .await
        .unwrap();
    assert_eq!(value, json!("alice:ab"));

    let rejected = client_handler
        .get("concat")
        .unwrap()
        .invoke_with_timeout(Target::Server, WAIT, vec![json!(1)])
        .await;
    assert!(matches!(rejected, Err(Error::BadRequest(_))));
}

#[tokio::test]
async fn test_bidirectional_function_both_ways() {
    let server = start_server().await;
    let client = connect(&server, "alice").await;

    let scope = functions();
    let server_handler = scope.create_server(server.clone()).unwrap();
    let client_handler = scope.create_client(client.clone()).unwrap();

    let server_sync = server_handler.get("sync").unwrap();
    let client_sync = client_handler.get("sync").unwrap();
    assert_eq!(server_sync.endpoint_ids(), (Some("s:sync"), Some("c:sync")));
    assert_eq!(client_sync.endpoint_ids(), (Some("c:sync"), Some("s:sync")));

    server_sync
        .set_callback(|_: Option<PeerId>, _: Args| async { Ok::<_, Error>(Reply::from(json!("from server"))) })
        .unwrap();
    client_sync
        .set_callback(|_: Option<PeerId>, _: Args| async { Ok::<_, Error>(Reply::from(json!("from client"))) })
        .unwrap();

    let to_server = client_sync.invoke_with_timeout(Target::Server, WAIT, vec![]).await.unwrap();
    let to_client = server_sync
        .invoke_with_timeout(PeerId::named("alice"), WAIT, vec![])
        .await
        .unwrap();
    assert_eq!(to_server, json!("from server"));
    assert_eq!(to_client, json!("from client"));
}

#[tokio::test]
async fn test_events_cross_the_wire() {
    let server = start_server().await;
    let alice = connect(&server, "alice").await;
    let bob = connect(&server, "bob").await;

    let scope = GlobalEvent::new(
        "game",
        Declaration::new()
            .server_bound("chat", ChannelDecl::new().arg(guard::string()))
            .client_bound("notice", ChannelDecl::new()),
    )
    .unwrap();
    let server_events = scope.create_server(server.clone()).unwrap();
    let alice_events = scope.create_client(alice.clone()).unwrap();
    let bob_events = scope.create_client(bob.clone()).unwrap();

    let (_chat, mut chat_rx) = server_events.get("chat").unwrap().subscribe_stream().unwrap();
    let (_alice, mut alice_rx) = alice_events.get("notice").unwrap().subscribe_stream().unwrap();
    let (_bob, mut bob_rx) = bob_events.get("notice").unwrap().subscribe_stream().unwrap();

    bob_events.get("chat").unwrap().fire(vec![json!("hi")]).unwrap();
    let chat = tokio::time::timeout(WAIT, chat_rx.recv()).await.unwrap().unwrap();
    assert_eq!(chat.sender, Some(PeerId::named("bob")));
    assert_eq!(chat.args, vec![json!("hi")]);

    let sent = server_events
        .get("notice")
        .unwrap()
        .except(&[PeerId::named("bob")], vec![json!("bob said hi")])
        .unwrap();
    assert_eq!(sent, 1);
    let notice = tokio::time::timeout(WAIT, alice_rx.recv()).await.unwrap().unwrap();
    assert_eq!(notice.sender, None);
    assert_eq!(notice.args, vec![json!("bob said hi")]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_duplicate_peer_is_refused() {
    let server = start_server().await;
    let _first = connect(&server, "alice").await;

    let second = TcpClient::connect(server.local_addr(), PeerId::named("alice"), TcpConfig::default()).await;
    assert!(matches!(second, Err(Error::Transport(_))));
}

#[tokio::test]
async fn test_close_disconnects_and_rejects_pending() {
    let server = start_server().await;
    let client = connect(&server, "alice").await;

    // No handler tree on the client: the request is held unanswered.
    let server_handler = functions().create_server(server.clone()).unwrap();
    let sync = server_handler.get("sync").unwrap().clone();
    let call = tokio::spawn(async move { sync.invoke_with_timeout(PeerId::named("alice"), WAIT, vec![]).await });

    let peers = server.peers();
    eventually("alice to connect", || peers.connected() == vec![PeerId::named("alice")]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close();

    let result = call.await.unwrap();
    assert!(matches!(result, Err(Error::Disconnected(_))));
    eventually("alice to disconnect", || peers.connected().is_empty()).await;
    eventually("client link to close", || !client.is_connected()).await;
}

#[tokio::test]
async fn test_raw_handshake_frames() {
    let server = start_server().await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    let hello = codec::encode(&Hello { peer: PeerId::named("raw") }).unwrap();
    write_frame(&mut stream, MSG_HELLO, &hello).await.unwrap();

    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let mut frame = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut frame).await.unwrap();
    assert_eq!(frame[0], MSG_WELCOME);

    // Same identity again from a second socket.
    let mut dup = TcpStream::connect(server.local_addr()).await.unwrap();
    write_frame(&mut dup, MSG_HELLO, &hello).await.unwrap();
    dup.read_exact(&mut len).await.unwrap();
    let mut frame = vec![0u8; u32::from_be_bytes(len) as usize];
    dup.read_exact(&mut frame).await.unwrap();
    assert_eq!(frame[0], MSG_REJECT);
}
