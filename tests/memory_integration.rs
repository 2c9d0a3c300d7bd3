//! End-to-end tests over the in-memory transport: handler trees built from one
//! declaration on both sides, requests and events crossing the hub.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use remoting::guard;
use remoting::middleware::{middleware, processor, FunctionMiddleware, FunctionProcessor};
use remoting::transport::{MemoryNetwork, MemoryTransport};
use remoting::{
    Args, BadRequest, BadResponse, ChannelDecl, Declaration, Error, EventHandler, FunctionHandler,
    FunctionMiddlewareTree, GlobalEvent, GlobalFunction, MiddlewareTree, NetworkConfig, NetworkInfo,
    PeerId, Reply, Side, Target, Transport,
};

const WAIT: Duration = Duration::from_secs(2);

fn transport(t: MemoryTransport) -> Arc<dyn Transport> {
    Arc::new(t)
}

fn function_declaration() -> Declaration {
    Declaration::new()
        .server_bound("ping", ChannelDecl::new())
        .server_bound("add", ChannelDecl::new().arg(guard::number()).arg(guard::number()))
        .server_bound("name", ChannelDecl::new().returns(guard::string()))
        .server_bound("slow", ChannelDecl::new())
        .client_bound("whoami", ChannelDecl::new())
        .namespace(
            "admin",
            Declaration::new().server_bound("kick", ChannelDecl::new().arg(guard::string())),
        )
}

struct FunctionPair {
    net: MemoryNetwork,
    scope: GlobalFunction,
    server: FunctionHandler,
    client: FunctionHandler,
}

fn function_pair() -> FunctionPair {
    let net = MemoryNetwork::new();
    let scope = GlobalFunction::new("rpc", function_declaration()).unwrap();
    let server = scope.create_server(transport(net.server().unwrap())).unwrap();
    let client = scope
        .create_client(transport(net.connect(PeerId::named("alice")).unwrap()))
        .unwrap();
    FunctionPair {
        net,
        scope,
        server,
        client,
    }
}

async fn never_reply(_sender: Option<PeerId>, _args: Args) -> remoting::Result<Reply> {
    futures::future::pending::<()>().await;
    Ok(Reply::Skip)
}

#[tokio::test]
async fn test_request_round_trip() {
    let pair = function_pair();
    pair.server
        .get("add")
        .unwrap()
        .set_callback(|_sender: Option<PeerId>, args: Args| async move {
            let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
            Ok::<_, Error>(Reply::from(json!(sum)))
        })
        .unwrap();

    let value = pair
        .client
        .get("add")
        .unwrap()
        .invoke(Target::Server, vec![json!(2), json!(3)])
        .await
        .unwrap();
    assert_eq!(value, json!(5.0));
}

#[tokio::test]
async fn test_callback_sees_sender() {
    let pair = function_pair();
    pair.server
        .get("ping")
        .unwrap()
        .set_callback(|sender: Option<PeerId>, _args: Args| async move {
            Ok::<_, Error>(Reply::from(json!(sender.map(|peer| peer.to_string()))))
        })
        .unwrap();

    let value = pair.client.get("ping").unwrap().invoke(Target::Server, vec![]).await.unwrap();
    assert_eq!(value, json!("alice"));
}

#[tokio::test]
async fn test_missing_callback_is_unprocessed() {
    let pair = function_pair();
    let result = pair
        .client
        .get("ping")
        .unwrap()
        .invoke_with_timeout(Target::Server, WAIT, vec![])
        .await;
    assert!(matches!(result, Err(Error::Unprocessed(_))));
}

#[tokio::test]
async fn test_skip_and_failures_map_to_errors() {
    let pair = function_pair();
    let ping = pair.server.get("ping").unwrap();
    ping.set_callback(|_sender: Option<PeerId>, args: Args| async move {
        match args.first().and_then(Value::as_str) {
            Some("skip") => Ok(Reply::Skip),
            Some("fail") => Err(Error::failure("boom")),
            Some("panic") => panic!("callback exploded"),
            _ => Ok(Reply::from(json!("pong"))),
        }
    })
    .unwrap();

    let caller = pair.client.get("ping").unwrap();
    assert!(matches!(
        caller.invoke(Target::Server, vec![json!("skip")]).await,
        Err(Error::Cancelled(_))
    ));
    match caller.invoke(Target::Server, vec![json!("fail")]).await {
        Err(Error::Failure(message)) => assert!(message.contains("boom")),
        other => panic!("expected failure, got {:?}", other),
    }
    match caller.invoke(Target::Server, vec![json!("panic")]).await {
        Err(Error::Failure(message)) => assert!(message.contains("panicked")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(caller.invoke(Target::Server, vec![]).await.unwrap(), json!("pong"));
}

#[tokio::test]
async fn test_argument_guard_rejects_and_reports() {
    let pair = function_pair();
    let (tx, mut rx) = mpsc::unbounded_channel::<BadRequest>();
    let _reports = pair.scope.on_bad_request(move |bad| {
        let _ = tx.send(bad.clone());
    });

    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    pair.server
        .get("add")
        .unwrap()
        .set_callback(move |_sender: Option<PeerId>, _args: Args| {
            *counter.lock() += 1;
            async { Ok::<_, Error>(Reply::from(json!(0))) }
        })
        .unwrap();

    let result = pair
        .client
        .get("add")
        .unwrap()
        .invoke(Target::Server, vec![json!(1), json!("two")])
        .await;
    assert!(matches!(result, Err(Error::BadRequest(_))));
    assert_eq!(*calls.lock(), 0);

    let report = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(report.arg_index, 1);
    assert_eq!(report.arg_value, json!("two"));
    assert_eq!(report.peer, Some(PeerId::named("alice")));
    assert_eq!(report.network_info.name, "add");
}

#[tokio::test]
async fn test_nested_namespace_function() {
    let pair = function_pair();
    pair.server
        .lookup("admin/kick")
        .unwrap()
        .set_callback(|_sender: Option<PeerId>, args: Args| async move {
            Ok::<_, Error>(Reply::from(json!(format!("kicked {}", args[0].as_str().unwrap_or("")))))
        })
        .unwrap();

    let kick = pair.client.namespace("admin").unwrap().get("kick").unwrap();
    assert_eq!(kick.info().name, "admin/kick");
    let value = kick.invoke(Target::Server, vec![json!("bob")]).await.unwrap();
    assert_eq!(value, json!("kicked bob"));
}

#[tokio::test]
async fn test_return_guard_rejects_response() {
    let pair = function_pair();
    let (tx, mut rx) = mpsc::unbounded_channel::<BadResponse>();
    let _reports = pair.scope.on_bad_response(move |bad| {
        let _ = tx.send(bad.clone());
    });
    pair.server
        .get("name")
        .unwrap()
        .set_callback(|_sender: Option<PeerId>, _args: Args| async { Ok::<_, Error>(Reply::from(json!(7))) })
        .unwrap();

    let result = pair.client.get("name").unwrap().invoke(Target::Server, vec![]).await;
    assert!(matches!(result, Err(Error::InvalidResult(_))));

    let report = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(report.value, json!(7));
    assert_eq!(report.peer, None);
}

#[tokio::test]
async fn test_disabled_guards_skip_return_checks() {
    let net = MemoryNetwork::new();
    let scope = GlobalFunction::new("rpc", function_declaration()).unwrap();
    let server = scope.create_server(transport(net.server().unwrap())).unwrap();
    let client = scope
        .builder(transport(net.connect(PeerId::named("alice")).unwrap()))
        .with_config(NetworkConfig::for_side(Side::Client).with_guards_disabled(true))
        .build()
        .unwrap();
    server
        .get("name")
        .unwrap()
        .set_callback(|_sender: Option<PeerId>, _args: Args| async { Ok::<_, Error>(Reply::from(json!(7))) })
        .unwrap();

    let value = client.get("name").unwrap().invoke(Target::Server, vec![]).await.unwrap();
    assert_eq!(value, json!(7));
}

#[tokio::test]
async fn test_ids_are_per_peer_and_monotonic() {
    let net = MemoryNetwork::new();
    let scope = GlobalFunction::new("rpc", function_declaration()).unwrap();
    let server = scope.create_server(transport(net.server().unwrap())).unwrap();

    let mut clients = Vec::new();
    for name in ["alice", "bob"] {
        let client = scope
            .create_client(transport(net.connect(PeerId::named(name)).unwrap()))
            .unwrap();
        let me = name.to_string();
        client
            .get("whoami")
            .unwrap()
            .set_callback(move |sender: Option<PeerId>, _args: Args| {
                let me = me.clone();
                async move {
                    assert!(sender.is_none());
                    Ok::<_, Error>(Reply::from(json!(me)))
                }
            })
            .unwrap();
        clients.push(client);
    }

    let whoami = server.get("whoami").unwrap();
    let alice = Target::Peer(PeerId::named("alice"));
    let bob = Target::Peer(PeerId::named("bob"));

    // Both tables start at id 0; replies must not cross.
    let (a, b) = tokio::join!(
        whoami.invoke(alice.clone(), vec![]),
        whoami.invoke(bob.clone(), vec![])
    );
    assert_eq!(a.unwrap(), json!("alice"));
    assert_eq!(b.unwrap(), json!("bob"));

    whoami.invoke(alice.clone(), vec![]).await.unwrap();
    whoami.invoke(alice.clone(), vec![]).await.unwrap();
    assert_eq!(whoami.pending().next_id(&alice), 3);
    assert_eq!(whoami.pending().next_id(&bob), 1);
    assert_eq!(whoami.pending().pending_count(&alice), 0);
}

#[tokio::test]
async fn test_zero_timeout_times_out_and_cleans_up() {
    let pair = function_pair();
    pair.server.get("slow").unwrap().set_callback(never_reply).unwrap();

    let slow = pair.client.get("slow").unwrap();
    let result = slow.invoke_with_timeout(Target::Server, Duration::ZERO, vec![]).await;
    assert!(matches!(result, Err(Error::Timeout(_))));
    assert_eq!(slow.pending().pending_count(&Target::Server), 0);
}

#[tokio::test]
async fn test_late_response_after_timeout_is_ignored() {
    let pair = function_pair();
    pair.server
        .get("slow")
        .unwrap()
        .set_callback(|_sender: Option<PeerId>, args: Args| async move {
            if args.first() == Some(&json!("late")) {
                tokio::time::sleep(Duration::from_millis(30)).await;
                return Ok::<_, Error>(Reply::from(json!("stale")));
            }
            Ok(Reply::from(json!("fresh")))
        })
        .unwrap();

    let slow = pair.client.get("slow").unwrap();
    let result = slow
        .invoke_with_timeout(Target::Server, Duration::from_millis(5), vec![json!("late")])
        .await;
    assert!(matches!(result, Err(Error::Timeout(_))));

    // The reply to id 0 lands after its caller gave up.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(slow.pending().pending_count(&Target::Server), 0);
    assert_eq!(slow.pending().next_id(&Target::Server), 1);

    let value = slow
        .invoke_with_timeout(Target::Server, WAIT, vec![json!("now")])
        .await
        .unwrap();
    assert_eq!(value, json!("fresh"));
    assert_eq!(slow.pending().next_id(&Target::Server), 2);
    assert_eq!(slow.pending().pending_count(&Target::Server), 0);
}

#[tokio::test]
async fn test_cancellation_rejects_call() {
    let pair = function_pair();
    pair.server.get("slow").unwrap().set_callback(never_reply).unwrap();

    let slow = pair.client.get("slow").unwrap();
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = slow.invoke_cancellable(Target::Server, vec![], &token).await;
    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert_eq!(slow.pending().pending_count(&Target::Server), 0);
}

#[tokio::test]
async fn test_disconnect_rejects_pending_calls() {
    let pair = function_pair();
    pair.server.get("slow").unwrap().set_callback(never_reply).unwrap();

    let slow = pair.client.get("slow").unwrap().clone();
    let call = tokio::spawn(async move { slow.invoke_with_timeout(Target::Server, WAIT, vec![]).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(pair.net.disconnect(&PeerId::named("alice")));
    let result = call.await.unwrap();
    assert!(matches!(result, Err(Error::Disconnected(_))));
}

#[tokio::test]
async fn test_middleware_wraps_callback_in_order() {
    fn tagging(tag: &'static str, log: Arc<Mutex<Vec<String>>>) -> FunctionMiddleware {
        middleware(move |next: FunctionProcessor, _info: &NetworkInfo| {
            let log = log.clone();
            processor(move |peer, args| {
                let next = next.clone();
                let log = log.clone();
                async move {
                    log.lock().push(format!("{}:in", tag));
                    let reply = next(peer, args).await;
                    log.lock().push(format!("{}:out", tag));
                    reply
                }
                .boxed()
            })
        })
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let tree: FunctionMiddlewareTree = MiddlewareTree::new()
        .with("ping", tagging("A", log.clone()))
        .with("ping", tagging("B", log.clone()));

    let net = MemoryNetwork::new();
    let scope = GlobalFunction::new("rpc", function_declaration()).unwrap();
    let server = scope
        .builder(transport(net.server().unwrap()))
        .with_middleware(tree)
        .build()
        .unwrap();
    let client = scope
        .create_client(transport(net.connect(PeerId::named("alice")).unwrap()))
        .unwrap();

    let sink = log.clone();
    server
        .get("ping")
        .unwrap()
        .set_callback(move |_sender: Option<PeerId>, _args: Args| {
            sink.lock().push("T".to_string());
            async { Ok::<_, Error>(Reply::from(json!("pong"))) }
        })
        .unwrap();

    client.get("ping").unwrap().invoke(Target::Server, vec![]).await.unwrap();
    assert_eq!(*log.lock(), vec!["A:in", "B:in", "T", "B:out", "A:out"]);
}

#[tokio::test]
async fn test_predict_runs_local_pipeline() {
    let pair = function_pair();
    let add = pair.server.get("add").unwrap();

    assert!(matches!(
        add.predict(None, vec![json!(1), json!(2)]).await,
        Err(Error::Unprocessed(_))
    ));
    add.set_callback(|_sender: Option<PeerId>, args: Args| async move {
        Ok::<_, Error>(Reply::from(json!(args.len())))
    })
    .unwrap();
    assert_eq!(add.predict(None, vec![json!(1), json!(2)]).await.unwrap(), json!(2));
    assert!(matches!(
        add.predict(None, vec![json!("x")]).await,
        Err(Error::BadRequest(_))
    ));
}

#[tokio::test]
async fn test_wrong_direction_is_rejected() {
    let pair = function_pair();
    let ping = pair.client.get("ping").unwrap();

    assert!(matches!(
        ping.set_callback(never_reply),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        ping.invoke(PeerId::named("bob"), vec![]).await,
        Err(Error::Validation(_))
    ));
}

fn event_declaration() -> Declaration {
    Declaration::new()
        .server_bound("chat", ChannelDecl::new().arg(guard::string()))
        .client_bound("notice", ChannelDecl::new().rest(guard::any()))
        .bidirectional("presence", ChannelDecl::new().unreliable())
}

fn event_pair(net: &MemoryNetwork, scope: &GlobalEvent) -> (EventHandler, EventHandler) {
    let server = scope.create_server(transport(net.server().unwrap())).unwrap();
    let client = scope
        .create_client(transport(net.connect(PeerId::named("alice")).unwrap()))
        .unwrap();
    (server, client)
}

#[tokio::test]
async fn test_event_reaches_server_subscribers() {
    let net = MemoryNetwork::new();
    let scope = GlobalEvent::new("game", event_declaration()).unwrap();
    let (server, client) = event_pair(&net, &scope);

    // Sent before anyone subscribes: held by the transport until armed.
    client.get("chat").unwrap().fire(vec![json!("early")]).unwrap();

    let (_conn, mut rx) = server.get("chat").unwrap().subscribe_stream().unwrap();
    client.get("chat").unwrap().fire(vec![json!("hello")]).unwrap();

    let first = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    let second = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.args, vec![json!("early")]);
    assert_eq!(second.args, vec![json!("hello")]);
    assert_eq!(second.sender, Some(PeerId::named("alice")));
}

#[tokio::test]
async fn test_event_guard_failure_is_reported_once() {
    let net = MemoryNetwork::new();
    let scope = GlobalEvent::new("game", event_declaration()).unwrap();
    let (server, client) = event_pair(&net, &scope);

    let reports = Arc::new(Mutex::new(Vec::<BadRequest>::new()));
    let sink = reports.clone();
    let _diagnostics = scope.on_bad_request(move |bad| sink.lock().push(bad.clone()));

    let (_conn, mut rx) = server.get("chat").unwrap().subscribe_stream().unwrap();
    client.get("chat").unwrap().fire(vec![json!(42)]).unwrap();
    client.get("chat").unwrap().fire(vec![json!("ok")]).unwrap();

    // Only the valid message gets through; delivery is in order.
    let delivered = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(delivered.args, vec![json!("ok")]);

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].arg_index, 0);
    assert_eq!(reports[0].arg_value, json!(42));
    assert_eq!(reports[0].network_info.name, "chat");
}

#[tokio::test]
async fn test_broadcast_and_except() {
    let net = MemoryNetwork::new();
    let scope = GlobalEvent::new("game", event_declaration()).unwrap();
    let server = scope.create_server(transport(net.server().unwrap())).unwrap();

    let mut streams = Vec::new();
    let mut handlers = Vec::new();
    for name in ["alice", "bob"] {
        let client = scope
            .create_client(transport(net.connect(PeerId::named(name)).unwrap()))
            .unwrap();
        let (conn, rx) = client.get("notice").unwrap().subscribe_stream().unwrap();
        streams.push((conn, rx));
        handlers.push(client);
    }

    let notice = server.get("notice").unwrap();
    assert_eq!(notice.broadcast(vec![json!("all")]).unwrap(), 2);
    assert_eq!(
        notice
            .except(&[PeerId::named("alice")], vec![json!("not alice")])
            .unwrap(),
        1
    );

    let (_, alice_rx) = &mut streams[0];
    let got = tokio::time::timeout(WAIT, alice_rx.recv()).await.unwrap().unwrap();
    assert_eq!(got.args, vec![json!("all")]);
    assert_eq!(got.sender, None);

    let (_, bob_rx) = &mut streams[1];
    let first = tokio::time::timeout(WAIT, bob_rx.recv()).await.unwrap().unwrap();
    let second = tokio::time::timeout(WAIT, bob_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.args, vec![json!("all")]);
    assert_eq!(second.args, vec![json!("not alice")]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(streams[0].1.try_recv().is_err());
}

#[tokio::test]
async fn test_bidirectional_event_shares_endpoint() {
    let net = MemoryNetwork::new();
    let scope = GlobalEvent::new("game", event_declaration()).unwrap();
    let (server, client) = event_pair(&net, &scope);

    let presence = server.get("presence").unwrap();
    assert_eq!(
        presence.endpoint_ids(),
        (Some("unreliable:presence"), Some("unreliable:presence"))
    );

    let (_conn, mut rx) = client.get("presence").unwrap().subscribe_stream().unwrap();
    presence.send(PeerId::named("alice"), vec![json!({"online": true})]).unwrap();
    let got = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(got.args, vec![json!({"online": true})]);
}
