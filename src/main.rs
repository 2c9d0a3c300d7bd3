//! remoting demo - TCP server and one-shot client.
//!
//! `serve` exposes:
//! - `ping()`       returns `"pong"`
//! - `echo(...)`    returns its arguments as an array
//! - `chat(text)`   event relayed to every other connected client
//!
//! `call` connects, invokes one function and prints the JSON result.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use remoting::guard;
use remoting::observability::{init_tracing_with, LogFormat};
use remoting::transport::tcp::{TcpClient, TcpServer};
use remoting::{
    Args, ChannelDecl, Declaration, GlobalEvent, GlobalFunction, NetworkConfig, PeerId, Reply, Side,
    TcpConfig, Target, Transport,
};

#[derive(Debug, Parser)]
#[command(name = "remoting-demo", version, about = "Typed remote channels over TCP")]
struct Cli {
    /// Fallback log filter when RUST_LOG is unset.
    #[arg(long, env = "REMOTING_LOG", default_value = "info", global = true)]
    log: String,

    /// Emit JSON logs.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the demo server.
    Serve {
        #[arg(long, default_value = "127.0.0.1:7878")]
        addr: String,

        /// JSON file with handler settings (partial files are fine).
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 1000)]
        max_connections: usize,
    },
    /// Invoke one function on a running server.
    Call {
        #[arg(long, default_value = "127.0.0.1:7878")]
        addr: String,

        /// Peer identity; a random one when omitted.
        #[arg(long)]
        peer: Option<String>,

        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,

        function: String,

        /// Arguments, parsed as JSON when possible and as strings otherwise.
        args: Vec<String>,
    },
}

fn functions() -> remoting::Result<GlobalFunction> {
    GlobalFunction::new(
        "demo",
        Declaration::new()
            .server_bound("ping", ChannelDecl::new().returns(guard::string()))
            .server_bound("echo", ChannelDecl::new().rest(guard::any()).returns(guard::array())),
    )
}

fn events() -> remoting::Result<GlobalEvent> {
    GlobalEvent::new(
        "demo",
        Declaration::new().bidirectional("chat", ChannelDecl::new().arg(guard::string())),
    )
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn serve(addr: String, config: Option<PathBuf>, max_connections: usize) -> Result<(), Box<dyn std::error::Error>> {
    let network_config = match config {
        Some(path) => NetworkConfig::from_json_file(path)?,
        None => NetworkConfig::for_side(Side::Server),
    };
    let tcp_config = TcpConfig {
        max_connections,
        ..TcpConfig::default()
    };

    let server = Arc::new(TcpServer::bind(addr.as_str(), tcp_config).await?);
    let transport: Arc<dyn Transport> = server.clone();

    let function_scope = functions()?;
    let _bad_requests = function_scope.on_bad_request(|bad| {
        tracing::warn!(
            "Rejected {} from {:?}: argument {} = {}",
            bad.network_info,
            bad.peer,
            bad.arg_index,
            bad.arg_value
        );
    });
    let handler = function_scope
        .builder(transport.clone())
        .with_config(network_config.clone())
        .build()?;
    handler
        .get("ping")?
        .set_callback(|_sender: Option<PeerId>, _args: Args| async {
            Ok::<_, remoting::Error>(Reply::from(json!("pong")))
        })?;
    handler
        .get("echo")?
        .set_callback(|_sender: Option<PeerId>, args: Args| async move {
            Ok::<_, remoting::Error>(Reply::Value(Value::Array(args)))
        })?;

    let event_handler = events()?.builder(transport).with_config(network_config).build()?;
    let chat = event_handler.get("chat")?.clone();
    let relay = chat.clone();
    let _chat = chat.subscribe(move |sender, args| {
        let Some(sender) = sender else { return };
        tracing::info!("chat from {}: {:?}", sender, args);
        if let Err(e) = relay.except(std::slice::from_ref(sender), args.to_vec()) {
            tracing::warn!("chat relay failed: {}", e);
        }
    })?;

    tracing::info!("remoting demo server on {}", server.local_addr());
    tracing::info!("  functions: ping, echo");
    tracing::info!("  events:    chat");

    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            server.shutdown();
        }
    }
    Ok(())
}

async fn call(
    addr: String,
    peer: Option<String>,
    timeout: Duration,
    function: String,
    args: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let peer = match peer {
        Some(name) => PeerId::from_string(name)?,
        None => PeerId::new(),
    };
    let client = Arc::new(TcpClient::connect(addr.as_str(), peer, TcpConfig::default()).await?);
    let transport: Arc<dyn Transport> = client.clone();

    let handler = functions()?.create_client(transport)?;
    let args: Args = args.iter().map(String::as_str).map(parse_arg).collect();
    let value = handler
        .lookup(&function)?
        .invoke_with_timeout(Target::Server, timeout, args)
        .await?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    client.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let format = if cli.json { LogFormat::Json } else { LogFormat::from_env() };
    init_tracing_with(&cli.log, format);

    match cli.command {
        Command::Serve {
            addr,
            config,
            max_connections,
        } => serve(addr, config, max_connections).await,
        Command::Call {
            addr,
            peer,
            timeout_ms,
            function,
            args,
        } => call(addr, peer, Duration::from_millis(timeout_ms), function, args).await,
    }
}
