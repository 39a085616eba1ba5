/// Interpreter server setup and initialization
///
/// Wires together the node registry, the interpreter and the TCP listener.
/// Each connection is a stream of framed commands answered in order; KILL
/// acknowledges and then stops the whole server.

use crate::{
    config::Config,
    graph::registry::NodeRegistry,
    protocol::command::{read_frame, write_frame, Command, Response},
    runtime::scheduler::Interpreter,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// Install the fmt subscriber; a second call is a no-op
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .try_init();
}

/// Builtin classes plus the managed node library, if one is configured
pub fn build_registry(config: &Config) -> Result<Arc<NodeRegistry>> {
    tracing::info!("📚 Registering builtin node classes");
    let registry = NodeRegistry::with_builtins()
        .map_err(|e| anyhow::anyhow!("Failed to register builtin nodes: {}", e))?;

    if let Some(path) = &config.library.managed_nodes_path {
        if std::path::Path::new(path).exists() {
            let count = registry
                .load_managed_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to load managed nodes from {}: {}", path, e))?;
            tracing::info!("🧩 Loaded {} managed node classes from {}", count, path);
        } else {
            tracing::warn!("⚠️ Managed node file {} does not exist yet", path);
        }
    }

    Ok(Arc::new(registry))
}

/// Start the interpreter server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    init_tracing();

    tracing::info!("Starting pinflow interpreter...");
    let registry = build_registry(&config)?;
    let interpreter = Interpreter::new(registry, &config.engine);

    let bind_addr = config.interpreter.address();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", bind_addr, e))?;
    tracing::info!("Interpreter listening on {}", bind_addr);

    serve(listener, interpreter).await
}

/// Accept connections until a client sends KILL
pub async fn serve(listener: TcpListener, interpreter: Interpreter) -> Result<()> {
    let runner = tokio::spawn({
        let interpreter = interpreter.clone();
        async move { interpreter.run().await }
    });
    let shutdown = Arc::new(Notify::new());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted
                    .map_err(|e| anyhow::anyhow!("Failed to accept connection: {}", e))?;
                tracing::info!("🔗 Client connected from {}", peer);

                let interpreter = interpreter.clone();
                let shutdown = Arc::clone(&shutdown);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, interpreter, shutdown).await {
                        tracing::warn!("⚠️ Connection from {} ended with error: {}", peer, e);
                    } else {
                        tracing::info!("👋 Client {} disconnected", peer);
                    }
                });
            }
            _ = shutdown.notified() => break,
        }
    }

    interpreter.wake();
    runner
        .await
        .map_err(|e| anyhow::anyhow!("Interpreter loop panicked: {}", e))?;
    tracing::info!("✅ Interpreter server stopped");
    Ok(())
}

async fn handle_connection(socket: TcpStream, interpreter: Interpreter, shutdown: Arc<Notify>) -> Result<()> {
    let (mut reader, mut writer) = socket.into_split();

    while let Some(text) = read_frame(&mut reader).await? {
        let (response, kill) = match Command::parse(&text) {
            Ok(command) => {
                let kill = command == Command::Kill;
                (interpreter.handle(command), kill)
            }
            Err(e) => {
                tracing::warn!("⚠️ Rejecting malformed command: {}", e);
                (Response::Error(e.to_string()), false)
            }
        };

        write_frame(&mut writer, &response.encode()?).await?;

        if kill {
            shutdown.notify_one();
            break;
        }
    }

    Ok(())
}
