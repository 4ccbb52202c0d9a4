use clap::{App, Arg};
use scanbus::protocol::{ControlResponse, ProtocolHandler, ResponseStatus};
use scanbus::{RequestRegistry, SchedulerConfig};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

const DEFAULT_BIND: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "7070";
const SCHEDULE_BROADCAST_BUFFER_SIZE: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("scanbus-service")
        .version("0.1.0")
        .about("Background scan scheduling service")
        .arg(
            Arg::with_name("bind")
                .short("b")
                .long("bind")
                .value_name("ADDR")
                .help("Address to listen on")
                .takes_value(true)
                .default_value(DEFAULT_BIND),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Port to listen on")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Scheduler configuration (JSON)")
                .takes_value(true),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => {
            let config = SchedulerConfig::from_file(path)?;
            info!("Loaded scheduler config from {}", path);
            config
        }
        None => SchedulerConfig::default(),
    };

    let registry = Arc::new(Mutex::new(RequestRegistry::with_config(&config)?));
    let (schedule_tx, _) = broadcast::channel(SCHEDULE_BROADCAST_BUFFER_SIZE);

    let addr = format!(
        "{}:{}",
        matches.value_of("bind").unwrap_or(DEFAULT_BIND),
        matches.value_of("port").unwrap_or(DEFAULT_PORT)
    );
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "Scan service listening on {} (max {} buckets, {} channels)",
        addr, config.limits.max_buckets, config.limits.max_channels
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Client connected: {}", peer);
                    let client_registry = Arc::clone(&registry);
                    let client_tx = schedule_tx.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, client_registry, client_tx).await {
                            warn!("Client {} error: {}", peer, e);
                        }
                        info!("Client {} disconnected", peer);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down scan service");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_client(
    stream: TcpStream,
    registry: Arc<Mutex<RequestRegistry>>,
    schedule_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    // Forward schedule pushes to this client
    let push_task = tokio::spawn(forward_pushes(schedule_tx.subscribe(), Arc::clone(&writer)));

    let mut protocol = ProtocolHandler::new();
    let mut line = String::new();
    loop {
        line.clear();
        if buf_reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (response, update) = match protocol.parse_message(trimmed) {
            Ok(message) => {
                info!("Received {:?}", message);
                let mut registry_guard = registry.lock().await;
                let changes_before = registry_guard.stats().schedule_changes;
                let response = protocol.handle(&mut *registry_guard, message);
                let update = (registry_guard.stats().schedule_changes != changes_before)
                    .then(|| ControlResponse::schedule_update(registry_guard.schedule()));
                (response, update)
            }
            Err(e) => {
                warn!("Invalid message: {}", e);
                (
                    ControlResponse::with_message(ResponseStatus::InvalidMessage, e.to_string()),
                    None,
                )
            }
        };

        let response_json = protocol.serialize_response(&response)?.to_string();
        {
            let mut writer_guard = writer.lock().await;
            writer_guard.write_all(response_json.as_bytes()).await?;
            writer_guard.write_all(b"\n").await?;
        }

        if let Some(update) = update {
            let update_json = protocol.serialize_response(&update)?.to_string();
            if schedule_tx.send(update_json).is_err() {
                warn!("No subscribers for schedule update");
            }
        }
    }

    push_task.abort();
    Ok(())
}

/// Writes every schedule push to the client until the channel closes or the
/// client goes away. A lagging client skips stale pushes and keeps going.
async fn forward_pushes<W>(mut schedule_rx: broadcast::Receiver<String>, writer: Arc<Mutex<W>>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let update = match schedule_rx.recv().await {
            Ok(update) => update,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Client lagged, {} schedule push(es) skipped", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let mut writer_guard = writer.lock().await;
        if let Err(e) = writer_guard.write_all(update.as_bytes()).await {
            warn!("Failed to push schedule: {}", e);
            break;
        }
        if writer_guard.write_all(b"\n").await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lagging_client_keeps_receiving_pushes() {
        let (schedule_tx, schedule_rx) = broadcast::channel(2);
        for update in ["first", "second", "third", "fourth"] {
            schedule_tx.send(update.to_string()).unwrap();
        }
        drop(schedule_tx);

        let writer = Arc::new(Mutex::new(Vec::new()));
        forward_pushes(schedule_rx, Arc::clone(&writer)).await;

        let written = writer.lock().await;
        assert_eq!(String::from_utf8_lossy(&written), "third\nfourth\n");
    }
}
