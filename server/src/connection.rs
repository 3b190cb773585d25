//! WebSocket plumbing for a single client.
//!
//! Each accepted socket gets a reader task (this function) and a writer task.
//! The writer drains the connection's bounded outbound queue; the hub only ever
//! `try_send`s into that queue, so a stalled socket can never block the hub.
//! A write that stalls past the configured timeout ends the writer, and the
//! reader stops as soon as the writer does.

use crate::hub::HubHandle;
use futures::{Sink, SinkExt, StreamExt};
use log::{debug, info, warn};
use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Runs one connection until the peer leaves, the socket errors, a write
/// times out or the hub drops the outbound queue.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: HubHandle,
    queue: usize,
    write_timeout: Duration,
) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let (sink, mut stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(queue.max(1));

    let Some(conn_id) = hub.register(outbound_tx) else {
        return;
    };
    info!("Client {} connected from {}", conn_id, peer);

    let mut writer = tokio::spawn(pump_outbound(
        conn_id.clone(),
        sink,
        outbound_rx,
        write_timeout,
    ));

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !hub.inbound(&conn_id, text.as_str().to_string()).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Read error on {}: {}", conn_id, e);
                    break;
                }
            },
            // Write timeout, or the hub dropped us as a slow consumer
            _ = &mut writer => break,
        }
    }

    hub.unregister(&conn_id);
    writer.abort();
    info!("Client {} disconnected", conn_id);
}

/// Forwards queued frames to the socket until the queue closes or a write
/// fails or exceeds `write_timeout`.
async fn pump_outbound<S>(
    conn_id: String,
    mut sink: S,
    mut outbound_rx: mpsc::Receiver<String>,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(text) = outbound_rx.recv().await {
        match timeout(write_timeout, sink.send(Message::text(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write error on {}: {}", conn_id, e);
                break;
            }
            Err(_) => {
                warn!("Write to {} timed out after {:?}", conn_id, write_timeout);
                break;
            }
        }
    }
    let _ = timeout(write_timeout, sink.close()).await;
}
