//! Minimal event-bus bridge endpoint.

use eventbridge_core::{Address, ClientFrame, Message, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// A message fanned out to every connection registered on its address.
#[derive(Debug, Clone)]
struct Delivery {
    address: Address,
    body: Value,
}

pub async fn run(addr: SocketAddr, address: Address, interval: Duration) -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<Delivery>(100);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}", addr);

    tokio::spawn(publish_numbers(address, interval, broadcast_tx.clone()));

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let broadcast_tx = broadcast_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, broadcast_tx).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn publish_numbers(address: Address, interval: Duration, tx: broadcast::Sender<Delivery>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let number: u32 = rand::rng().random_range(0..100);
        tracing::debug!("Publishing {} to {}", number, address);
        // No receivers simply means nobody is connected yet.
        let _ = tx.send(Delivery {
            address: address.clone(),
            body: Value::from(number),
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    broadcast_tx: broadcast::Sender<Delivery>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();
    let mut broadcast_rx = broadcast_tx.subscribe();
    let mut registered = HashSet::new();

    tracing::info!("Bridge client connected: {}", addr);

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                let text = match msg {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(_) => break,
                    _ => continue,
                };
                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Invalid frame from {}: {}", addr, e);
                        continue;
                    }
                };

                if let Some(reply) = handle_frame(frame, &mut registered, &broadcast_tx) {
                    sink.send(WsMessage::Text(serde_json::to_string(&reply)?.into()))
                        .await?;
                }
            }

            delivery = broadcast_rx.recv() => {
                match delivery {
                    Ok(delivery) if registered.contains(&delivery.address) => {
                        let frame = ServerFrame::Rec(Message::new(delivery.address, delivery.body));
                        sink.send(WsMessage::Text(serde_json::to_string(&frame)?.into()))
                            .await?;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("{} lagged, skipped {} messages", addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("Bridge client disconnected: {}", addr);
    Ok(())
}

/// Apply one client frame. Returns the frame to answer with, if any.
fn handle_frame(
    frame: ClientFrame,
    registered: &mut HashSet<Address>,
    broadcast_tx: &broadcast::Sender<Delivery>,
) -> Option<ServerFrame> {
    match frame {
        ClientFrame::Register { address, .. } => {
            tracing::debug!("Register {}", address);
            registered.insert(address);
            None
        }
        ClientFrame::Unregister { address, .. } => {
            tracing::debug!("Unregister {}", address);
            registered.remove(&address);
            None
        }
        ClientFrame::Publish { address, body, .. } | ClientFrame::Send { address, body, .. } => {
            let _ = broadcast_tx.send(Delivery { address, body });
            None
        }
        ClientFrame::Ping => Some(ServerFrame::Pong),
    }
}
