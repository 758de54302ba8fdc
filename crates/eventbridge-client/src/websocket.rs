//! WebSocket transport.
//!
//! Talks to a SockJS bridge through its raw websocket endpoint
//! (`<prefix>/websocket`), one JSON frame per text message.

use crate::transport::{CloseEvent, Connector, Outbound, TransportEvent, TransportLink};
use crate::{BridgeError, BusOptions};
use eventbridge_core::{ClientFrame, ServerFrame};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Grace period for the peer to acknowledge a locally initiated close.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connects over tokio-tungstenite. Must be used inside a tokio runtime;
/// outside one, the link reports an unclean close straight away.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, url: &Url, options: &BusOptions) -> TransportLink {
        let (link, end) = TransportLink::pair();

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                let _ = end
                    .events
                    .send(TransportEvent::Closed(CloseEvent::failed(e.to_string())));
                return link;
            }
        };

        let url = url.clone();
        let options = options.clone();
        handle.spawn(async move {
            let close = match sockjs_websocket_url(&url) {
                Ok(target) => drive(target, options, end.commands, &end.events).await,
                Err(e) => CloseEvent::failed(e.to_string()),
            };
            let _ = end.events.send(TransportEvent::Closed(close));
        });
        link
    }
}

/// Map a bridge URL onto its raw websocket endpoint.
///
/// `http(s)://host/prefix` becomes `ws(s)://host/prefix/websocket`;
/// `ws(s)://` URLs are used as given.
pub fn sockjs_websocket_url(url: &Url) -> Result<Url, BridgeError> {
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url.clone()),
        "http" => "ws",
        "https" => "wss",
        other => return Err(BridgeError::UnsupportedScheme(other.to_owned())),
    };

    let mut target = url.clone();
    target
        .set_scheme(scheme)
        .map_err(|()| BridgeError::UnsupportedScheme(url.scheme().to_owned()))?;
    let path = target.path().trim_end_matches('/').to_owned();
    if !path.ends_with("/websocket") {
        target.set_path(&format!("{path}/websocket"));
    }
    Ok(target)
}

async fn drive(
    target: Url,
    options: BusOptions,
    mut commands: mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> CloseEvent {
    tracing::debug!("Opening websocket to {}", target);
    let handshake = tokio_tungstenite::connect_async(target.as_str());
    let result = match options.connect_timeout {
        Some(limit) => match tokio::time::timeout(limit, handshake).await {
            Ok(result) => result,
            Err(_) => return CloseEvent::failed("connect timeout"),
        },
        None => handshake.await,
    };
    let ws = match result {
        Ok((ws, _response)) => ws,
        Err(e) => return CloseEvent::failed(e.to_string()),
    };

    if events.send(TransportEvent::Opened).is_err() {
        return CloseEvent::normal();
    }

    let (mut sink, mut stream) = ws.split();
    let mut ping = (!options.ping_interval.is_zero()).then(|| {
        let period = options.ping_interval;
        tokio::time::interval_at(Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return CloseEvent::failed(e.to_string()),
                    None => return CloseEvent::failed("connection reset"),
                };
                match msg {
                    WsMessage::Text(text) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if events.send(TransportEvent::Frame(frame)).is_err() {
                                let _ = sink.send(WsMessage::Close(None)).await;
                                return CloseEvent::normal();
                            }
                        }
                        Err(e) => tracing::warn!("Invalid frame: {}", e),
                    },
                    WsMessage::Close(frame) => {
                        return match frame {
                            Some(frame) => CloseEvent {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.as_str().to_owned(),
                                was_clean: true,
                            },
                            None => CloseEvent::normal(),
                        };
                    }
                    _ => {}
                }
            }

            command = commands.recv() => {
                match command {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = send_frame(&mut sink, &frame).await {
                            return CloseEvent::failed(e);
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        let _ = tokio::time::timeout(CLOSE_GRACE, async {
                            while let Some(Ok(msg)) = stream.next().await {
                                if msg.is_close() {
                                    break;
                                }
                            }
                        })
                        .await;
                        return CloseEvent::normal();
                    }
                }
            }

            _ = tick(&mut ping) => {
                if let Err(e) = send_frame(&mut sink, &ClientFrame::Ping).await {
                    return CloseEvent::failed(e);
                }
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &ClientFrame) -> Result<(), String> {
    let text = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sink.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}

async fn tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventBus;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tokio::net::TcpListener;

    #[test]
    fn http_maps_to_websocket_endpoint() {
        let url = Url::parse("http://localhost:9999/randomnumber").unwrap();
        assert_eq!(
            sockjs_websocket_url(&url).unwrap().as_str(),
            "ws://localhost:9999/randomnumber/websocket"
        );

        let url = Url::parse("https://bus.example.com/eventbus/").unwrap();
        assert_eq!(
            sockjs_websocket_url(&url).unwrap().as_str(),
            "wss://bus.example.com/eventbus/websocket"
        );
    }

    #[test]
    fn websocket_urls_are_verbatim() {
        let url = Url::parse("ws://test/bus").unwrap();
        assert_eq!(sockjs_websocket_url(&url).unwrap(), url);
    }

    #[test]
    fn other_schemes_are_rejected() {
        let url = Url::parse("ftp://test/bus").unwrap();
        assert!(matches!(
            sockjs_websocket_url(&url),
            Err(BridgeError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[tokio::test]
    async fn loopback_register_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let msg = ws.next().await.unwrap().unwrap();
            let frame: ClientFrame = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            assert!(matches!(frame, ClientFrame::Register { ref address, .. } if address.as_str() == "randomnumber"));

            ws.send(WsMessage::Text(
                r#"{"type":"rec","address":"randomnumber","body":42}"#.into(),
            ))
            .await
            .unwrap();

            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let url = format!("ws://{addr}/randomnumber/websocket");
        let options = BusOptions::default().with_ping_interval(Duration::ZERO);
        let mut bus = EventBus::open(&url, options, &WebSocketConnector).unwrap();
        let received = Rc::new(RefCell::new(Vec::new()));
        let r = received.clone();
        bus.on_opened(move |bus| {
            bus.register_handler("randomnumber", move |result| {
                r.borrow_mut().push(result.unwrap().body_as::<i64>().unwrap());
            })
            .unwrap();
        });

        while received.borrow().is_empty() {
            assert!(bus.turn().await, "closed before the message arrived");
        }
        bus.close();
        bus.run().await;

        assert_eq!(*received.borrow(), vec![42]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_closes_uncleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut bus = EventBus::open(
            &format!("ws://{addr}/bus"),
            BusOptions::default(),
            &WebSocketConnector,
        )
        .unwrap();
        let closes = Rc::new(RefCell::new(Vec::new()));
        let c = closes.clone();
        bus.on_opened(|_| panic!("should never open"));
        bus.on_closed(move |event| c.borrow_mut().push(event.was_clean));

        bus.run().await;

        assert_eq!(*closes.borrow(), vec![false]);
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept the TCP connection but never answer the upgrade.
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let options = BusOptions::default().with_connect_timeout(Some(Duration::from_millis(50)));
        let mut bus =
            EventBus::open(&format!("ws://{addr}/bus"), options, &WebSocketConnector).unwrap();
        let closes = Rc::new(RefCell::new(Vec::new()));
        let c = closes.clone();
        bus.on_closed(move |event| c.borrow_mut().push(event.clone()));

        bus.run().await;

        assert_eq!(*closes.borrow(), vec![CloseEvent::failed("connect timeout")]);
    }

    #[tokio::test]
    async fn pings_while_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let msg = ws.next().await.unwrap().unwrap();
            let frame: ClientFrame = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            assert_eq!(frame, ClientFrame::Ping);

            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let options = BusOptions::default().with_ping_interval(Duration::from_millis(20));
        let mut bus =
            EventBus::open(&format!("ws://{addr}/bus"), options, &WebSocketConnector).unwrap();
        let closes = Rc::new(RefCell::new(Vec::new()));
        let c = closes.clone();
        bus.on_closed(move |event| c.borrow_mut().push(event.was_clean));

        bus.run().await;

        assert_eq!(*closes.borrow(), vec![true]);
        server.await.unwrap();
    }

    #[test]
    fn outside_runtime_closes_immediately() {
        let mut bus = EventBus::open("ws://test/bus", BusOptions::default(), &WebSocketConnector)
            .unwrap();
        let closed = Rc::new(RefCell::new(false));
        let c = closed.clone();
        bus.on_closed(move |event| *c.borrow_mut() = !event.was_clean);

        bus.pump();

        assert!(*closed.borrow());
    }
}
