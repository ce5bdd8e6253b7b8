// STOMP-over-websocket transport for the replay backend

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use reqwest::Url;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::errors::ReplayError;

use super::stomp::{Frame, parse_frames};
use super::{Connector, EventSink, Transport, TransportEvent};

enum Outbound {
    Subscribe { id: String, destination: String },
    Send { destination: String, body: String },
    Disconnect,
}

impl Outbound {
    fn into_frame(self) -> Frame {
        match self {
            Outbound::Subscribe { id, destination } => Frame::new("SUBSCRIBE")
                .with_header("id", id)
                .with_header("destination", destination),
            Outbound::Send { destination, body } => Frame::new("SEND")
                .with_header("destination", destination)
                .with_body("application/json", body),
            Outbound::Disconnect => Frame::new("DISCONNECT"),
        }
    }
}

/// Opens STOMP sessions over a websocket endpoint, one background task per connection.
#[derive(Clone, Debug)]
pub struct StompConnector {
    url: String,
    host: String,
}

impl StompConnector {
    /// `ws_url` must be an absolute `ws` or `wss` URL with a host.
    pub fn new(ws_url: &str) -> Result<Self, ReplayError> {
        let invalid = || ReplayError::InvalidUrl {
            url: ws_url.to_string(),
        };
        let parsed = Url::parse(ws_url).map_err(|_| invalid())?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(invalid());
        }
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(invalid()),
        };
        Ok(Self {
            url: parsed.to_string(),
            host,
        })
    }

    /// Derive the websocket endpoint from the REST base URL (`http` becomes `ws`, `https`
    /// becomes `wss`).
    pub fn from_base_url(api_base_url: &str, websocket_path: &str) -> Result<Self, ReplayError> {
        let invalid = || ReplayError::InvalidUrl {
            url: api_base_url.to_string(),
        };
        let mut url = Url::parse(api_base_url).map_err(|_| invalid())?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            _ => return Err(invalid()),
        };
        url.set_scheme(scheme).map_err(|_| invalid())?;
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            websocket_path.trim_start_matches('/')
        );
        url.set_path(&path);
        Self::new(url.as_str())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for StompConnector {
    fn open(&mut self, sink: EventSink) -> Result<Box<dyn Transport>, ReplayError> {
        let (outbound_tx, outbound_rx) = unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_connection(
            self.url.clone(),
            self.host.clone(),
            outbound_rx,
            sink,
            cancel.clone(),
        ));

        Ok(Box::new(StompTransport {
            outbound: outbound_tx,
            cancel,
            next_subscription: 0,
        }))
    }
}

struct StompTransport {
    outbound: UnboundedSender<Outbound>,
    cancel: CancellationToken,
    next_subscription: u32,
}

impl StompTransport {
    fn enqueue(&self, command: Outbound) -> Result<(), ReplayError> {
        self.outbound
            .send(command)
            .map_err(|_| ReplayError::Transport {
                reason: "websocket task has stopped".to_string(),
            })
    }
}

impl Transport for StompTransport {
    fn subscribe(&mut self, topic: &str) -> Result<(), ReplayError> {
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        self.enqueue(Outbound::Subscribe {
            id,
            destination: topic.to_string(),
        })
    }

    fn publish(&mut self, destination: &str, body: String) -> Result<(), ReplayError> {
        self.enqueue(Outbound::Send {
            destination: destination.to_string(),
            body,
        })
    }

    fn close(&mut self) {
        // the task sends DISCONNECT if it is still connected, then the token stops it
        let _ = self.enqueue(Outbound::Disconnect);
        self.cancel.cancel();
    }
}

impl Drop for StompTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_connection(
    url: String,
    host: String,
    mut outbound: UnboundedReceiver<Outbound>,
    sink: EventSink,
    cancel: CancellationToken,
) {
    let reason = match drive_connection(&url, &host, &mut outbound, &sink, &cancel).await {
        Ok(()) => None,
        Err(e) => Some(e.to_string()),
    };
    debug!("Stream: websocket task for {} finished", url);
    sink.send(TransportEvent::Closed { reason });
}

async fn drive_connection(
    url: &str,
    host: &str,
    outbound: &mut UnboundedReceiver<Outbound>,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<(), ReplayError> {
    let (socket, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = connect_async(url) => connected.map_err(|e| ReplayError::Transport {
            reason: format!("could not connect to {url}: {e}"),
        })?,
    };
    info!("Stream: websocket open to {}", url);

    let (mut write, mut read) = socket.split();
    let connect = Frame::new("CONNECT")
        .with_header("accept-version", "1.2,1.1,1.0")
        .with_header("host", host)
        .with_header("heart-beat", "0,0");
    write
        .send(Message::Text(connect.encode().into()))
        .await
        .map_err(|e| ReplayError::Transport {
            reason: e.to_string(),
        })?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            command = outbound.recv() => {
                let Some(command) = command else {
                    return Ok(());
                };
                let disconnect = matches!(command, Outbound::Disconnect);
                write
                    .send(Message::Text(command.into_frame().encode().into()))
                    .await
                    .map_err(|e| ReplayError::Transport { reason: e.to_string() })?;
                if disconnect {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
            incoming = read.next() => {
                let text = match incoming {
                    None | Some(Ok(Message::Close(_))) => {
                        return Err(ReplayError::Transport {
                            reason: "connection closed by server".to_string(),
                        });
                    }
                    Some(Err(e)) => {
                        return Err(ReplayError::Transport { reason: e.to_string() });
                    }
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };

                let frames = match parse_frames(text.as_str()) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!("Stream: skipping undecodable STOMP message: {}", e);
                        continue;
                    }
                };
                for frame in frames {
                    match frame.command.as_str() {
                        "CONNECTED" => {
                            if !sink.send(TransportEvent::Opened) {
                                return Ok(());
                            }
                        }
                        "MESSAGE" => {
                            if !sink.send(TransportEvent::Message(frame.body)) {
                                return Ok(());
                            }
                        }
                        "ERROR" => {
                            return Err(ReplayError::Transport {
                                reason: frame
                                    .header("message")
                                    .unwrap_or("broker reported an error")
                                    .to_string(),
                            });
                        }
                        other => debug!("Stream: ignoring STOMP {} frame", other),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url_from_http_base() {
        let connector = StompConnector::from_base_url("http://10.0.0.5:8080/", "/ws-f1/websocket")
            .unwrap();
        assert_eq!(connector.url(), "ws://10.0.0.5:8080/ws-f1/websocket");
        assert_eq!(connector.host, "10.0.0.5:8080");
    }

    #[test]
    fn test_websocket_url_from_https_base() {
        let connector =
            StompConnector::from_base_url("https://replay.example.com", "ws-f1/websocket").unwrap();
        assert_eq!(connector.url(), "wss://replay.example.com/ws-f1/websocket");
    }

    #[test]
    fn test_websocket_url_rejects_unknown_scheme() {
        assert!(StompConnector::from_base_url("ftp://example.com", "ws").is_err());
    }

    #[test]
    fn test_malformed_urls_are_rejected() {
        assert!(StompConnector::from_base_url("http://", "ws").is_err());
        assert!(StompConnector::from_base_url("localhost:8080", "ws").is_err());
        assert!(StompConnector::new("http://10.0.0.5:8080/ws").is_err());
    }

    #[test]
    fn test_host_header_without_port() {
        let connector = StompConnector::new("wss://replay.example.com/ws-f1/websocket").unwrap();
        assert_eq!(connector.host, "replay.example.com");
    }

    #[test]
    fn test_outbound_frames() {
        let subscribe = Outbound::Subscribe {
            id: "sub-0".to_string(),
            destination: "/topic/race/1/client-a".to_string(),
        }
        .into_frame();
        assert_eq!(subscribe.command, "SUBSCRIBE");
        assert_eq!(subscribe.header("id"), Some("sub-0"));

        let send = Outbound::Send {
            destination: "/app/race/data".to_string(),
            body: "{}".to_string(),
        }
        .into_frame();
        assert_eq!(send.header("content-length"), Some("2"));
    }
}
