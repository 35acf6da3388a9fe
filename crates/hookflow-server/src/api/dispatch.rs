//! WebSocket binding of the dispatch stream. Each text frame in is a
//! `DispatchRequest`, each text frame out a `DispatchMessage`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        Extension,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hookflow_contracts::{DispatchMessage, DispatchRequest};
use hookflow_traits::{DispatchStream, StreamError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::AppState;

pub fn router() -> Router {
    Router::new().route("/dispatch", get(dispatch_handler))
}

async fn dispatch_handler(
    Extension(state): Extension<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let stream = Arc::new(WebSocketDispatchStream::new(socket, state.shutdown.child_token()));
    debug!("Dispatch stream connected");

    if let Err(e) = state.dispatch.dispatch(stream.clone()).await {
        warn!(error = %e, "Dispatch stream ended with error");
    }

    stream.close().await;
    debug!("Dispatch stream closed");
}

pub struct WebSocketDispatchStream {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    cancel: CancellationToken,
}

impl WebSocketDispatchStream {
    pub fn new(socket: WebSocket, cancel: CancellationToken) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            cancel,
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
        let _ = self.sink.lock().await.close().await;
    }
}

fn parse_request(payload: &[u8]) -> Result<DispatchRequest, StreamError> {
    serde_json::from_slice(payload).map_err(|e| StreamError::Malformed(e.to_string()))
}

#[async_trait]
impl DispatchStream for WebSocketDispatchStream {
    async fn send(&self, message: DispatchMessage) -> Result<(), StreamError> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Closed);
        }

        let payload =
            serde_json::to_string(&message).map_err(|e| StreamError::Malformed(e.to_string()))?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload.into())).await.map_err(|e| {
            self.cancel.cancel();
            StreamError::Transport(e.to_string())
        })
    }

    async fn recv(&self) -> Option<Result<DispatchRequest, StreamError>> {
        let mut stream = self.stream.lock().await;
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                frame = stream.next() => frame,
            };

            match frame {
                None | Some(Ok(Message::Close(_))) => {
                    self.cancel.cancel();
                    return None;
                }
                Some(Ok(Message::Text(text))) => return Some(parse_request(text.as_str().as_bytes())),
                Some(Ok(Message::Binary(bytes))) => return Some(parse_request(&bytes)),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.cancel.cancel();
                    return Some(Err(StreamError::Transport(e.to_string())));
                }
            }
        }
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let request = parse_request(br#"{"dispatch_id":"d1","client_version":"1.2.0"}"#).unwrap();
        assert_eq!(request.dispatch_id, "d1");
        assert_eq!(request.client_version, "1.2.0");

        let missing_version = parse_request(br#"{"dispatch_id":"d2"}"#).unwrap();
        assert_eq!(missing_version.client_version, "");

        assert!(matches!(
            parse_request(b"not json"),
            Err(StreamError::Malformed(_))
        ));
    }
}
