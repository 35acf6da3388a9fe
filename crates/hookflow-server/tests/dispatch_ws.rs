use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use hookflow_contracts::{
    DispatchMessage, GetHandlerHistoryRequest, HandlerOption, InvokeResult, RegisterHandlerRequest,
    ReportInvocationRequest,
};
use hookflow_core::AgentCore;
use hookflow_server::{AgentServer, AppState, ServerConfig};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestAgent {
    core: Arc<AgentCore>,
    rpc_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    server: JoinHandle<anyhow::Result<()>>,
    _dir: TempDir,
}

impl TestAgent {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::from_toml(&format!(
            r#"
            [server]
            host = "127.0.0.1"
            rpc_port = 0
            http_port = 0
            instance_id = "e2e"

            [dispatch]
            dequeue_wait = "50ms"

            [history]
            path = "{}"
            "#,
            dir.path().display()
        ))
        .unwrap();

        let core = AgentCore::new(config.dispatch.clone(), config.history.clone())
            .await
            .unwrap();
        let state = AppState::new(core.dispatch.clone(), config.instance_id.clone());
        let server = AgentServer::bind(&config, state).await.unwrap();
        let rpc_addr = server.rpc_addr().unwrap();

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(server.run(shutdown_rx));

        Self {
            core,
            rpc_addr,
            shutdown,
            server,
            _dir: dir,
        }
    }

    fn register(&self, name: &str, timeout_ms: u64, options: Vec<HandlerOption>) -> String {
        self.core
            .dispatch
            .register_handler(RegisterHandlerRequest {
                dispatch_id: "d1".to_string(),
                handler_name: name.to_string(),
                timeout_ms,
                options,
            })
            .unwrap()
            .id
    }

    async fn connect(&self, dispatch_id: &str) -> Socket {
        let (mut socket, _) = connect_async(format!("ws://{}/rpc/dispatch", self.rpc_addr))
            .await
            .unwrap();
        let open = serde_json::json!({"dispatch_id": dispatch_id, "client_version": "e2e"});
        socket.send(Message::Text(open.to_string().into())).await.unwrap();
        socket
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server stops")
            .unwrap()
            .unwrap();
        self.core.shutdown().await;
    }
}

async fn next_message(socket: &mut Socket) -> DispatchMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame before timeout")
            .expect("socket open")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn run_now_session_delivers_and_completes() {
    let agent = TestAgent::start().await;
    agent.register("h1", 0, vec![HandlerOption::run_now()]);

    let mut socket = agent.connect("d1").await;

    let DispatchMessage::Invoke(invoke) = next_message(&mut socket).await else {
        panic!("expected an invocation first");
    };
    assert_eq!(invoke.handler_name, "h1");
    assert_eq!(invoke.dispatch_id, "d1");
    assert_eq!(invoke.timeout_ms, 300_000);

    agent
        .core
        .dispatch
        .report_invocation(ReportInvocationRequest {
            handler_invoke: invoke.clone(),
            start_client_timestamp: Some(chrono::Utc::now()),
            duration_ms: 12,
            result: Some(InvokeResult {
                value: "done".to_string(),
            }),
            error: None,
            logs: vec![],
        })
        .await;

    assert_eq!(next_message(&mut socket).await, DispatchMessage::WorkCompleted);

    let history = agent
        .core
        .dispatch
        .get_handler_history(GetHandlerHistoryRequest {
            handler_name: "h1".to_string(),
            include_logs: false,
            tail: 0,
        })
        .await
        .unwrap()
        .history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].invocation_id, invoke.invocation_id);
    assert_eq!(history[0].duration_ms, 12);

    socket.close(None).await.unwrap();
    agent.stop().await;
}

#[tokio::test]
async fn closing_socket_stops_session_handlers() {
    let agent = TestAgent::start().await;
    agent.register("poller", 1_000, vec![HandlerOption::interval("1h")]);

    let socket = agent.connect("d1").await;

    let manager = agent.core.manager.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !manager.handler_infos().iter().all(|info| info.is_active) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handler started");

    drop(socket);

    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.handler_infos().iter().any(|info| info.is_active) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handler stopped after disconnect");

    assert_eq!(manager.handler_infos().len(), 1);
    agent.stop().await;
}
