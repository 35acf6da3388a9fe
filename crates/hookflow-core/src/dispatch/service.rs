use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hookflow_contracts::{
    DispatchMessage, GetHandlerHistoryRequest, GetHandlerHistoryResponse, HandlerExecution,
    InvocationError, ListHandlersResponse, RegisterHandlerRequest, RegisterHandlerResponse,
    ReportInvocationRequest, ReportInvocationResponse, UnregisterHandlerRequest,
    UnregisterHandlerResponse,
};
use hookflow_traits::{DispatchStream, StreamError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::inflight::{InflightRequest, InflightTable};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, HandlerError, HistoryError};
use crate::handler::{HandlerManager, PendingInvocation};
use crate::history::HistoryManager;

struct ServiceInner {
    manager: HandlerManager,
    history: Arc<HistoryManager>,
    inflight: InflightTable,
    config: DispatchConfig,
}

/// Server side of the worker protocol: registration, session streaming,
/// result reporting and history queries.
#[derive(Clone)]
pub struct DispatchService {
    inner: Arc<ServiceInner>,
}

impl DispatchService {
    pub fn new(manager: HandlerManager, history: Arc<HistoryManager>, config: DispatchConfig) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                manager,
                history,
                inflight: InflightTable::default(),
                config,
            }),
        }
    }

    pub fn manager(&self) -> &HandlerManager {
        &self.inner.manager
    }

    pub fn history(&self) -> &Arc<HistoryManager> {
        &self.inner.history
    }

    pub fn inflight(&self) -> &InflightTable {
        &self.inner.inflight
    }

    pub fn register_handler(
        &self,
        request: RegisterHandlerRequest,
    ) -> Result<RegisterHandlerResponse, HandlerError> {
        let id = self.inner.manager.register_handler(
            &request.dispatch_id,
            &request.handler_name,
            Duration::from_millis(request.timeout_ms),
            request.options,
        )?;
        Ok(RegisterHandlerResponse { id })
    }

    pub async fn unregister_handler(&self, request: UnregisterHandlerRequest) -> UnregisterHandlerResponse {
        self.inner.manager.unregister_handler(&request.id).await;
        UnregisterHandlerResponse::default()
    }

    pub fn list_handlers(&self) -> ListHandlersResponse {
        ListHandlersResponse {
            handlers: self.inner.manager.handler_infos(),
        }
    }

    pub async fn get_handler_history(
        &self,
        request: GetHandlerHistoryRequest,
    ) -> Result<GetHandlerHistoryResponse, HistoryError> {
        let history = self
            .inner
            .history
            .get_history(&request.handler_name, request.include_logs, request.tail)
            .await?;
        Ok(GetHandlerHistoryResponse { history })
    }

    /// Drive one worker connection until it closes. Every new dispatch id
    /// seen on the stream starts that session's handlers and gets its own
    /// delivery loop; all of them stop when the stream is cancelled.
    pub async fn dispatch(&self, stream: Arc<dyn DispatchStream>) -> Result<(), DispatchError> {
        let cancel = stream.cancellation();
        let mut sessions: HashMap<String, JoinHandle<()>> = HashMap::new();

        let result = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                next = stream.recv() => next,
            };

            let request = match next {
                None => break Ok(()),
                Some(Ok(request)) => request,
                Some(Err(StreamError::Malformed(reason))) => {
                    warn!(reason = %reason, "Ignoring malformed dispatch request");
                    continue;
                }
                Some(Err(e)) => {
                    if cancel.is_cancelled() {
                        break Ok(());
                    }
                    error!(error = %e, "Dispatch stream failed");
                    break Err(e.into());
                }
            };

            if sessions.contains_key(&request.dispatch_id) {
                debug!(dispatch_id = %request.dispatch_id, "Session already running on this stream");
                continue;
            }

            info!(
                dispatch_id = %request.dispatch_id,
                client_version = %request.client_version,
                "Dispatch session opened"
            );
            if let Err(e) = self.inner.manager.start(&request.dispatch_id).await {
                error!(dispatch_id = %request.dispatch_id, error = %e, "Failed to start handlers");
                self.inner.manager.stop(&request.dispatch_id).await;
                break Err(e.into());
            }

            let task = tokio::spawn(
                self.clone()
                    .run_session(request.dispatch_id.clone(), stream.clone()),
            );
            sessions.insert(request.dispatch_id, task);
        };

        cancel.cancel();
        for (dispatch_id, task) in sessions {
            if let Err(e) = task.await {
                error!(dispatch_id = %dispatch_id, error = %e, "Delivery loop panicked");
            }
        }
        result
    }

    async fn run_session(self, dispatch_id: String, stream: Arc<dyn DispatchStream>) {
        let cancel = stream.cancellation();
        let wait = self.inner.config.dequeue_wait;

        while !cancel.is_cancelled() {
            match self.inner.manager.dequeue(&cancel, &dispatch_id, wait).await {
                Some(pending) => {
                    if let Err(e) = self.send_invocation(stream.as_ref(), pending).await {
                        warn!(dispatch_id = %dispatch_id, error = %e, "Failed to send invocation");
                        break;
                    }
                }
                None => {
                    if cancel.is_cancelled() || self.inner.manager.is_closed() {
                        break;
                    }
                    if self.is_session_complete(&dispatch_id) {
                        info!(dispatch_id = %dispatch_id, "All handlers finished, sending WORK_COMPLETED");
                        if let Err(e) = stream.send(DispatchMessage::WorkCompleted).await {
                            warn!(dispatch_id = %dispatch_id, error = %e, "Failed to send WORK_COMPLETED");
                        }
                        break;
                    }
                }
            }
        }

        self.inner.manager.stop(&dispatch_id).await;
        info!(dispatch_id = %dispatch_id, "Dispatch session closed");
    }

    fn is_session_complete(&self, dispatch_id: &str) -> bool {
        self.inner.manager.is_session_finished(dispatch_id)
            && self.inner.inflight.count_for(dispatch_id) == 0
    }

    async fn send_invocation(
        &self,
        stream: &dyn DispatchStream,
        pending: PendingInvocation,
    ) -> Result<(), StreamError> {
        let PendingInvocation {
            mut message,
            handle,
            triggered_at,
        } = pending;
        message.invocation_id = Uuid::new_v4().to_string();
        let invocation_id = message.invocation_id.clone();
        let timeout = Duration::from_millis(message.timeout_ms);

        // Recorded before sending so a fast report always finds it.
        self.inner.inflight.insert(InflightRequest {
            message: message.clone(),
            handle,
            sent_at: Utc::now(),
        });

        let handler_name = message.handler_name.clone();
        let reason = message.reason;
        let queued_ms = (Utc::now() - triggered_at).num_milliseconds();
        if let Err(e) = stream.send(DispatchMessage::Invoke(message)).await {
            if let Some(request) = self.inner.inflight.remove(&invocation_id) {
                request
                    .handle
                    .complete(Err(InvocationError::new("unavailable", e.to_string())));
            }
            return Err(e);
        }

        info!(
            invocation_id = %invocation_id,
            handler = %handler_name,
            reason = %reason,
            queued_ms = queued_ms,
            "Sent invocation"
        );
        self.watch_timeout(invocation_id, timeout);
        Ok(())
    }

    /// Report a `timeout` failure unless a real result arrives first.
    fn watch_timeout(&self, invocation_id: String, timeout: Duration) {
        let service = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(request) = service.inner.inflight.get(&invocation_id) else {
                return;
            };

            warn!(
                invocation_id = %invocation_id,
                handler = %request.message.handler_name,
                timeout_ms = request.message.timeout_ms,
                "Invocation timed out"
            );
            let elapsed = Utc::now() - request.sent_at;
            service
                .report_invocation(ReportInvocationRequest {
                    handler_invoke: request.message,
                    start_client_timestamp: None,
                    duration_ms: elapsed.num_milliseconds(),
                    result: None,
                    error: Some(InvocationError::timeout(format!(
                        "no result within {}ms",
                        timeout.as_millis()
                    ))),
                    logs: Vec::new(),
                })
                .await;
        });
    }

    /// Complete an in-flight invocation and record it in history. Reports
    /// for unknown ids (already timed out, or never sent) are ignored.
    pub async fn report_invocation(&self, report: ReportInvocationRequest) -> ReportInvocationResponse {
        let received_at = Utc::now();
        let invocation_id = report.handler_invoke.invocation_id.as_str();
        let Some(request) = self.inner.inflight.remove(invocation_id) else {
            debug!(invocation_id = %invocation_id, "Ignoring report for unknown invocation");
            return ReportInvocationResponse::default();
        };

        let outcome = report.outcome();
        match &outcome {
            Ok(result) => info!(
                invocation_id = %invocation_id,
                handler = %request.message.handler_name,
                duration_ms = report.duration_ms,
                result_length = result.len(),
                "Invocation completed"
            ),
            Err(e) => warn!(
                invocation_id = %invocation_id,
                handler = %request.message.handler_name,
                code = %e.code,
                error = %e.message,
                "Invocation failed"
            ),
        }
        request.handle.complete(outcome);

        let execution = HandlerExecution {
            dispatch_id: request.message.dispatch_id,
            handler_name: request.message.handler_name,
            invocation_id: request.message.invocation_id,
            start_client_timestamp: report.start_client_timestamp.unwrap_or(request.sent_at),
            publish_server_timestamp: Some(request.sent_at),
            receive_server_timestamp: Some(received_at),
            duration_ms: report.duration_ms,
            error: report.error,
            logs: report.logs,
        };
        if let Err(e) = self.inner.history.write(&execution).await {
            error!(invocation_id = %execution.invocation_id, error = %e, "Failed to record execution history");
        }

        ReportInvocationResponse::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryConfig;
    use crate::testkit::{RecordingCron, channel_stream};
    use hookflow_contracts::{HandlerInvokeType, HandlerOption, InvokeResult, LogEntry};
    use tempfile::{TempDir, tempdir};

    fn service() -> (DispatchService, TempDir) {
        let dir = tempdir().unwrap();
        let manager = HandlerManager::new(Arc::new(RecordingCron::default()));
        let history = Arc::new(HistoryManager::new(HistoryConfig::at(dir.path())));
        let config = DispatchConfig {
            dequeue_wait: Duration::from_millis(20),
        };
        (DispatchService::new(manager, history, config), dir)
    }

    fn register(service: &DispatchService, name: &str, timeout_ms: u64, options: Vec<HandlerOption>) -> String {
        service
            .register_handler(RegisterHandlerRequest {
                dispatch_id: "d1".to_string(),
                handler_name: name.to_string(),
                timeout_ms,
                options,
            })
            .unwrap()
            .id
    }

    fn expect_invoke(message: Option<DispatchMessage>) -> hookflow_contracts::DispatchHandlerInvoke {
        match message {
            Some(DispatchMessage::Invoke(invoke)) => invoke,
            other => panic!("expected invoke, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_now_session_completes() {
        let (service, _dir) = service();
        register(&service, "h1", 0, vec![HandlerOption::run_now()]);

        let (stream, mut client) = channel_stream();
        let runner = service.clone();
        let dispatch = tokio::spawn(async move { runner.dispatch(stream).await });
        client.open("d1");

        let invoke = expect_invoke(client.next_message(Duration::from_secs(2)).await);
        assert_eq!(invoke.handler_name, "h1");
        assert_eq!(invoke.dispatch_id, "d1");
        assert_eq!(invoke.timeout_ms, 300_000);
        assert_eq!(service.inflight().len(), 1);

        let started = Utc::now();
        service
            .report_invocation(ReportInvocationRequest {
                handler_invoke: invoke.clone(),
                start_client_timestamp: Some(started),
                duration_ms: 42,
                result: Some(InvokeResult {
                    value: "ok".to_string(),
                }),
                error: None,
                logs: vec![LogEntry {
                    timestamp: started,
                    level: "INFO".to_string(),
                    message: "ran".to_string(),
                }],
            })
            .await;
        assert!(service.inflight().is_empty());

        let done = client.next_message(Duration::from_secs(2)).await;
        assert_eq!(done, Some(DispatchMessage::WorkCompleted));

        let history = service
            .get_handler_history(GetHandlerHistoryRequest {
                handler_name: "h1".to_string(),
                include_logs: true,
                tail: 0,
            })
            .await
            .unwrap()
            .history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].invocation_id, invoke.invocation_id);
        assert_eq!(history[0].duration_ms, 42);
        assert_eq!(history[0].logs.len(), 1);
        assert!(history[0].publish_server_timestamp.is_some());
        assert!(history[0].receive_server_timestamp.is_some());

        client.disconnect();
        dispatch.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_timeout_reports_failure() {
        let (service, _dir) = service();
        register(&service, "slow", 50, vec![HandlerOption::run_now()]);

        let (stream, mut client) = channel_stream();
        let runner = service.clone();
        tokio::spawn(async move { runner.dispatch(stream).await });
        client.open("d1");

        let invoke = expect_invoke(client.next_message(Duration::from_secs(2)).await);
        assert_eq!(invoke.timeout_ms, 50);

        // Timeout clears the in-flight entry, which lets the session finish.
        let done = client.next_message(Duration::from_secs(2)).await;
        assert_eq!(done, Some(DispatchMessage::WorkCompleted));

        // The record is written right after the in-flight entry is cleared.
        let history = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let history = service.history().get_history("slow", false, 0).await.unwrap();
                if !history.is_empty() {
                    break history;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].error.as_ref().unwrap().is_timeout());

        // A result arriving after the timeout is a no-op.
        service
            .report_invocation(ReportInvocationRequest {
                handler_invoke: invoke,
                start_client_timestamp: None,
                duration_ms: 1,
                result: None,
                error: None,
                logs: vec![],
            })
            .await;
        let history = service
            .history()
            .get_history("slow", false, 0)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);

        client.disconnect();
    }

    #[tokio::test]
    async fn test_work_completed_waits_for_inflight_invocation() {
        let (service, _dir) = service();
        register(&service, "h1", 0, vec![HandlerOption::run_now()]);

        let (stream, mut client) = channel_stream();
        let runner = service.clone();
        tokio::spawn(async move { runner.dispatch(stream).await });
        client.open("d1");

        let invoke = expect_invoke(client.next_message(Duration::from_secs(2)).await);
        assert!(service.manager().is_session_finished("d1"));

        // Several dequeue ticks pass with the invocation unreported.
        assert!(client.next_message(Duration::from_millis(150)).await.is_none());
        assert_eq!(service.inflight().count_for("d1"), 1);

        service
            .report_invocation(ReportInvocationRequest {
                handler_invoke: invoke,
                start_client_timestamp: None,
                duration_ms: 5,
                result: None,
                error: None,
                logs: vec![],
            })
            .await;

        let done = client.next_message(Duration::from_secs(2)).await;
        assert_eq!(done, Some(DispatchMessage::WorkCompleted));
        client.disconnect();
    }

    #[tokio::test]
    async fn test_burst_of_timeouts_keeps_every_record() {
        let (service, _dir) = service();
        let id = register(&service, "burst", 50, vec![HandlerOption::invoke()]);

        let (stream, mut client) = channel_stream();
        let runner = service.clone();
        tokio::spawn(async move { runner.dispatch(stream).await });
        client.open("d1");

        let entry = service.manager().get(&id).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !entry.is_active() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        for _ in 0..5 {
            let invoke = entry.invoke(HandlerInvokeType::Invoke, HashMap::new());
            service.manager().trigger(invoke).await.unwrap();
        }
        for _ in 0..5 {
            expect_invoke(client.next_message(Duration::from_secs(2)).await);
        }

        let history = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let history = service.history().get_history("burst", false, 0).await.unwrap();
                if history.len() >= 5 {
                    break history;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(history.len(), 5);
        assert!(history.iter().all(|e| e.error.as_ref().unwrap().is_timeout()));

        client.disconnect();
    }

    #[tokio::test]
    async fn test_report_for_unknown_invocation_is_ignored() {
        let (service, _dir) = service();
        let invoke = hookflow_contracts::DispatchHandlerInvoke {
            invocation_id: "nope".to_string(),
            dispatch_id: "d1".to_string(),
            handler_id: "x".to_string(),
            handler_name: "ghost".to_string(),
            reason: hookflow_contracts::HandlerInvokeType::Invoke,
            args: Default::default(),
            timeout_ms: 10,
        };
        service
            .report_invocation(ReportInvocationRequest {
                handler_invoke: invoke,
                start_client_timestamp: None,
                duration_ms: 1,
                result: None,
                error: None,
                logs: vec![],
            })
            .await;

        let history = service.history().get_history("ghost", false, 0).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_stops_session_handlers() {
        let (service, _dir) = service();
        let id = register(&service, "poller", 0, vec![HandlerOption::interval("1h")]);

        let (stream, client) = channel_stream();
        let runner = service.clone();
        let dispatch = tokio::spawn(async move { runner.dispatch(stream).await });
        client.open("d1");

        let entry = service.manager().get(&id).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !entry.is_active() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        client.disconnect();
        dispatch.await.unwrap().unwrap();
        assert!(!entry.is_active());

        // Still registered, so a reconnect can start it again.
        assert_eq!(service.list_handlers().handlers.len(), 1);
    }

    #[tokio::test]
    async fn test_direct_invoke_round_trip() {
        let (service, _dir) = service();
        register(&service, "direct", 0, vec![HandlerOption::invoke()]);

        let (stream, mut client) = channel_stream();
        let runner = service.clone();
        tokio::spawn(async move { runner.dispatch(stream).await });
        client.open("d1");

        let manager = service.manager().clone();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !manager.get_by_tag("direct").unwrap().is_active() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let invoker = tokio::spawn(async move { manager.trigger_invoke("direct", "{}").await });

        let invoke = expect_invoke(client.next_message(Duration::from_secs(2)).await);
        assert_eq!(invoke.args["body"], "{}");
        service
            .report_invocation(ReportInvocationRequest {
                handler_invoke: invoke,
                start_client_timestamp: None,
                duration_ms: 3,
                result: Some(InvokeResult {
                    value: "{\"answer\":42}".to_string(),
                }),
                error: None,
                logs: vec![],
            })
            .await;

        let outcome = invoker.await.unwrap().unwrap();
        assert_eq!(outcome.unwrap(), "{\"answer\":42}");

        // Invoke-only handlers never finish on their own.
        assert!(client.next_message(Duration::from_millis(100)).await.is_none());
        client.disconnect();
    }
}
