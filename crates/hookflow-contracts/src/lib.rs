//! Wire messages shared by the hookflow agent and its remote workers.
//!
//! Every type here is plain serde data. Field names are snake_case JSON,
//! trigger types use their upper-case protocol names.

pub mod dispatch;
pub mod handler;
pub mod history;

pub use dispatch::{
    DispatchHandlerInvoke, DispatchMessage, DispatchRequest, InvocationError, InvokeResult,
    LogEntry, ReportInvocationRequest, ReportInvocationResponse, TIMEOUT_ERROR_CODE,
};
pub use handler::{
    HandlerInfo, HandlerInvokeType, HandlerOption, ListHandlersResponse, RegisterHandlerRequest,
    RegisterHandlerResponse, UnregisterHandlerRequest, UnregisterHandlerResponse,
};
pub use history::{GetHandlerHistoryRequest, GetHandlerHistoryResponse, HandlerExecution};
