#![forbid(unsafe_code)]

//! Client for the line-delimited JSON-RPC protocol spoken by agent
//! app-server processes over stdio.

pub mod api;
pub mod config;
pub mod errors;
pub mod launcher;
pub mod pump;
pub mod render;
pub mod rpc;
pub mod session;
pub mod turn;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use pump::{ApprovalDecision, ApprovalPolicy, NotificationPump};
pub use session::{Session, SessionOptions};
pub use turn::{run_turn, TurnOptions, TurnResult, TurnState};
