//! Method names recognised on the wire.

/// Handshake request.
pub const INITIALIZE: &str = "initialize";
/// Post-handshake notification.
pub const INITIALIZED: &str = "initialized";
/// Create a conversation thread.
pub const THREAD_START: &str = "thread/start";
/// Reopen an existing thread.
pub const THREAD_RESUME: &str = "thread/resume";
/// List stored threads.
pub const THREAD_LIST: &str = "thread/list";
/// Start a turn on a thread.
pub const TURN_START: &str = "turn/start";
/// List available models.
pub const MODEL_LIST: &str = "model/list";
/// Read the signed-in account.
pub const ACCOUNT_READ: &str = "account/read";
/// Begin an account login flow.
pub const ACCOUNT_LOGIN_START: &str = "account/login/start";
/// Run a one-off command in the agent's sandbox.
pub const COMMAND_EXEC: &str = "command/exec";

/// Streamed fragment of agent message text.
pub const AGENT_MESSAGE_DELTA: &str = "item/agentMessage/delta";
/// A turn item began.
pub const ITEM_STARTED: &str = "item/started";
/// A turn item finished.
pub const ITEM_COMPLETED: &str = "item/completed";
/// Terminal event of a turn.
pub const TURN_COMPLETED: &str = "turn/completed";
/// Agent asks to run a command.
pub const COMMAND_EXECUTION_APPROVAL: &str = "item/commandExecution/requestApproval";
/// Agent asks to apply a file change.
pub const FILE_CHANGE_APPROVAL: &str = "item/fileChange/requestApproval";
/// Error reported by the agent outside a response.
pub const ERROR: &str = "error";

const APPROVAL_SUFFIX: &str = "/requestApproval";

/// Whether `method` names an approval request.
///
/// Matches the two known approval methods and any future
/// `…/requestApproval` method.
#[must_use]
pub fn is_approval_request(method: &str) -> bool {
    method == COMMAND_EXECUTION_APPROVAL
        || method == FILE_CHANGE_APPROVAL
        || method.ends_with(APPROVAL_SUFFIX)
}
