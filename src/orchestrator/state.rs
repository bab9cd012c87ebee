use serde::Serialize;

use crate::launcher::ServerInfo;

/// Stage of a session. Advances strictly in declaration order; `Error` can
/// be entered from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressState {
    Initializing,
    Cloning,
    Installing,
    StartingServer,
    Ready,
    Error,
}

impl ProgressState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressState::Ready | ProgressState::Error)
    }

    pub fn can_advance_to(self, next: ProgressState) -> bool {
        use ProgressState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Error) => true,
            (Initializing, Cloning)
            | (Cloning, Installing)
            | (Installing, StartingServer)
            | (StartingServer, Ready) => true,
            _ => false,
        }
    }

    /// Message shown while in this stage. `Error` carries its own message.
    pub fn status_text(self) -> &'static str {
        match self {
            ProgressState::Initializing => "Starting sandbox...",
            ProgressState::Cloning => "Cloning repository...",
            ProgressState::Installing => "Installing dependencies...",
            ProgressState::StartingServer => "Starting development server...",
            ProgressState::Ready => "Ready",
            ProgressState::Error => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: ProgressState,
    pub message: String,
    pub server: Option<ServerInfo>,
    pub error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: ProgressState::Initializing,
            message: ProgressState::Initializing.status_text().to_string(),
            server: None,
            error: None,
        }
    }
}
