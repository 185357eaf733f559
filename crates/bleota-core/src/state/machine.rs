//! State machine implementation for the OTA protocol.

use std::fmt;

use crate::payload::Geometry;

/// Where a transfer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// Handshake sent, waiting for the device to pick a mode.
    AwaitingMode,
    /// Device asks for every block itself.
    SingleBlockMode,
    /// Host pushes all blocks back to back.
    MultiBlockMode,
    /// Device reported success.
    Completed,
    /// Device reported failure.
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Idle => write!(f, "IDLE"),
            TransferState::AwaitingMode => write!(f, "AWAITING_MODE"),
            TransferState::SingleBlockMode => write!(f, "SINGLE_BLOCK"),
            TransferState::MultiBlockMode => write!(f, "MULTI_BLOCK"),
            TransferState::Completed => write!(f, "COMPLETED"),
            TransferState::Failed => write!(f, "FAILED"),
        }
    }
}

impl TransferState {
    /// Check if a result has been received.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }

    /// Check if the device has picked a mode and the transfer is running.
    pub fn is_transferring(&self) -> bool {
        matches!(
            self,
            TransferState::SingleBlockMode | TransferState::MultiBlockMode
        )
    }
}

/// Decides whether a result text means success.
///
/// The device firmware defines the wording. A text is a success when one of
/// the markers appears in it as whole words, ignoring case, and the word
/// before it is not a negation ("not complete", "wasn't successful").
/// "Incomplete" and "unsuccessful" are different words and never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPolicy {
    /// Each marker split into lowercase words.
    success_markers: Vec<Vec<String>>,
}

/// Words that flip the meaning of the marker right after them. `t` is what
/// is left of "n't" after splitting.
const NEGATIONS: &[&str] = &["not", "no", "never", "t", "without"];

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl ResultPolicy {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            success_markers: markers
                .into_iter()
                .map(|m| words(&m.into()))
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn is_success(&self, text: &str) -> bool {
        let text = words(text);
        self.success_markers.iter().any(|marker| {
            text.windows(marker.len())
                .enumerate()
                .any(|(at, window)| {
                    window == marker.as_slice()
                        && !(at > 0 && NEGATIONS.contains(&text[at - 1].as_str()))
                })
        })
    }
}

impl Default for ResultPolicy {
    fn default() -> Self {
        Self::new(default_success_markers())
    }
}

pub fn default_success_markers() -> Vec<String> {
    ["complete", "completed", "success", "successful", "successfully"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Runtime state of one transfer. Holds no image bytes.
#[derive(Debug, Default)]
pub struct SessionContext {
    /// Number of blocks in the image (`N`).
    pub total_blocks: u16,
    /// Block and frame sizes.
    pub geometry: Geometry,
    /// Current transfer state.
    pub state: TransferState,
    /// Text of the device's result notification.
    pub last_result: Option<String>,
    /// How result texts are classified.
    pub policy: ResultPolicy,
}

impl SessionContext {
    pub fn new(total_blocks: u16, geometry: Geometry) -> Self {
        Self {
            total_blocks,
            geometry,
            ..Default::default()
        }
    }

    pub fn with_policy(mut self, policy: ResultPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: TransferState) {
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    /// Check if the session should keep processing notifications.
    pub fn should_continue(&self) -> bool {
        !self.state.is_terminal()
    }
}
