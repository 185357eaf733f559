//! Notification handlers - dispatch logic for each inbound opcode.
//!
//! Handlers never touch the link. They update the [`SessionContext`] and
//! return the actions the session must perform, in order.

use tracing::{debug, info, warn};

use crate::protocol::{MODE_MULTI_BLOCK, Notification, ProtocolError};
use crate::state::machine::{SessionContext, TransferState};

/// Final outcome reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success(String),
    Failure(String),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success(_))
    }

    pub fn message(&self) -> &str {
        match self {
            TransferOutcome::Success(m) | TransferOutcome::Failure(m) => m,
        }
    }
}

/// Something the session has to do after a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The device chose a mode.
    ModeSelected { multi_block: bool },
    /// Write all frames of a block followed by its marker.
    SendBlock(u16),
    /// Report `completed` of `total` blocks.
    Progress { completed: u32, total: u32 },
    /// The device is installing; informational only.
    Installing,
    /// The transfer is over.
    Finished(TransferOutcome),
}

/// Result of handling a notification.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HandleResult {
    pub actions: Vec<Action>,
}

impl HandleResult {
    fn none() -> Self {
        Self::default()
    }

    fn with(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// The outcome, if this notification ended the transfer.
    pub fn outcome(&self) -> Option<&TransferOutcome> {
        self.actions.iter().find_map(|a| match a {
            Action::Finished(outcome) => Some(outcome),
            _ => None,
        })
    }
}

/// Parse a raw notification and handle it.
///
/// Malformed notifications are logged and ignored.
pub fn on_frame(bytes: &[u8], ctx: &mut SessionContext) -> Result<HandleResult, ProtocolError> {
    match Notification::parse(bytes) {
        Ok(notification) => handle_notification(&notification, ctx),
        Err(e) => {
            warn!(error = %e, "Ignoring malformed notification");
            Ok(HandleResult::none())
        }
    }
}

/// Handle a notification and work out what to send.
pub fn handle_notification(
    notification: &Notification,
    ctx: &mut SessionContext,
) -> Result<HandleResult, ProtocolError> {
    if ctx.state.is_terminal() {
        debug!(?notification, "Transfer finished, ignoring notification");
        return Ok(HandleResult::none());
    }

    match notification {
        Notification::Mode(mode) => handle_mode(*mode, ctx),
        Notification::BlockRequest(index) => handle_block_request(*index, ctx),
        Notification::Installing => handle_installing(ctx),
        Notification::Result(text) => handle_result(text, ctx),
        Notification::Unknown { opcode, .. } => {
            debug!(opcode = %format!("0x{:02X}", opcode), "Unhandled notification");
            Ok(HandleResult::none())
        }
    }
}

/// 0xAA - Transfer mode.
fn handle_mode(mode: u8, ctx: &mut SessionContext) -> Result<HandleResult, ProtocolError> {
    if ctx.state.is_transferring() {
        warn!(mode, state = %ctx.state, "Mode already selected, ignoring");
        return Ok(HandleResult::none());
    }

    let total = ctx.total_blocks;
    if mode == MODE_MULTI_BLOCK {
        info!(mode, blocks = total, "Multi-block transfer");
        ctx.goto_state(TransferState::MultiBlockMode);

        let mut actions = Vec::with_capacity(1 + 2 * total as usize);
        actions.push(Action::ModeSelected { multi_block: true });
        for index in 0..total {
            actions.push(Action::SendBlock(index));
            actions.push(Action::Progress {
                completed: u32::from(index) + 1,
                total: u32::from(total),
            });
        }
        Ok(HandleResult::with(actions))
    } else {
        info!(mode, "Single-block transfer");
        ctx.goto_state(TransferState::SingleBlockMode);
        Ok(HandleResult::with(vec![
            Action::ModeSelected { multi_block: false },
            Action::SendBlock(0),
        ]))
    }
}

/// 0xF1 - Block request. Any index, any order, repeats allowed.
fn handle_block_request(
    index: u16,
    ctx: &mut SessionContext,
) -> Result<HandleResult, ProtocolError> {
    if index >= ctx.total_blocks {
        return Err(ProtocolError::BlockOutOfRange {
            index,
            total: ctx.total_blocks,
        });
    }
    if ctx.state == TransferState::AwaitingMode {
        debug!(block = index, "Block requested before mode announcement");
    }

    debug!(block = index, "Block requested");
    Ok(HandleResult::with(vec![
        Action::SendBlock(index),
        Action::Progress {
            completed: u32::from(index) + 1,
            total: u32::from(ctx.total_blocks),
        },
    ]))
}

/// 0xF2 - Installing.
fn handle_installing(_ctx: &mut SessionContext) -> Result<HandleResult, ProtocolError> {
    info!("Device installing firmware");
    Ok(HandleResult::with(vec![Action::Installing]))
}

/// 0x0F - Result.
fn handle_result(text: &str, ctx: &mut SessionContext) -> Result<HandleResult, ProtocolError> {
    let outcome = if ctx.policy.is_success(text) {
        ctx.goto_state(TransferState::Completed);
        TransferOutcome::Success(text.to_string())
    } else {
        ctx.goto_state(TransferState::Failed);
        TransferOutcome::Failure(text.to_string())
    };
    info!(result = %text, "OTA result");
    ctx.last_result = Some(text.to_string());
    Ok(HandleResult::with(vec![Action::Finished(outcome)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Geometry;

    fn ctx(blocks: u16) -> SessionContext {
        let mut ctx = SessionContext::new(blocks, Geometry::DEFAULT);
        ctx.goto_state(TransferState::AwaitingMode);
        ctx
    }

    fn sent_blocks(result: &HandleResult) -> Vec<u16> {
        result
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::SendBlock(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_multi_block_mode_sends_all_in_order() {
        let mut ctx = ctx(3);
        let result = on_frame(&[0xAA, 0x01], &mut ctx).unwrap();

        assert_eq!(ctx.state, TransferState::MultiBlockMode);
        assert_eq!(
            result.actions,
            vec![
                Action::ModeSelected { multi_block: true },
                Action::SendBlock(0),
                Action::Progress { completed: 1, total: 3 },
                Action::SendBlock(1),
                Action::Progress { completed: 2, total: 3 },
                Action::SendBlock(2),
                Action::Progress { completed: 3, total: 3 },
            ]
        );
    }

    #[test]
    fn test_single_block_mode_sends_first_block() {
        for mode in [0x00, 0x02, 0xFF] {
            let mut ctx = ctx(5);
            let result = on_frame(&[0xAA, mode], &mut ctx).unwrap();
            assert_eq!(ctx.state, TransferState::SingleBlockMode);
            assert_eq!(sent_blocks(&result), vec![0]);
        }
    }

    #[test]
    fn test_block_request_sends_exactly_that_block() {
        let mut ctx = ctx(4);
        on_frame(&[0xAA, 0x00], &mut ctx).unwrap();

        let result = on_frame(&[0xF1, 0x00, 0x02], &mut ctx).unwrap();
        assert_eq!(
            result.actions,
            vec![
                Action::SendBlock(2),
                Action::Progress { completed: 3, total: 4 }
            ]
        );
        // Repeats and going backwards are fine, the mode does not change.
        let again = on_frame(&[0xF1, 0x00, 0x00], &mut ctx).unwrap();
        assert_eq!(sent_blocks(&again), vec![0]);
        assert_eq!(ctx.state, TransferState::SingleBlockMode);
    }

    #[test]
    fn test_block_request_in_multi_block_mode() {
        let mut ctx = ctx(3);
        on_frame(&[0xAA, 0x01], &mut ctx).unwrap();
        let result = on_frame(&[0xF1, 0x00, 0x01], &mut ctx).unwrap();
        assert_eq!(sent_blocks(&result), vec![1]);
        assert_eq!(ctx.state, TransferState::MultiBlockMode);
    }

    #[test]
    fn test_block_request_out_of_range_fails() {
        let mut ctx = ctx(3);
        on_frame(&[0xAA, 0x00], &mut ctx).unwrap();
        assert_eq!(
            on_frame(&[0xF1, 0x00, 0x03], &mut ctx),
            Err(ProtocolError::BlockOutOfRange { index: 3, total: 3 })
        );
    }

    #[test]
    fn test_installing_is_noop() {
        let mut ctx = ctx(3);
        on_frame(&[0xAA, 0x00], &mut ctx).unwrap();
        let result = on_frame(&[0xF2], &mut ctx).unwrap();
        assert_eq!(result.actions, vec![Action::Installing]);
        assert!(sent_blocks(&result).is_empty());
        assert_eq!(ctx.state, TransferState::SingleBlockMode);
    }

    #[test]
    fn test_result_success_and_failure() {
        let mut ok = ctx(1);
        let mut bytes = vec![0x0F];
        bytes.extend_from_slice(b"OTA Complete");
        let result = on_frame(&bytes, &mut ok).unwrap();
        assert_eq!(ok.state, TransferState::Completed);
        assert_eq!(ok.last_result.as_deref(), Some("OTA Complete"));
        assert_eq!(
            result.outcome(),
            Some(&TransferOutcome::Success("OTA Complete".into()))
        );

        let mut bad = ctx(1);
        let mut bytes = vec![0x0F];
        bytes.extend_from_slice(b"Error #: 6");
        let result = on_frame(&bytes, &mut bad).unwrap();
        assert_eq!(bad.state, TransferState::Failed);
        assert!(!result.outcome().unwrap().is_success());
    }

    #[test]
    fn test_nothing_served_after_result() {
        let mut ctx = ctx(3);
        on_frame(&[0xAA, 0x00], &mut ctx).unwrap();
        on_frame(b"\x0FOTA Complete", &mut ctx).unwrap();

        let result = on_frame(&[0xF1, 0x00, 0x01], &mut ctx).unwrap();
        assert!(result.actions.is_empty());
        assert_eq!(ctx.state, TransferState::Completed);
    }

    #[test]
    fn test_repeated_mode_is_ignored() {
        let mut ctx = ctx(3);
        on_frame(&[0xAA, 0x00], &mut ctx).unwrap();
        let result = on_frame(&[0xAA, 0x01], &mut ctx).unwrap();
        assert!(result.actions.is_empty());
        assert_eq!(ctx.state, TransferState::SingleBlockMode);
    }

    #[test]
    fn test_unknown_and_malformed_ignored() {
        let mut ctx = ctx(3);
        for frame in [&[0x42, 0x01][..], &[], &[0xAA], &[0xF1, 0x01]] {
            let result = on_frame(frame, &mut ctx).unwrap();
            assert!(result.actions.is_empty());
        }
        assert_eq!(ctx.state, TransferState::AwaitingMode);
    }
}
