//! Protocol constants for the ESP32 BLE OTA protocol.
//!
//! Derived from the device-side `ESP32_BLE_OTA_Arduino` firmware.

use uuid::Uuid;

// ============================================================================
// GATT Layout
// ============================================================================

/// OTA service exposed by the device.
pub const OTA_SERVICE_UUID: Uuid = Uuid::from_u128(0xfb1e4001_54ae_4a28_9f74_dfccb248601d);

/// Host -> device characteristic (written by us).
pub const OTA_RX_CHAR_UUID: Uuid = Uuid::from_u128(0xfb1e4002_54ae_4a28_9f74_dfccb248601d);

/// Device -> host characteristic (notifications).
pub const OTA_TX_CHAR_UUID: Uuid = Uuid::from_u128(0xfb1e4003_54ae_4a28_9f74_dfccb248601d);

// ============================================================================
// Size Constants
// ============================================================================

/// Logical block size in bytes.
pub const PART: usize = 16000;

/// Frame payload size in bytes.
pub const MTU: usize = 500;

/// A frame index is a single byte.
pub const MAX_FRAMES_PER_BLOCK: usize = 256;

// ============================================================================
// Outbound Opcodes (Host -> Device)
// ============================================================================

/// Data frame: `0xFB <frame:1B> <payload>`
pub const OP_DATA: u8 = 0xFB;

/// Block complete marker: `0xFC <len:2B BE> <block:2B BE>`
pub const OP_COMPLETE: u8 = 0xFC;

/// Reset / start of transfer
pub const OP_RESET: u8 = 0xFD;

/// Total image size: `0xFE <len:4B BE>`
pub const OP_SIZE: u8 = 0xFE;

/// Transfer parameters: `0xFF <blocks:2B BE> <mtu:2B BE>`
pub const OP_INFO: u8 = 0xFF;

// ============================================================================
// Inbound Opcodes (Device -> Host)
// ============================================================================

/// Transfer mode announcement: `0xAA <mode:1B>`
pub const OP_MODE: u8 = 0xAA;

/// Block request: `0xF1 <block:2B BE>`
pub const OP_BLOCK_REQUEST: u8 = 0xF1;

/// Device is installing the received image
pub const OP_INSTALLING: u8 = 0xF2;

/// Terminal result: `0x0F <utf8 text>`
pub const OP_RESULT: u8 = 0x0F;

/// Mode value selecting multi-block (fast) transfer.
pub const MODE_MULTI_BLOCK: u8 = 1;

// ============================================================================
// Timing
// ============================================================================

/// Default time allowed for discovering the device.
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 20;

/// Default pause between subscribing and the first handshake write.
pub const DEFAULT_SETTLE_MS: u64 = 1000;

/// Default bound on the wait for each device notification.
pub const DEFAULT_NOTIFICATION_TIMEOUT_SECS: u64 = 120;

/// Default bound on the wait for the device to drop the link after a result.
pub const DEFAULT_DISCONNECT_TIMEOUT_SECS: u64 = 30;

/// How long notifications still in flight are collected after the link
/// drops.
pub const DISCONNECT_GRACE_MS: u64 = 500;
