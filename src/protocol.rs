//! GATT UUIDs, timing defaults, and wire helpers for Frame glasses.
//!
//! All UUIDs belong to the Frame vendor namespace
//! `7a23XXXX-5475-a6a4-654c-8431f6ad49c4`.

use std::time::Duration;

use uuid::Uuid;

// ── Service ──────────────────────────────────────────────────────────────────

/// Primary GATT service UUID advertised by Frame.
///
/// Used as the scan filter; the first peripheral advertising it is the one
/// the session attaches to.
pub const FRAME_SERVICE_UUID: Uuid = Uuid::from_u128(0x7a230001_5475_a6a4_654c_8431f6ad49c4);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Host → device channel. Every write carries one complete Lua statement.
pub const TX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x7a230002_5475_a6a4_654c_8431f6ad49c4);

/// Device → host channel. Each notification is one response chunk, usually
/// the output of a single `print(...)` on the device.
pub const RX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x7a230003_5475_a6a4_654c_8431f6ad49c4);

// ── Timing and size defaults ──────────────────────────────────────────────────

/// Default bound on discovery + connect, in seconds.
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 30;

/// Default inactivity bound while collecting chunks for one request.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default spacing between two reads of the RX characteristic on the poll path.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of RX reads before a scalar query gives up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

/// Largest payload the device accepts in one transfer.
pub const DEFAULT_MAX_COMMAND_LEN: usize = 512;

// ── Commands and responses ────────────────────────────────────────────────────

/// Encode a Lua statement for the TX characteristic.
///
/// Frame takes the raw UTF-8 bytes: no length prefix, no terminator, no
/// checksum. Message boundaries are write boundaries.
///
/// ```
/// # use frame_rs::protocol::encode_command;
/// assert_eq!(encode_command("print(1)"), b"print(1)");
/// ```
pub fn encode_command(cmd: &str) -> Vec<u8> {
    cmd.as_bytes().to_vec()
}

/// Decode one RX chunk into text.
///
/// Invalid UTF-8 is replaced rather than rejected, because a chunk boundary
/// can split a multi-byte sequence.
pub fn decode_chunk(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Lua statement that prints the battery level in percent.
pub const BATTERY_LEVEL_QUERY: &str = "print(frame.battery_level())";

/// Lua statement that prints the firmware version string.
pub const FIRMWARE_VERSION_QUERY: &str = "print(frame.FIRMWARE_VERSION)";

/// Lua statement that prints the short git tag of the firmware build.
pub const GIT_TAG_QUERY: &str = "print(frame.GIT_TAG)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_match_the_vendor_namespace() {
        assert_eq!(
            FRAME_SERVICE_UUID.to_string(),
            "7a230001-5475-a6a4-654c-8431f6ad49c4"
        );
        assert_eq!(
            TX_CHARACTERISTIC.to_string(),
            "7a230002-5475-a6a4-654c-8431f6ad49c4"
        );
        assert_eq!(
            RX_CHARACTERISTIC.to_string(),
            "7a230003-5475-a6a4-654c-8431f6ad49c4"
        );
    }

    #[test]
    fn commands_are_sent_verbatim() {
        let cmd = "frame.display.text('héllo', 50, 100)";
        assert_eq!(encode_command(cmd), cmd.as_bytes());
        assert!(encode_command("").is_empty());
    }

    #[test]
    fn split_utf8_is_replaced_not_rejected() {
        // "é" is 0xC3 0xA9; a chunk ending after the first byte.
        assert_eq!(decode_chunk(&[b'a', 0xC3]), "a\u{FFFD}");
        assert_eq!(decode_chunk(b"87.5"), "87.5");
    }
}
