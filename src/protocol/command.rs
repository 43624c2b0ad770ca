//! Command encoder: symbolic panel operations to the status byte sent back
//! to the master controller.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{MasterStatus, ProtocolError, HEADER_BITS};

/// Operator commands accepted by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    SystemReset,
    Acknowledge,
    Drill,
    Silence,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::SystemReset,
        Operation::Acknowledge,
        Operation::Drill,
        Operation::Silence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::SystemReset => "SYSTEM_RESET",
            Operation::Acknowledge => "ACKNOWLEDGE",
            Operation::Drill => "DRILL",
            Operation::Silence => "SILENCE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "SYSTEM_RESET" | "RESET" => Ok(Operation::SystemReset),
            "ACKNOWLEDGE" | "ACK" => Ok(Operation::Acknowledge),
            "DRILL" => Ok(Operation::Drill),
            // Older panel firmware names this SILENCED.
            "SILENCE" | "SILENCED" => Ok(Operation::Silence),
            _ => Err(ProtocolError::InvalidOperation(s.to_string())),
        }
    }
}

/// Result of encoding one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedCommand {
    pub operation: Operation,
    /// Two uppercase hex digits.
    pub status_byte: String,
    pub new_status: MasterStatus,
}

impl EncodedCommand {
    pub fn byte(&self) -> u8 {
        // status_byte is always produced by format!("{:02X}")
        u8::from_str_radix(&self.status_byte, 16).unwrap_or(HEADER_BITS)
    }
}

/// Apply `op` to the current master status.
pub fn apply_operation(op: Operation, current: &MasterStatus) -> MasterStatus {
    let mut next = *current;
    match op {
        Operation::SystemReset => next = MasterStatus::all_clear(),
        Operation::Acknowledge => {
            next.alarm_active = false;
            next.silenced = true;
        }
        Operation::Drill => next.supervisory = !next.supervisory,
        Operation::Silence => next.silenced = !next.silenced,
    }
    next
}

/// Re-encode a master status: header bits plus one set bit per inactive field.
pub fn encode_status_byte(status: &MasterStatus) -> u8 {
    HEADER_BITS | status.to_bits().bits()
}

pub fn encode_command(op: Operation, current: &MasterStatus) -> EncodedCommand {
    let new_status = apply_operation(op, current);
    EncodedCommand {
        operation: op,
        status_byte: format!("{:02X}", encode_status_byte(&new_status)),
        new_status,
    }
}

/// Parse the operation name, then encode.
pub fn encode_command_str(op: &str, current: &MasterStatus) -> Result<EncodedCommand, ProtocolError> {
    let op: Operation = op.parse()?;
    Ok(encode_command(op, current))
}

/// Parse a status byte given as two hex digits (optionally `0x`-prefixed).
pub fn parse_status_byte(text: &str) -> Result<u8, ProtocolError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidStatusByte(text.to_string()));
    }
    u8::from_str_radix(digits, 16).map_err(|_| ProtocolError::InvalidStatusByte(text.to_string()))
}

/// Replace the status byte (characters 2-3) of a raw frame.
///
/// A missing frame is treated as the idle frame `40FF`.
pub fn splice_status_byte(raw: Option<&str>, status_byte: &str) -> String {
    let raw = raw.unwrap_or("40FF");
    let header: String = raw.chars().take(2).collect();
    let tail: String = raw.chars().skip(4).collect();
    format!("{}{}{}", header, status_byte, tail)
}

/// Delivery state of a command handed to a command sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandState {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A command as handed to a command sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: Uuid,
    pub operation: Operation,
    pub status_byte: String,
    pub new_status: MasterStatus,
    pub timestamp: DateTime<Utc>,
    pub state: CommandState,
}

impl CommandRecord {
    pub fn pending(cmd: &EncodedCommand) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: cmd.operation,
            status_byte: cmd.status_byte.clone(),
            new_status: cmd.new_status,
            timestamp: Utc::now(),
            state: CommandState::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_reset_ignores_current() {
        let busy = MasterStatus {
            alarm_active: true,
            trouble_active: true,
            supervisory: true,
            silenced: true,
            disabled: true,
            ..MasterStatus::default()
        };
        let cmd = encode_command(Operation::SystemReset, &busy);
        assert_eq!(cmd.new_status, MasterStatus::all_clear());
        // 1001 1111 | 0100 0000
        assert_eq!(cmd.status_byte, "DF");
        assert_eq!(cmd.byte(), 0xDF);
    }

    #[test]
    fn acknowledge_clears_alarm_and_silences() {
        let current = MasterStatus {
            alarm_active: true,
            trouble_active: true,
            dc_power: true,
            ..MasterStatus::default()
        };
        let cmd = encode_command(Operation::Acknowledge, &current);
        assert!(!cmd.new_status.alarm_active);
        assert!(cmd.new_status.silenced);
        assert!(cmd.new_status.trouble_active);
        assert!(cmd.new_status.dc_power);
    }

    #[test]
    fn drill_and_silence_toggle() {
        let current = MasterStatus::all_clear();
        let drill = encode_command(Operation::Drill, &current);
        assert!(drill.new_status.supervisory);
        let back = encode_command(Operation::Drill, &drill.new_status);
        assert!(!back.new_status.supervisory);

        let silence = encode_command(Operation::Silence, &current);
        assert!(silence.new_status.silenced);
        assert_eq!(silence.status_byte, "DD");
    }

    #[test]
    fn status_bits_round_trip_every_byte() {
        for byte in 0..=255u8 {
            let status = MasterStatus::from_byte(byte);
            assert_eq!(status.to_bits().bits(), byte, "byte {:02X}", byte);
        }
    }

    #[test]
    fn encoded_byte_always_has_header_bits() {
        for byte in 0..=255u8 {
            let status = MasterStatus::from_byte(byte);
            assert_eq!(encode_status_byte(&status), byte | HEADER_BITS);
        }
    }

    #[test]
    fn operation_names() {
        assert_eq!("SYSTEM_RESET".parse::<Operation>(), Ok(Operation::SystemReset));
        assert_eq!("ack".parse::<Operation>(), Ok(Operation::Acknowledge));
        assert_eq!("SILENCED".parse::<Operation>(), Ok(Operation::Silence));
        assert_eq!("system-reset".parse::<Operation>(), Ok(Operation::SystemReset));
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>(), Ok(op));
        }
    }

    #[test]
    fn unknown_operation_is_error() {
        let err = encode_command_str("EVACUATE", &MasterStatus::default()).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidOperation("EVACUATE".to_string()));
    }

    #[test]
    fn status_byte_parsing() {
        assert_eq!(parse_status_byte("5F"), Ok(0x5F));
        assert_eq!(parse_status_byte("0x5f"), Ok(0x5F));
        assert!(parse_status_byte("5").is_err());
        assert!(parse_status_byte("+5").is_err());
        assert!(parse_status_byte("5FF").is_err());
    }

    #[test]
    fn splice_replaces_status_only() {
        assert_eq!(
            splice_status_byte(Some("405F<STX>010000<ETX>"), "DF"),
            "40DF<STX>010000<ETX>"
        );
        assert_eq!(splice_status_byte(None, "DD"), "40DD");
        assert_eq!(splice_status_byte(Some("4"), "DD"), "4DD");
    }

    #[test]
    fn pending_record_copies_command() {
        let cmd = encode_command(Operation::Drill, &MasterStatus::all_clear());
        let rec = CommandRecord::pending(&cmd);
        assert_eq!(rec.state, CommandState::Pending);
        assert_eq!(rec.status_byte, cmd.status_byte);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"operation\":\"DRILL\""));
        assert!(json.contains("\"state\":\"pending\""));
    }
}
