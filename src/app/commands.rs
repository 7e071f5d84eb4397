//! Control-channel commands.
//!
//! A control frame is `[opcode][argument ...]`.  The orchestrator decodes
//! it with [`ControlCommand::parse`] and acts on the result.

pub const OP_KEY_EXCHANGE: u8 = 0x01;
pub const OP_RESET: u8 = 0x02;
pub const OP_GET_STATUS: u8 = 0x03;
pub const OP_RECOVER: u8 = 0x04;
pub const OP_CLEAR_CREDENTIALS: u8 = 0x05;

/// Commands the companion app can send on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand<'a> {
    /// Start (or restart) the key exchange with the peer's SEC1 public key.
    /// Empty only at `SecurityLevel::None`.
    KeyExchange(&'a [u8]),

    /// Abort the session and return to `Idle`.
    Reset,

    /// Report the current state name.
    GetStatus,

    /// Leave `Error` for `Idle`.
    Recover,

    /// Erase stored network credentials.
    ClearCredentials,

    /// Unrecognised opcode; logged and ignored.
    Unknown(u8),
}

impl<'a> ControlCommand<'a> {
    /// Decode a control frame.  `None` for an empty frame.
    pub fn parse(frame: &'a [u8]) -> Option<Self> {
        let (&op, arg) = frame.split_first()?;
        Some(match op {
            OP_KEY_EXCHANGE => Self::KeyExchange(arg),
            OP_RESET => Self::Reset,
            OP_GET_STATUS => Self::GetStatus,
            OP_RECOVER => Self::Recover,
            OP_CLEAR_CREDENTIALS => Self::ClearCredentials,
            other => Self::Unknown(other),
        })
    }
}
