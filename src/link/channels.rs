//! Logical GATT channels of the provisioning service.
//!
//! | Channel     | UUID                                   | Direction        |
//! |-------------|----------------------------------------|------------------|
//! | Service     | `6e400001-b5a3-f393-e0a9-e50e24dcca9e` |                  |
//! | Credentials | `6e400002-b5a3-f393-e0a9-e50e24dcca9e` | Write            |
//! | Status      | `6e400003-b5a3-f393-e0a9-e50e24dcca9e` | Notify           |
//! | Control     | `6e400004-b5a3-f393-e0a9-e50e24dcca9e` | Write            |
//! | Data        | `6e400005-b5a3-f393-e0a9-e50e24dcca9e` | Write + Notify   |

pub const SERVICE_UUID: u128 = 0x6e400001_b5a3_f393_e0a9_e50e24dcca9e;
pub const CHAR_CREDENTIALS: u128 = 0x6e400002_b5a3_f393_e0a9_e50e24dcca9e;
pub const CHAR_STATUS: u128 = 0x6e400003_b5a3_f393_e0a9_e50e24dcca9e;
pub const CHAR_CONTROL: u128 = 0x6e400004_b5a3_f393_e0a9_e50e24dcca9e;
pub const CHAR_DATA: u128 = 0x6e400005_b5a3_f393_e0a9_e50e24dcca9e;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelId {
    Credentials = 0,
    Status = 1,
    Control = 2,
    Data = 3,
}

impl ChannelId {
    pub const COUNT: usize = 4;

    pub const fn uuid(self) -> u128 {
        match self {
            Self::Credentials => CHAR_CREDENTIALS,
            Self::Status => CHAR_STATUS,
            Self::Control => CHAR_CONTROL,
            Self::Data => CHAR_DATA,
        }
    }

    pub fn from_uuid(uuid: u128) -> Option<Self> {
        match uuid {
            CHAR_CREDENTIALS => Some(Self::Credentials),
            CHAR_STATUS => Some(Self::Status),
            CHAR_CONTROL => Some(Self::Control),
            CHAR_DATA => Some(Self::Data),
            _ => None,
        }
    }

    /// Channels the peer may write to.
    pub const fn is_inbound(self) -> bool {
        !matches!(self, Self::Status)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::Status => "status",
            Self::Control => "control",
            Self::Data => "data",
        }
    }
}

impl core::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
