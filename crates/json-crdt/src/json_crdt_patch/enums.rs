//! Reserved session ids and wire opcodes.

/// Reserved session ids. User sessions start at [`session::MIN_USER`].
pub mod session {
    /// Built-in constants and the document root anchor.
    pub const SYSTEM: u64 = 0;
    /// The only session a server clock writes as.
    pub const SERVER: u64 = 1;
    /// Schema patches applied identically on every replica.
    pub const GLOBAL: u64 = 2;
    /// Patches that never leave the local replica.
    pub const LOCAL: u64 = 3;
    /// Lowest session id handed out to random replicas.
    pub const MIN_USER: u64 = 0x10000;
    /// Largest 53-bit session id.
    pub const MAX: u64 = (1 << 53) - 1;
}

/// Reserved times in the [`session::SYSTEM`] session.
pub mod system_time {
    pub const ORIGIN: u64 = 0;
    pub const UNDEFINED: u64 = 1;
}

/// Five-bit operation code. The binary codec writes it shifted left by three,
/// leaving the low bits for a short inline length.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonCrdtPatchOpcode {
    NewCon = 0,
    NewVal = 1,
    NewObj = 2,
    NewVec = 3,
    NewStr = 4,
    NewBin = 5,
    NewArr = 6,
    InsVal = 9,
    InsObj = 10,
    InsVec = 11,
    InsStr = 12,
    InsBin = 13,
    InsArr = 14,
    UpdArr = 15,
    Del = 16,
    Nop = 17,
}

impl JsonCrdtPatchOpcode {
    /// The opcode byte with an empty inline length.
    pub const fn overlay(self) -> u8 {
        (self as u8) << 3
    }
}

impl TryFrom<u8> for JsonCrdtPatchOpcode {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        use JsonCrdtPatchOpcode::*;
        Ok(match v {
            0 => NewCon,
            1 => NewVal,
            2 => NewObj,
            3 => NewVec,
            4 => NewStr,
            5 => NewBin,
            6 => NewArr,
            9 => InsVal,
            10 => InsObj,
            11 => InsVec,
            12 => InsStr,
            13 => InsBin,
            14 => InsArr,
            15 => UpdArr,
            16 => Del,
            17 => Nop,
            other => return Err(other),
        })
    }
}
