use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr};

/// Derived state of an owned output
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
#[borsh(use_discriminant = true)]
pub enum OutputState {
    Unlocked = 0,
    Locked = 1,
    SoftLocked = 2,
    Spent = 3,
}

impl OutputState {
    pub fn flag(self) -> TransferFlags {
        match self {
            OutputState::Unlocked => TransferFlags::INCLUDE_STATE_UNLOCKED,
            OutputState::Locked => TransferFlags::INCLUDE_STATE_LOCKED,
            OutputState::SoftLocked => TransferFlags::INCLUDE_STATE_SOFT_LOCKED,
            OutputState::Spent => TransferFlags::INCLUDE_STATE_SPENT,
        }
    }
}

/// Output type tag
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum OutputType {
    Key,
    Multisignature,
}

impl OutputType {
    pub fn flag(self) -> TransferFlags {
        match self {
            OutputType::Key => TransferFlags::INCLUDE_TYPE_KEY,
            OutputType::Multisignature => TransferFlags::INCLUDE_TYPE_MULTISIGNATURE,
        }
    }
}

/// Query filter over output state and output type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferFlags(pub u32);

impl TransferFlags {
    pub const INCLUDE_STATE_UNLOCKED: TransferFlags = TransferFlags(0x01);
    pub const INCLUDE_STATE_LOCKED: TransferFlags = TransferFlags(0x02);
    pub const INCLUDE_STATE_SOFT_LOCKED: TransferFlags = TransferFlags(0x04);
    pub const INCLUDE_STATE_SPENT: TransferFlags = TransferFlags(0x08);

    pub const INCLUDE_TYPE_KEY: TransferFlags = TransferFlags(0x100);
    pub const INCLUDE_TYPE_MULTISIGNATURE: TransferFlags = TransferFlags(0x200);

    pub const INCLUDE_STATE_ALL: TransferFlags = TransferFlags(0xff);
    pub const INCLUDE_TYPE_ALL: TransferFlags = TransferFlags(0xff00);

    pub const INCLUDE_KEY_UNLOCKED: TransferFlags = TransferFlags(0x101);
    pub const INCLUDE_KEY_NOT_UNLOCKED: TransferFlags = TransferFlags(0x106);
    pub const INCLUDE_ALL_LOCKED: TransferFlags = TransferFlags(0xff06);
    pub const INCLUDE_ALL_UNLOCKED: TransferFlags = TransferFlags(0xff01);
    pub const INCLUDE_ALL: TransferFlags = TransferFlags(0xffff);

    pub const DEFAULT: TransferFlags = Self::INCLUDE_KEY_UNLOCKED;

    pub fn intersects(self, other: TransferFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether an output of `output_type` in `state` passes the filter
    pub fn matches(self, output_type: OutputType, state: OutputState) -> bool {
        self.intersects(output_type.flag()) && self.intersects(state.flag())
    }
}

impl Default for TransferFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr for TransferFlags {
    type Output = TransferFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        TransferFlags(self.0 | rhs.0)
    }
}

impl BitAnd for TransferFlags {
    type Output = TransferFlags;

    fn bitand(self, rhs: Self) -> Self::Output {
        TransferFlags(self.0 & rhs.0)
    }
}
