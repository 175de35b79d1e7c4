//! Per-task IPC flags
//!
//! The word a task carries to describe its current or intended IPC transfer.
//! It packs several sub-fields; each accessor masks and merges its own field
//! and leaves every other bit alone, including bits no field claims yet.
//!
//! ```text
//!  31    28 27               16 15   12 11        4 3    0
//! +--------+-------------------+-------+-----------+------+
//! | error  |   extended size   | rsvd  | msg index | type |
//! +--------+-------------------+-------+-----------+------+
//! ```

use crate::error::{TaskError, TaskResult};

const TYPE_MASK: u32 = 0x0000_000F;

const MSG_INDEX_MASK: u32 = 0x0000_0FF0;
const MSG_INDEX_SHIFT: u32 = 4;

const SIZE_MASK: u32 = 0x0FFF_0000;
const SIZE_SHIFT: u32 = 16;

const ERROR_MASK: u32 = 0xF000_0000;
const ERROR_SHIFT: u32 = 28;

/// Kind of IPC transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum IpcType {
    /// Only the primary message registers
    #[default]
    Short = 0,
    /// The whole UTCB register set
    Full = 1,
    /// A byte buffer beyond the registers
    Extended = 2,
}

impl IpcType {
    /// Decode a type code; codes without a variant are reserved
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::Short),
            1 => Some(Self::Full),
            2 => Some(Self::Extended),
            _ => None,
        }
    }
}

/// Packed IPC flag word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpcFlags(pub u32);

impl IpcFlags {
    pub const EMPTY: Self = Self(0);

    pub fn bits(self) -> u32 {
        self.0
    }

    fn merge(self, mask: u32, shift: u32, value: u32) -> Self {
        Self((self.0 & !mask) | ((value << shift) & mask))
    }

    fn field(self, mask: u32, shift: u32) -> u32 {
        (self.0 & mask) >> shift
    }

    /// Replace the type sub-field
    pub fn set_type(self, ty: IpcType) -> Self {
        self.merge(TYPE_MASK, 0, ty as u32)
    }

    /// Read the type sub-field
    pub fn get_type(self) -> TaskResult<IpcType> {
        IpcType::from_bits(self.field(TYPE_MASK, 0)).ok_or(TaskError::InvalidArgument)
    }

    /// Index of the message register the transfer starts at
    pub fn msg_index(self) -> u32 {
        self.field(MSG_INDEX_MASK, MSG_INDEX_SHIFT)
    }

    pub fn set_msg_index(self, index: u32) -> TaskResult<Self> {
        if index > MSG_INDEX_MASK >> MSG_INDEX_SHIFT {
            return Err(TaskError::OutOfRange);
        }
        Ok(self.merge(MSG_INDEX_MASK, MSG_INDEX_SHIFT, index))
    }

    /// Payload size of an extended transfer
    pub fn size(self) -> usize {
        self.field(SIZE_MASK, SIZE_SHIFT) as usize
    }

    pub fn set_size(self, size: usize) -> TaskResult<Self> {
        if size > (SIZE_MASK >> SIZE_SHIFT) as usize {
            return Err(TaskError::OutOfRange);
        }
        Ok(self.merge(SIZE_MASK, SIZE_SHIFT, size as u32))
    }

    /// Error code reported back to the IPC partner
    pub fn error(self) -> u32 {
        self.field(ERROR_MASK, ERROR_SHIFT)
    }

    pub fn set_error(self, code: u32) -> TaskResult<Self> {
        if code > ERROR_MASK >> ERROR_SHIFT {
            return Err(TaskError::OutOfRange);
        }
        Ok(self.merge(ERROR_MASK, ERROR_SHIFT, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TYPES: [IpcType; 3] = [IpcType::Short, IpcType::Full, IpcType::Extended];

    #[test]
    fn test_set_type_preserves_other_bits() {
        for flags in [0u32, 0xFFFF_FFFF, 0xDEAD_BEEF, 0x1234_5670, 0x8000_0001] {
            for ty in TYPES {
                let updated = IpcFlags(flags).set_type(ty);
                assert_eq!(updated.get_type(), Ok(ty));
                assert_eq!(updated.bits() & !TYPE_MASK, flags & !TYPE_MASK);
            }
        }
    }

    #[test]
    fn test_reserved_type_codes() {
        assert_eq!(IpcFlags(0x3).get_type(), Err(TaskError::InvalidArgument));
        assert_eq!(IpcFlags(0xF).get_type(), Err(TaskError::InvalidArgument));
        // Overwriting a reserved code yields a valid one
        assert_eq!(IpcFlags(0xF).set_type(IpcType::Full).get_type(), Ok(IpcType::Full));
    }

    #[test]
    fn test_sub_fields_independent() {
        let flags = IpcFlags::EMPTY
            .set_type(IpcType::Extended)
            .set_msg_index(9)
            .unwrap()
            .set_size(2048)
            .unwrap()
            .set_error(5)
            .unwrap();

        assert_eq!(flags.get_type(), Ok(IpcType::Extended));
        assert_eq!(flags.msg_index(), 9);
        assert_eq!(flags.size(), 2048);
        assert_eq!(flags.error(), 5);

        let flags = flags.set_size(12).unwrap();
        assert_eq!(flags.size(), 12);
        assert_eq!(flags.msg_index(), 9);
        assert_eq!(flags.error(), 5);
    }

    #[test]
    fn test_sub_field_limits() {
        assert_eq!(IpcFlags::EMPTY.set_msg_index(256), Err(TaskError::OutOfRange));
        assert_eq!(IpcFlags::EMPTY.set_size(4096), Err(TaskError::OutOfRange));
        assert_eq!(IpcFlags::EMPTY.set_error(16), Err(TaskError::OutOfRange));
        assert!(IpcFlags::EMPTY.set_size(4095).is_ok());
    }
}
