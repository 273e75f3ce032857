use num_enum::{IntoPrimitive, TryFromPrimitive};

/// CD1.1 frame type discriminators as they appear in the first header field. `Reset` is not part of
///  the original protocol but a custom extension that data providers use to announce restarted
///  sequence numbering.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum FrameType {
    ConnectionRequest = 1,
    ConnectionResponse = 2,
    OptionRequest = 3,
    OptionResponse = 4,
    Data = 5,
    Acknack = 6,
    Alert = 7,
    CommandResponse = 9,
    CdOneEncapsulation = 13,
    Reset = 26,
}
