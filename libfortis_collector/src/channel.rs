use std::fmt::Display;

/// The three spectral orders of the instrument. Each order has its own TDC board and
/// therefore its own source address on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Zero,
    PlusOne,
    MinusOne,
}

impl Channel {
    /// All channels, in the order used to index per-channel arrays
    pub const ALL: [Channel; 3] = [Channel::Zero, Channel::PlusOne, Channel::MinusOne];

    pub const COUNT: usize = Self::ALL.len();

    /// Position of this channel in per-channel arrays
    pub fn index(&self) -> usize {
        match self {
            Channel::Zero => 0,
            Channel::PlusOne => 1,
            Channel::MinusOne => 2,
        }
    }

    /// Prefix used for the channel's event log file
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Channel::Zero => "Zero",
            Channel::PlusOne => "Pos1",
            Channel::MinusOne => "Neg1",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Zero => write!(f, "Zero Order"),
            Channel::PlusOne => write!(f, "+1 Order (270°)"),
            Channel::MinusOne => write!(f, "-1 Order (90°)"),
        }
    }
}
