//! The four logical channels every remote process owns.

use std::fmt;

use crate::command::Command;

/// A logical stream of one remote process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Host-to-device command channel (the command line to run).
    Control,
    /// Host-to-device standard input.
    Stdin,
    /// Device-to-host standard output.
    Stdout,
    /// Device-to-host standard error.
    Stderr,
}

/// What a caller may do with a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub readable: bool,
    pub writable: bool,
    pub closeable: bool,
}

impl ChannelKind {
    /// All channels, in wire index order.
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Control,
        ChannelKind::Stdin,
        ChannelKind::Stdout,
        ChannelKind::Stderr,
    ];

    /// Index used in the low nibble of write/ack/close commands.
    pub fn index(self) -> usize {
        match self {
            ChannelKind::Control => 0,
            ChannelKind::Stdin => 1,
            ChannelKind::Stdout => 2,
            ChannelKind::Stderr => 3,
        }
    }

    pub(crate) fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    pub fn write_command(self) -> Command {
        match self {
            ChannelKind::Control => Command::WriteControl,
            ChannelKind::Stdin => Command::WriteStdin,
            ChannelKind::Stdout => Command::WriteStdout,
            ChannelKind::Stderr => Command::WriteStderr,
        }
    }

    pub fn ack_command(self) -> Command {
        match self {
            ChannelKind::Control => Command::AckControl,
            ChannelKind::Stdin => Command::AckStdin,
            ChannelKind::Stdout => Command::AckStdout,
            ChannelKind::Stderr => Command::AckStderr,
        }
    }

    pub fn close_command(self) -> Command {
        match self {
            ChannelKind::Control => Command::CloseControl,
            ChannelKind::Stdin => Command::CloseStdin,
            ChannelKind::Stdout => Command::CloseStdout,
            ChannelKind::Stderr => Command::CloseStderr,
        }
    }

    /// Returns true if the host sends data on this channel.
    pub fn is_outbound(self) -> bool {
        matches!(self, ChannelKind::Control | ChannelKind::Stdin)
    }

    pub fn capabilities(self) -> Capabilities {
        Capabilities {
            readable: !self.is_outbound(),
            writable: self.is_outbound(),
            closeable: true,
        }
    }

    /// Returns a human-readable name for the channel.
    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Control => "CONTROL",
            ChannelKind::Stdin => "STDIN",
            ChannelKind::Stdout => "STDOUT",
            ChannelKind::Stderr => "STDERR",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
