//! The closed command vocabulary carried in byte 0 of every header.

use std::fmt;

use crate::channel::ChannelKind;
use crate::error::FrameError;

/// Every command byte the protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Reset = 0x00,
    Open = 0x01,
    Close = 0x02,
    Kill = 0x03,
    ExitStatus = 0x05,
    CloseAck = 0x06,

    WriteControl = 0x10,
    WriteStdin = 0x11,
    WriteStdout = 0x12,
    WriteStderr = 0x13,

    AckControl = 0x20,
    AckStdin = 0x21,
    AckStdout = 0x22,
    AckStderr = 0x23,

    CloseControl = 0x30,
    CloseStdin = 0x31,
    CloseStdout = 0x32,
    CloseStderr = 0x33,
}

/// Command families, used by the demultiplexer to route frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFamily {
    /// Process lifecycle: reset, open, close, kill, exit status, close ack.
    Lifecycle,
    /// Host-to-device data: control and stdin writes.
    HostWrite,
    /// Device-to-host data: stdout and stderr writes.
    DeviceWrite,
    /// Flow-control receipts.
    Ack,
    /// Per-channel end of stream.
    ChannelClose,
}

impl Command {
    /// All commands, in wire-value order.
    pub const ALL: [Command; 18] = [
        Command::Reset,
        Command::Open,
        Command::Close,
        Command::Kill,
        Command::ExitStatus,
        Command::CloseAck,
        Command::WriteControl,
        Command::WriteStdin,
        Command::WriteStdout,
        Command::WriteStderr,
        Command::AckControl,
        Command::AckStdin,
        Command::AckStdout,
        Command::AckStderr,
        Command::CloseControl,
        Command::CloseStdin,
        Command::CloseStdout,
        Command::CloseStderr,
    ];

    /// The wire value of this command.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn family(self) -> CommandFamily {
        match self {
            Command::Reset
            | Command::Open
            | Command::Close
            | Command::Kill
            | Command::ExitStatus
            | Command::CloseAck => CommandFamily::Lifecycle,
            Command::WriteControl | Command::WriteStdin => CommandFamily::HostWrite,
            Command::WriteStdout | Command::WriteStderr => CommandFamily::DeviceWrite,
            Command::AckControl | Command::AckStdin | Command::AckStdout | Command::AckStderr => {
                CommandFamily::Ack
            }
            Command::CloseControl
            | Command::CloseStdin
            | Command::CloseStdout
            | Command::CloseStderr => CommandFamily::ChannelClose,
        }
    }

    /// The channel a write, ack or channel-close command refers to.
    ///
    /// Lifecycle commands return `None`.
    pub fn channel(self) -> Option<ChannelKind> {
        if self.family() == CommandFamily::Lifecycle {
            return None;
        }
        // Low nibble of the non-lifecycle families is the channel index.
        ChannelKind::from_index(self.as_byte() & 0x0F)
    }

    /// Canonical upper-case name, as used in logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            Command::Reset => "RESET",
            Command::Open => "OPEN",
            Command::Close => "CLOSE",
            Command::Kill => "KILL",
            Command::ExitStatus => "EXIT_STATUS",
            Command::CloseAck => "CLOSE_ACK",
            Command::WriteControl => "WRITE_CONTROL",
            Command::WriteStdin => "WRITE_STDIN",
            Command::WriteStdout => "WRITE_STDOUT",
            Command::WriteStderr => "WRITE_STDERR",
            Command::AckControl => "ACK_CONTROL",
            Command::AckStdin => "ACK_STDIN",
            Command::AckStdout => "ACK_STDOUT",
            Command::AckStderr => "ACK_STDERR",
            Command::CloseControl => "CLOSE_CONTROL",
            Command::CloseStdin => "CLOSE_STDIN",
            Command::CloseStdout => "CLOSE_STDOUT",
            Command::CloseStderr => "CLOSE_STDERR",
        }
    }

    /// Look a command up by its canonical name (case-insensitive, `-` or `_`).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().replace('-', "_").to_ascii_uppercase();
        Self::ALL.into_iter().find(|c| c.name() == normalized)
    }
}

impl TryFrom<u8> for Command {
    type Error = FrameError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        let command = match byte {
            0x00 => Command::Reset,
            0x01 => Command::Open,
            0x02 => Command::Close,
            0x03 => Command::Kill,
            0x05 => Command::ExitStatus,
            0x06 => Command::CloseAck,
            0x10 => Command::WriteControl,
            0x11 => Command::WriteStdin,
            0x12 => Command::WriteStdout,
            0x13 => Command::WriteStderr,
            0x20 => Command::AckControl,
            0x21 => Command::AckStdin,
            0x22 => Command::AckStdout,
            0x23 => Command::AckStderr,
            0x30 => Command::CloseControl,
            0x31 => Command::CloseStdin,
            0x32 => Command::CloseStdout,
            0x33 => Command::CloseStderr,
            other => return Err(FrameError::UnknownCommand(other)),
        };
        Ok(command)
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command.as_byte()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
