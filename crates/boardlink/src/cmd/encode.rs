use boardlink_frame::{encode_frame, Command, CommandFamily, FrameError, MAX_PAYLOAD};
use bytes::BytesMut;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_encoded, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let command = parse_command(&args.command)?;
    let process_id = u8::try_from(args.pid)
        .map_err(|_| frame_error("encode failed", FrameError::InvalidProcessId(args.pid)))?;
    let payload = args.data.unwrap_or_default().into_bytes();

    let (wire, frames) = encode(command, process_id, args.arg, &payload)
        .map_err(|err| frame_error("encode failed", err))?;
    print_encoded(&wire, frames, format);
    Ok(SUCCESS)
}

/// Encode one frame, or a run of frames for writes longer than one payload.
fn encode(
    command: Command,
    process_id: u8,
    arg: u8,
    payload: &[u8],
) -> Result<(BytesMut, usize), FrameError> {
    let mut wire = BytesMut::new();
    let is_write = matches!(
        command.family(),
        CommandFamily::HostWrite | CommandFamily::DeviceWrite
    );
    if !is_write || payload.len() <= MAX_PAYLOAD {
        encode_frame(command, process_id, arg, payload, &mut wire)?;
        return Ok((wire, 1));
    }

    let mut frames = 0;
    for chunk in payload.chunks(MAX_PAYLOAD) {
        encode_frame(command, process_id, arg, chunk, &mut wire)?;
        frames += 1;
    }
    Ok((wire, frames))
}

fn parse_command(input: &str) -> CliResult<Command> {
    if let Some(command) = Command::from_name(input) {
        return Ok(command);
    }
    let hex = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"));
    let byte = match hex {
        Some(digits) => u8::from_str_radix(digits, 16).ok(),
        None => input.parse::<u8>().ok(),
    };
    byte.and_then(|b| Command::try_from(b).ok())
        .ok_or_else(|| CliError::new(USAGE, format!("unknown command: {input}")))
}
