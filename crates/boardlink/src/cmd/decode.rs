use std::fs;
use std::io::Read;

use boardlink_frame::FrameParser;
use tracing::{debug, warn};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{parse_hex, print_frames, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let raw = read_input(&args)?;
    let bytes = if args.hex {
        let text = String::from_utf8_lossy(&raw);
        parse_hex(&text)
            .map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex input: {err}")))?
    } else {
        raw
    };

    let mut parser = FrameParser::new();
    let mut frames = Vec::new();
    let parsed = parser.feed_with(&bytes, |frame| frames.push(frame));

    print_frames(&frames, format);
    debug!(frames = frames.len(), bytes = bytes.len(), "decoded capture");
    parsed.map_err(|err| frame_error("decode failed", err))?;

    if !parser.is_idle() {
        warn!(buffered = parser.buffered(), "capture ends inside a frame");
        return Err(CliError::new(
            DATA_INVALID,
            format!(
                "decode failed: input ends inside a frame ({} bytes buffered)",
                parser.buffered()
            ),
        ));
    }
    Ok(SUCCESS)
}

fn read_input(args: &DecodeArgs) -> CliResult<Vec<u8>> {
    match &args.file {
        Some(path) => fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err)),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .map_err(|err| io_error("failed reading stdin", err))?;
            Ok(buf)
        }
    }
}
