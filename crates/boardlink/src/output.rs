use std::fmt::Write as _;
use std::io::{IsTerminal, Write};

use boardlink_frame::Frame;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    command: &'a str,
    command_byte: u8,
    process_id: u8,
    arg: u8,
    length: usize,
    channel: Option<&'a str>,
    payload_hex: String,
    payload: String,
}

impl<'a> FrameOutput<'a> {
    fn new(frame: &'a Frame) -> Self {
        Self {
            command: frame.command.name(),
            command_byte: frame.command.as_byte(),
            process_id: frame.process_id,
            arg: frame.arg,
            length: frame.payload_len(),
            channel: frame.channel().map(|c| c.name()),
            payload_hex: to_hex(&frame.payload),
            payload: payload_preview(&frame.payload),
        }
    }
}

#[derive(Serialize)]
struct EncodedOutput {
    frames: usize,
    bytes: usize,
    hex: String,
}

/// Print decoded frames. JSON is one object per line.
pub fn print_frames(frames: &[Frame], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for frame in frames {
                println!(
                    "{}",
                    serde_json::to_string(&FrameOutput::new(frame))
                        .unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            if frames.is_empty() {
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "PID", "ARG", "LEN", "PAYLOAD"]);
            for frame in frames {
                table.add_row(vec![
                    frame.command.name().to_string(),
                    frame.process_id.to_string(),
                    frame.arg.to_string(),
                    frame.payload_len().to_string(),
                    payload_preview(&frame.payload),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for frame in frames {
                println!(
                    "{} pid={} arg={} len={} payload={}",
                    frame.command,
                    frame.process_id,
                    frame.arg,
                    frame.payload_len(),
                    payload_preview(&frame.payload)
                );
            }
        }
        OutputFormat::Raw => {
            for frame in frames {
                print_raw(&frame.payload);
            }
        }
    }
}

/// Print encoded wire bytes.
pub fn print_encoded(wire: &[u8], frames: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EncodedOutput {
                frames,
                bytes: wire.len(),
                hex: to_hex(wire),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FRAMES", "BYTES", "HEX"])
                .add_row(vec![frames.to_string(), wire.len().to_string(), to_hex(wire)]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", to_hex(wire)),
        OutputFormat::Raw => print_raw(wire),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn to_hex(data: &[u8]) -> String {
    let mut hex = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Parse hex text. Whitespace, commas and `0x` prefixes are ignored.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: String = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| {
            token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token)
        })
        .collect();

    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", digits.len()));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| -> Result<u8, String> {
            let pair = digits.get(i..i + 2).ok_or("non-ASCII input")?;
            u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex byte {pair:?}"))
        })
        .collect()
}

fn payload_preview(payload: &[u8]) -> String {
    if payload.is_empty() {
        return String::new();
    }
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
