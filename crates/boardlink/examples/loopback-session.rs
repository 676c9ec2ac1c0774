//! Run one remote process against a simulated board over an in-memory pipe.
//!
//! Run with: cargo run -p boardlink --example loopback-session

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use boardlink::frame::{codec, ChannelKind, Command, FrameParser};
use boardlink::mux::{Connection, MuxError, ProcessEvent};
use boardlink::transport::{memory_pair, MemoryStream, TransportStream};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host, device) = memory_pair();
    let board = thread::spawn(move || simulate_board(device));

    let conn = Connection::new(TransportStream::from_memory(host))?;
    let id = conn.open_process()?;
    conn.write(id, ChannelKind::Control, b"uname -a")?;
    conn.close_channel(id, ChannelKind::Control)?;
    conn.close_channel(id, ChannelKind::Stdin)?;

    let mut output = Vec::new();
    let mut buf = [0u8; 256];
    let mut exit_code = None;
    while let Some(event) = conn.next_event(Duration::from_secs(5))? {
        match event.event {
            // The process may already be torn down; its output then
            // arrives as `Unread`.
            ProcessEvent::Data { channel, .. } => loop {
                let n = match conn.read(id, channel, &mut buf) {
                    Ok(0) | Err(MuxError::NoSuchProcess(_)) => break,
                    Ok(n) => n,
                    Err(err) => return Err(err.into()),
                };
                output.extend_from_slice(&buf[..n]);
            },
            ProcessEvent::Unread { data, .. } => output.extend_from_slice(&data),
            ProcessEvent::Exited { code } => exit_code = Some(code),
            ProcessEvent::Closed { .. } => break,
            _ => {}
        }
    }

    println!("remote output: {}", String::from_utf8_lossy(&output).trim_end());
    println!("exit code: {exit_code:?}");

    conn.shutdown()?;
    board.join().map_err(|_| "board thread panicked")??;
    Ok(())
}

/// Echo the control command back in upper case, then exit cleanly.
fn simulate_board(mut device: MemoryStream) -> std::io::Result<()> {
    let mut parser = FrameParser::new();
    let mut command_line = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        let n = device.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        let frames = parser.feed(&buf[..n]).map_err(std::io::Error::other)?;
        for frame in frames {
            let id = frame.process_id;
            match frame.command {
                Command::WriteControl => command_line.extend_from_slice(&frame.payload),
                Command::CloseControl => {
                    let reply = command_line.to_ascii_uppercase();
                    let mut wire = codec::channel_write(ChannelKind::Stdout, id, reply.len())
                        .map_err(std::io::Error::other)?
                        .to_vec();
                    wire.extend_from_slice(&reply);
                    wire.extend_from_slice(&codec::exit_status(id, 0));
                    wire.extend_from_slice(&codec::stdout_close(id));
                    wire.extend_from_slice(&codec::stderr_close(id));
                    device.write_all(&wire)?;
                }
                Command::Close => device.write_all(&codec::close_ack(id))?,
                _ => {}
            }
        }
    }
}
