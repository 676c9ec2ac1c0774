use std::fs;
use std::io::Write;
use std::sync::{Arc, Weak};
use std::time::Duration;

use boardlink_frame::ChannelKind;
use boardlink_mux::{Connection, ConnectionConfig, MuxError, ProcessEvent};
use boardlink_transport::TransportStream;
use tracing::{debug, info, warn};

use crate::cmd::{parse_duration, ExecArgs};
use crate::exit::{io_error, mux_error, transport_error, CliError, CliResult, FAILURE, TIMEOUT};

/// Signal forwarded to the remote process on Ctrl-C.
const INTERRUPT_SIGNAL: u8 = 2;

const RELAY_CHUNK: usize = 4096;

pub fn run(args: ExecArgs) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let stdin_data = match &args.stdin {
        Some(path) => Some(
            fs::read(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?,
        ),
        None => None,
    };

    let transport = TransportStream::connect_unix(&args.socket)
        .map_err(|err| transport_error("connect failed", err))?;
    let config = ConnectionConfig {
        write_timeout: timeout,
        event_timeout: timeout,
        ..ConnectionConfig::default()
    };
    let conn = Arc::new(
        Connection::with_config(transport, config)
            .map_err(|err| mux_error("connection failed", err))?,
    );

    let id = conn
        .open_process()
        .map_err(|err| mux_error("open failed", err))?;
    info!(process_id = id, socket = %args.socket.display(), "opened remote process");
    install_interrupt_handler(Arc::downgrade(&conn), id);

    let command_line = args.command.join(" ");
    write_all(&conn, id, ChannelKind::Control, command_line.as_bytes())
        .map_err(|err| mux_error("sending command failed", err))?;
    finish_channel(&conn, id, ChannelKind::Control)?;

    if let Some(data) = &stdin_data {
        match write_all(&conn, id, ChannelKind::Stdin, data) {
            Ok(sent) => debug!(process_id = id, sent, "streamed stdin"),
            // The process may exit before consuming its input.
            Err(MuxError::ChannelClosed { .. }) => {
                warn!(process_id = id, "remote process closed stdin early")
            }
            Err(err) => return Err(mux_error("streaming stdin failed", err)),
        }
    }
    finish_channel(&conn, id, ChannelKind::Stdin)?;

    let code = relay_until_closed(&conn, id, conn.config().event_timeout)?;

    match Arc::try_unwrap(conn) {
        Ok(conn) => {
            if let Err(err) = conn.shutdown() {
                debug!(error = %err, "connection shutdown failed");
            }
        }
        Err(_) => debug!("connection still referenced at exit"),
    }
    Ok(code)
}

fn install_interrupt_handler(conn: Weak<Connection>, id: u8) {
    let result = ctrlc::set_handler(move || {
        let Some(conn) = conn.upgrade() else {
            return;
        };
        info!(process_id = id, "interrupted, killing remote process");
        if let Err(err) = conn.kill(id, INTERRUPT_SIGNAL) {
            warn!(process_id = id, error = %err, "failed to kill remote process");
        }
    });
    if let Err(err) = result {
        warn!(error = %err, "could not install Ctrl-C handler");
    }
}

/// Keep writing until all of `data` is sent. A window that stays full for
/// the whole write timeout surfaces as `Timeout`.
fn write_all(
    conn: &Connection,
    id: u8,
    channel: ChannelKind,
    data: &[u8],
) -> Result<usize, MuxError> {
    let mut sent = 0;
    while sent < data.len() {
        sent += conn.write(id, channel, &data[sent..])?;
    }
    Ok(sent)
}

/// Close a host-side channel, tolerating a process that already went away.
fn finish_channel(conn: &Connection, id: u8, channel: ChannelKind) -> CliResult<()> {
    match conn.close_channel(id, channel) {
        Ok(()) | Err(MuxError::NoSuchProcess(_)) => Ok(()),
        Err(err) => Err(mux_error(&format!("closing {channel} failed"), err)),
    }
}

/// Relay output until the process is torn down; returns its exit code.
fn relay_until_closed(conn: &Connection, id: u8, timeout: Duration) -> CliResult<i32> {
    let mut exit_code = None;
    loop {
        let event = conn
            .next_event(timeout)
            .map_err(|err| mux_error("connection lost", err))?
            .ok_or_else(|| {
                CliError::new(
                    TIMEOUT,
                    format!("no activity from remote process within {timeout:?}"),
                )
            })?;
        if event.process_id != id {
            continue;
        }

        match event.event {
            ProcessEvent::Data { channel, .. } => relay(conn, id, channel)?,
            ProcessEvent::Exited { code } => {
                debug!(process_id = id, code, "remote process exited");
                exit_code = Some(code);
            }
            ProcessEvent::Killed { signal } => {
                debug!(process_id = id, signal, "remote process killed")
            }
            ProcessEvent::Unread { channel, data } => emit(channel, &data)?,
            ProcessEvent::Closed { exited_with_error } => {
                debug!(process_id = id, exited_with_error, "remote process closed");
                break;
            }
            ProcessEvent::Opened
            | ProcessEvent::Acked { .. }
            | ProcessEvent::ChannelClosed { .. } => {}
        }
    }

    Ok(exit_code.map_or(FAILURE, i32::from))
}

/// Copy buffered output of one channel to the matching local stream.
///
/// A process torn down in the meantime hands its output over in a later
/// `Unread` event, so `NoSuchProcess` just ends the copy.
fn relay(conn: &Connection, id: u8, channel: ChannelKind) -> CliResult<()> {
    let mut buf = [0u8; RELAY_CHUNK];
    loop {
        let read = match conn.read(id, channel, &mut buf) {
            Ok(0) | Err(MuxError::NoSuchProcess(_)) => return Ok(()),
            Ok(read) => read,
            Err(err) => return Err(mux_error("reading output failed", err)),
        };
        emit(channel, &buf[..read])?;
    }
}

fn emit(channel: ChannelKind, data: &[u8]) -> CliResult<()> {
    let written = match channel {
        ChannelKind::Stderr => {
            let mut err = std::io::stderr();
            err.write_all(data).and_then(|()| err.flush())
        }
        _ => {
            let mut out = std::io::stdout();
            out.write_all(data).and_then(|()| out.flush())
        }
    };
    written.map_err(|err| io_error("writing output failed", err))
}
