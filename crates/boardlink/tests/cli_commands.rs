#![cfg(all(unix, feature = "cli"))]

use std::io::{Read, Write};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use boardlink::frame::{codec, ChannelKind, Command as FrameCommand, FrameParser};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/blcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn boardlink() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_boardlink"));
    cmd.arg("--log-level").arg("error");
    cmd
}

#[test]
fn encode_open_prints_header_hex() {
    let output = boardlink()
        .args(["--format", "pretty", "encode", "open", "--pid", "5"])
        .output()
        .expect("encode should run");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "01050000");
}

#[test]
fn encode_write_as_json() {
    let output = boardlink()
        .args([
            "--format",
            "json",
            "encode",
            "write-stdin",
            "--pid",
            "3",
            "--data",
            "0123456789",
        ])
        .output()
        .expect("encode should run");

    assert!(output.status.success());
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(value["hex"], "1103000a30313233343536373839");
    assert_eq!(value["frames"], 1);
    assert_eq!(value["bytes"], 14);
}

#[test]
fn encode_rejects_process_id_over_255() {
    let output = boardlink()
        .args(["encode", "open", "--pid", "256"])
        .output()
        .expect("encode should run");

    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid process id 256"));
}

#[test]
fn decode_prints_frames_as_json_lines() {
    let dir = unique_temp_dir("decode");
    let capture = dir.join("capture.bin");
    std::fs::write(&capture, [0x01, 0x01, 0x00, 0x00, 0x06, 0x01, 0x00, 0x00])
        .expect("capture should be writable");

    let output = boardlink()
        .args(["--format", "json", "decode"])
        .arg(&capture)
        .output()
        .expect("decode should run");

    assert!(output.status.success());
    let lines: Vec<serde_json::Value> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["command"], "OPEN");
    assert_eq!(lines[0]["process_id"], 1);
    assert_eq!(lines[1]["command"], "CLOSE_ACK");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn decode_hex_from_stdin() {
    let mut child = boardlink()
        .args(["--format", "pretty", "decode", "--hex"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("decode should start");
    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(b"11 03 00 02 68 69\n")
        .expect("hex should be writable");

    let output = child.wait_with_output().expect("decode should finish");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("WRITE_STDIN pid=3"));
    assert!(stdout.contains("payload=hi"));
}

#[test]
fn decode_unknown_command_exits_60() {
    let dir = unique_temp_dir("decode-bad");
    let capture = dir.join("capture.bin");
    std::fs::write(&capture, [0x01, 0x02, 0x00, 0x00, 0x7f, 0x00, 0x00, 0x00])
        .expect("capture should be writable");

    let output = boardlink()
        .args(["--format", "pretty", "decode"])
        .arg(&capture)
        .output()
        .expect("decode should run");

    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stdout).contains("OPEN pid=2"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("0x7f"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn decode_truncated_capture_exits_60() {
    let dir = unique_temp_dir("decode-short");
    let capture = dir.join("capture.bin");
    std::fs::write(&capture, [0x12, 0x00, 0x00, 0x05, b'a'])
        .expect("capture should be writable");

    let output = boardlink()
        .args(["decode"])
        .arg(&capture)
        .output()
        .expect("decode should run");

    assert_eq!(output.status.code(), Some(60));
    let _ = std::fs::remove_dir_all(&dir);
}

/// Pretend to be the board: run one process that prints to stdout and
/// stderr, then exits with code 3. Returns the command line it received.
fn fake_board(listener: UnixListener) -> String {
    let (mut stream, _) = listener.accept().expect("board should accept");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("read timeout should apply");

    let mut parser = FrameParser::new();
    let mut command_line = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).expect("board read should succeed");
        if n == 0 {
            break;
        }
        for frame in parser.feed(&buf[..n]).expect("host should send valid frames") {
            let id = frame.process_id;
            match frame.command {
                FrameCommand::WriteControl => command_line.extend_from_slice(&frame.payload),
                FrameCommand::CloseControl => {
                    let mut reply = vec![0x12, id, 0, 3];
                    reply.extend_from_slice(b"hi\n");
                    reply.extend_from_slice(&[0x13, id, 0, 5]);
                    reply.extend_from_slice(b"oops\n");
                    reply.extend_from_slice(&codec::exit_status(id, 3));
                    reply.extend_from_slice(&codec::channel_close(ChannelKind::Stdout, id));
                    reply.extend_from_slice(&codec::channel_close(ChannelKind::Stderr, id));
                    stream.write_all(&reply).expect("board write should succeed");
                }
                FrameCommand::Close => {
                    stream
                        .write_all(&codec::close_ack(id))
                        .expect("board write should succeed");
                }
                _ => {}
            }
        }
    }
    String::from_utf8(command_line).expect("command line should be UTF-8")
}

#[test]
fn exec_relays_output_and_exit_code() {
    let dir = unique_temp_dir("exec");
    let sock_path = dir.join("board.sock");
    let listener = UnixListener::bind(&sock_path).expect("board socket should bind");
    let board = thread::spawn(move || fake_board(listener));

    let output = boardlink()
        .arg("exec")
        .arg(&sock_path)
        .args(["--timeout", "10s", "--", "echo", "hi"])
        .output()
        .expect("exec should run");

    assert_eq!(output.status.code(), Some(3));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hi\n");
    assert!(String::from_utf8_lossy(&output.stderr).contains("oops"));
    assert_eq!(board.join().expect("board thread should finish"), "echo hi");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn exec_missing_socket_exits_3() {
    let dir = unique_temp_dir("exec-missing");
    let output = boardlink()
        .arg("exec")
        .arg(dir.join("absent.sock"))
        .args(["--", "true"])
        .output()
        .expect("exec should run");

    assert_eq!(output.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_reports_name() {
    let output = boardlink()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("boardlink "));
}
