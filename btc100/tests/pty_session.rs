//! Session and protocol tests against a pseudo-terminal.
//!
//! The master side of the PTY plays the instrument: it echoes each command,
//! acknowledges it, answers `?K` with a baud code and `S` with a scan.

#![cfg(all(target_os = "linux", not(feature = "skip-pty-tests")))]

use btc100::exchange::{CommandExchange, Settle};
use btc100::protocol::{cmds, keys};
use btc100::scan::{ScanOptions, ScanReader};
use btc100::session::{LineSettings, Session};
use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use nix::sys::termios::{self, BaudRate};
use serial_test::serial;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn open_pty() -> (PtyMaster, String) {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).unwrap();
    grantpt(&master).unwrap();
    unlockpt(&master).unwrap();
    let slave = ptsname_r(&master).unwrap();
    (master, slave)
}

fn line() -> LineSettings {
    LineSettings {
        read_timeout: Duration::from_millis(100),
        ..LineSettings::default()
    }
}

// Runs until the host closes its end, then returns the commands it saw.
fn instrument(mut master: PtyMaster, scan_payload: Vec<u8>) -> JoinHandle<Vec<Vec<u8>>> {
    thread::spawn(move || {
        let mut commands = Vec::new();
        let mut command = Vec::new();
        let mut byte = [0u8; 1];

        while let Ok(1) = master.read(&mut byte) {
            if byte[0] != b'\n' {
                command.push(byte[0]);
                continue;
            }

            let mut reply = command.clone();
            reply.extend_from_slice(b"\r\nACK\r\n");
            match command.as_slice() {
                b"?K" => reply.extend_from_slice(b"00003\r\n"),
                b"S" => reply.extend_from_slice(&scan_payload),
                _ => {}
            }
            if master.write_all(&reply).is_err() {
                break;
            }
            commands.push(std::mem::take(&mut command));
        }

        commands
    })
}

#[test]
#[serial]
fn test_open_commits_speed() {
    let (_master, slave) = open_pty();

    for rate in [9_600, 115_200] {
        let settings = LineSettings {
            baud_rate: rate,
            ..line()
        };
        let session = Session::open(&slave, &settings).unwrap();
        assert_eq!(session.input_speed().rate(), rate);
        assert_eq!(session.output_speed().rate(), rate);

        // Read the settings back through a second descriptor.
        let other = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NOCTTY.bits())
            .open(&slave)
            .unwrap();
        let tty = termios::tcgetattr(&other).unwrap();
        assert_eq!(termios::cfgetispeed(&tty), session.input_speed().code());
        assert_eq!(termios::cfgetospeed(&tty), session.output_speed().code());
    }
}

#[test]
#[serial]
fn test_default_speed_is_9600() {
    let (_master, slave) = open_pty();

    let session = Session::open(&slave, &line()).unwrap();

    assert_eq!(session.input_speed().code(), BaudRate::B9600);
    assert_eq!(session.output_speed().rate(), 9_600);
}

#[test]
#[serial]
fn test_mode_query_and_scan() {
    let (master, slave) = open_pty();
    let payload = b"00010\r\n00020\r\n\0".to_vec();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("spectrum");

    let mut session = Session::open(&slave, &line()).unwrap();
    let device = instrument(master, payload.clone());

    let mut exchange = CommandExchange::new(&mut session, Settle::Fixed(Duration::from_millis(200)));
    let reply = exchange.send_mode(cmds::ASCII_MODE).unwrap();
    assert_eq!(reply.as_bytes(), b"a\r\nACK\r\n");
    assert_eq!(exchange.query_setting(keys::BAUD).unwrap(), 3);

    let options = ScanOptions {
        timeout: Some(Duration::from_secs(10)),
        ..ScanOptions::default()
    };
    let scan = ScanReader::new(&mut session, options).scan(&output).unwrap();

    let mut expected = b"S\r\nACK\r\n".to_vec();
    expected.extend_from_slice(&payload);
    assert_eq!(scan.as_bytes(), expected.as_slice());
    assert_eq!(std::fs::read(&output).unwrap(), expected);

    drop(session);
    let commands = device.join().unwrap();
    assert_eq!(commands, vec![b"a".to_vec(), b"?K".to_vec(), b"S".to_vec()]);
}

#[test]
#[serial]
fn test_query_reply_in_two_bursts() {
    let (mut master, slave) = open_pty();

    let mut session = Session::open(&slave, &line()).unwrap();
    let device = thread::spawn(move || {
        let mut command = Vec::new();
        let mut byte = [0u8; 1];
        while let Ok(1) = master.read(&mut byte) {
            if byte[0] != b'\n' {
                command.push(byte[0]);
                continue;
            }
            master.write_all(&command).unwrap();
            master.write_all(b"\r\n").unwrap();
            thread::sleep(Duration::from_millis(20));
            master.write_all(b"ACK\r\n00003\r\n").unwrap();
            command.clear();
        }
    });

    let mut exchange = CommandExchange::new(&mut session, Settle::UntilReadable(Duration::from_secs(2)));
    assert_eq!(exchange.query_setting(keys::BAUD).unwrap(), 3);

    drop(session);
    device.join().unwrap();
}
