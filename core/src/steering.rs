//! Live steering session: outbound TCP connection, frame parsing, and
//! asynchronous notifications back to the steering server.
//!
//! Wire protocol (text over a byte stream): frames split on ';', fields
//! on ':'. Recognized forms:
//!   cmd:play | cmd:pause | cmd:stepf | cmd:stepb | cmd:stop
//!   load:<year>:<raster-name> | name:<basename> | goto:<year> | sync
//! Unrecognized messages are logged and dropped. Any receive failure
//! (socket error, peer close, or an expired read timeout when one is
//! configured) is an implicit Stop: the channel closes its socket and
//! pushes exactly one Stop before the receive thread exits.
//!
//! The receive thread never touches realization or checkpoint state; it
//! only pushes into the command queue.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::command::{CommandQueue, SteeringCommand};
use crate::error::{SimError, SimResult};

/// Parse one field-delimited message into a command. Returns None for
/// anything unrecognized.
pub fn parse_message(message: &str) -> Option<SteeringCommand> {
    let (tag, rest) = match message.split_once(':') {
        Some((tag, rest)) => (tag, rest),
        None => (message, ""),
    };
    match tag {
        "cmd" => match rest {
            "play" => Some(SteeringCommand::Play),
            "pause" => Some(SteeringCommand::Pause),
            "stepf" => Some(SteeringCommand::StepForward),
            "stepb" => Some(SteeringCommand::StepBack),
            "stop" => Some(SteeringCommand::Stop),
            _ => None,
        },
        "load" => {
            let (year, name) = rest.split_once(':')?;
            let year = year.parse().ok()?;
            (!name.is_empty()).then(|| SteeringCommand::LoadData {
                year,
                name: name.to_string(),
            })
        }
        "name" => (!rest.is_empty()).then(|| SteeringCommand::ChangeName {
            name: rest.to_string(),
        }),
        "goto" => rest
            .parse()
            .ok()
            .map(|year| SteeringCommand::GoTo { year }),
        "sync" => Some(SteeringCommand::SyncRuns),
        _ => None,
    }
}

/// Split a received payload into messages and push each parsed command.
/// Returns true when a Stop was seen; nothing after it is processed.
pub fn dispatch_frame(payload: &str, queue: &CommandQueue) -> bool {
    for message in payload.split(';') {
        let message = message.trim_matches(char::from(0)).trim();
        if message.is_empty() {
            continue;
        }
        match parse_message(message) {
            Some(SteeringCommand::Stop) => {
                queue.push(SteeringCommand::Stop);
                return true;
            }
            Some(cmd) => queue.push(cmd),
            None => log::warn!("dropping unrecognized steering message: {message:?}"),
        }
    }
    false
}

/// Handle for sending asynchronous notifications to the steering server.
/// Clonable; sends are serialized on the underlying stream.
#[derive(Clone)]
pub struct Notifier {
    stream: Arc<Mutex<TcpStream>>,
}

impl Notifier {
    /// Best effort: a failed send is logged, never fatal.
    pub fn send(&self, message: &str) {
        let mut stream = match self.stream.lock() {
            Ok(stream) => stream,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = stream.write_all(message.as_bytes()) {
            log::warn!("steering notification failed: {err}");
        }
    }
}

/// One live steering session. Owns the receive thread for its lifetime.
pub struct SteeringChannel {
    notifier: Notifier,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SteeringChannel {
    /// Establish the outbound connection and start the receive thread.
    /// `read_timeout` of None blocks indefinitely on receive.
    pub fn connect(
        address: &str,
        port: u16,
        read_timeout: Option<Duration>,
        queue: CommandQueue,
    ) -> SimResult<Self> {
        let stream = TcpStream::connect((address, port))
            .map_err(|err| SimError::Steering(format!("connect to {address}:{port}: {err}")))?;
        stream.set_read_timeout(read_timeout)?;
        let writer = stream.try_clone()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("steering-receive".into())
            .spawn(move || receive_loop(stream, queue, thread_shutdown))?;

        log::info!("steering session connected to {address}:{port}");
        Ok(Self {
            notifier: Notifier {
                stream: Arc::new(Mutex::new(writer)),
            },
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Orderly teardown: mark the session closed, shut the socket so a
    /// blocked receive wakes up, and join the receive thread.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Ok(stream) = self.notifier.stream.lock() {
            stream.shutdown(Shutdown::Both).ok();
        }
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for SteeringChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn receive_loop(mut stream: TcpStream, queue: CommandQueue, shutdown: Arc<AtomicBool>) {
    let mut buf = [0u8; 512];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => None,
            Ok(n) => Some(n),
            Err(_) => None,
        };
        let Some(n) = n else {
            // receive failure is an implicit Stop, unless the scheduler
            // already asked for teardown
            if !shutdown.load(Ordering::SeqCst) {
                log::warn!("steering receive failed; stopping the run");
                queue.push(SteeringCommand::Stop);
            }
            stream.shutdown(Shutdown::Both).ok();
            break;
        };
        let payload = String::from_utf8_lossy(&buf[..n]);
        if dispatch_frame(&payload, &queue) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_messages_parse_to_commands() {
        assert_eq!(parse_message("cmd:play"), Some(SteeringCommand::Play));
        assert_eq!(parse_message("cmd:pause"), Some(SteeringCommand::Pause));
        assert_eq!(parse_message("cmd:stepf"), Some(SteeringCommand::StepForward));
        assert_eq!(parse_message("cmd:stepb"), Some(SteeringCommand::StepBack));
        assert_eq!(parse_message("cmd:stop"), Some(SteeringCommand::Stop));
        assert_eq!(parse_message("sync"), Some(SteeringCommand::SyncRuns));
        assert_eq!(
            parse_message("goto:3"),
            Some(SteeringCommand::GoTo { year: 3 })
        );
        assert_eq!(
            parse_message("load:2021:spray_a"),
            Some(SteeringCommand::LoadData {
                year: 2021,
                name: "spray_a".into()
            })
        );
        assert_eq!(
            parse_message("name:scenario_b"),
            Some(SteeringCommand::ChangeName {
                name: "scenario_b".into()
            })
        );
    }

    #[test]
    fn malformed_messages_are_dropped() {
        assert_eq!(parse_message("cmd:warp"), None);
        assert_eq!(parse_message("load:notayear:map"), None);
        assert_eq!(parse_message("load:2021"), None);
        assert_eq!(parse_message("goto:abc"), None);
        assert_eq!(parse_message("name:"), None);
        assert_eq!(parse_message("bogus"), None);
        assert_eq!(parse_message(""), None);
    }

    #[test]
    fn frames_split_on_semicolons() {
        let queue = CommandQueue::new();
        let stop = dispatch_frame("cmd:play;goto:2;garbage;sync", &queue);
        assert!(!stop);
        assert_eq!(queue.pop(), Some(SteeringCommand::Play));
        assert_eq!(queue.pop(), Some(SteeringCommand::GoTo { year: 2 }));
        assert_eq!(queue.pop(), Some(SteeringCommand::SyncRuns));
        assert_eq!(queue.pop(), None, "garbage must be dropped, not queued");
    }

    #[test]
    fn stop_ends_frame_processing() {
        let queue = CommandQueue::new();
        let stop = dispatch_frame("cmd:pause;cmd:stop;cmd:play", &queue);
        assert!(stop);
        assert_eq!(queue.pop(), Some(SteeringCommand::Pause));
        assert_eq!(queue.pop(), Some(SteeringCommand::Stop));
        assert_eq!(queue.pop(), None, "commands after Stop are not processed");
    }

    #[test]
    fn nul_padding_from_fixed_buffers_is_ignored() {
        let queue = CommandQueue::new();
        dispatch_frame("cmd:play\0\0\0", &queue);
        assert_eq!(queue.pop(), Some(SteeringCommand::Play));
        assert_eq!(queue.pop(), None);
    }
}
