//! Daemon process test world: runs the daemon on a thread and talks to it
//! over its Unix socket.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ldmsd_wire::{HEADER_LEN, MessageType, RecordHeader};
use serde_json::Value;

use crate::health::HealthReporter;
use crate::process::launch::run_daemon_with;
use crate::process::{LaunchError, ShutdownError, ShutdownSignal};

use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::reporter::{HealthEvent, RecordingHealthReporter};
use super::transport::encode_records;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub type StepResult = Result<(), String>;

/// Shutdown signal released by the test.
#[derive(Clone, Default)]
pub struct TestShutdownSignal {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl TestShutdownSignal {
    pub fn trigger(&self) {
        let (flag, condvar) = &*self.state;
        *flag.lock().expect("shutdown mutex poisoned") = true;
        condvar.notify_all();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let (flag, condvar) = &*self.state;
        let mut triggered = flag.lock().expect("shutdown mutex poisoned");
        while !*triggered {
            triggered = condvar.wait(triggered).expect("shutdown mutex poisoned");
        }
        Ok(())
    }
}

pub struct ProcessTestWorld {
    loader: TestConfigLoader,
    pub reporter: Arc<RecordingHealthReporter>,
    shutdown: TestShutdownSignal,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
    last_reply: Option<Value>,
}

impl Default for ProcessTestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTestWorld {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loader: TestConfigLoader::new(),
            reporter: Arc::new(RecordingHealthReporter::default()),
            shutdown: TestShutdownSignal::default(),
            handle: None,
            result: None,
            last_reply: None,
        }
    }

    pub fn start(&mut self) -> StepResult {
        if self.handle.is_some() {
            return Err("daemon already running".to_owned());
        }
        let loader = self.loader.clone();
        let reporter = self.reporter.clone() as Arc<dyn HealthReporter>;
        let shutdown = self.shutdown.clone();
        self.handle = Some(thread::spawn(move || {
            run_daemon_with(&loader, reporter, &shutdown)
        }));
        self.wait_for_ready()
    }

    pub fn start_with_invalid_config(&mut self) {
        let reporter = self.reporter.clone() as Arc<dyn HealthReporter>;
        self.result = Some(run_daemon_with(&FailingConfigLoader, reporter, &self.shutdown));
    }

    fn wait_for_ready(&self) -> StepResult {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if self.reporter.saw_listener_ready() {
                return Ok(());
            }
            if self.handle.as_ref().is_some_and(thread::JoinHandle::is_finished) {
                return Err("daemon exited before becoming ready".to_owned());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err("daemon did not report readiness in time".to_owned())
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn join(&mut self) -> StepResult {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| "daemon not running".to_owned())?;
        let result = handle
            .join()
            .map_err(|_| "daemon thread panicked".to_owned())?;
        self.result = Some(result);
        Ok(())
    }

    /// Sends one request over a fresh connection and keeps the reply.
    pub fn request(&mut self, document: &Value) -> StepResult {
        let mut stream = UnixStream::connect(self.loader.socket_path())
            .map_err(|error| format!("connect failed: {error}"))?;
        stream
            .set_read_timeout(Some(WAIT_TIMEOUT))
            .map_err(|error| error.to_string())?;
        let payload = serde_json::to_vec(document).map_err(|error| error.to_string())?;
        for record in encode_records(MessageType::Request, 1, &payload, 4096) {
            stream.write_all(&record).map_err(|error| error.to_string())?;
        }
        let reply = read_response(&mut stream)?;
        self.last_reply = Some(serde_json::from_slice(&reply).map_err(|error| error.to_string())?);
        Ok(())
    }

    #[must_use]
    pub fn last_reply(&self) -> Option<&Value> {
        self.last_reply.as_ref()
    }

    #[must_use]
    pub fn result(&self) -> Option<&Result<(), LaunchError>> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn socket_exists(&self) -> bool {
        std::path::Path::new(&self.loader.socket_path()).exists()
    }

    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.reporter.events()
    }
}

impl Drop for ProcessTestWorld {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            drop(handle.join());
        }
    }
}

fn read_response(stream: &mut UnixStream) -> Result<Vec<u8>, String> {
    let mut message = Vec::new();
    loop {
        let mut header = [0_u8; HEADER_LEN];
        stream
            .read_exact(&mut header)
            .map_err(|error| format!("reading header failed: {error}"))?;
        let header = RecordHeader::decode(&header).map_err(|error| error.to_string())?;
        let mut payload = vec![0_u8; header.payload_len()];
        stream
            .read_exact(&mut payload)
            .map_err(|error| format!("reading payload failed: {error}"))?;
        if header.msg_type != MessageType::Response {
            continue;
        }
        message.extend_from_slice(&payload);
        if header.flags.is_end() {
            return Ok(message);
        }
    }
}
