//! Recording mock engine for tests.
//!
//! Every primitive call is logged as an [`EngineCall`]; failure modes are
//! switched on per test.

use std::{
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::engine::{
    AssociationToken, ConnAddr, EngineError, EngineSettings, SctpEngine, SendInfo, SocketHandle,
    SocketMode, SocketOption,
};
use crate::Association;

/// One recorded engine primitive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Init(EngineSettings),
    Finish,
    RegisterAddress(AssociationToken),
    DeregisterAddress(AssociationToken),
    SetDebug(bool),
    Socket { association: AssociationToken, mode: SocketMode },
    SetOption { socket: SocketHandle, option: SocketOption },
    Bind { socket: SocketHandle, local: ConnAddr },
    Connect { socket: SocketHandle, remote: ConnAddr },
    Send { socket: SocketHandle, data: Vec<u8>, remote: ConnAddr, info: SendInfo },
    Shutdown(SocketHandle),
    Close(SocketHandle),
    ConnInput { association: AssociationToken, packet: Vec<u8> },
}

/// How the mock answers `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendBehaviour {
    #[default]
    Accept,
    WouldBlock,
    Fail,
}

type OptionFilter = Box<dyn Fn(&SocketOption) -> bool + Send + Sync>;
type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<EngineCall>>,
    bind_threads: Mutex<Vec<Option<String>>>,
    next_socket: AtomicU64,
    fail_socket: AtomicBool,
    bind_addr_in_use: AtomicUsize,
    fail_bind: AtomicBool,
    fail_connect: AtomicBool,
    send_behaviour: Mutex<SendBehaviour>,
    failing_option: Mutex<Option<OptionFilter>>,
    shutdown_hook: Mutex<Option<Hook>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_socket_failure(&self, fail: bool) {
        self.fail_socket.store(fail, Ordering::SeqCst);
    }

    /// Answer the next `times` binds with [`EngineError::AddrInUse`].
    pub fn set_bind_addr_in_use(&self, times: usize) {
        self.bind_addr_in_use.store(times, Ordering::SeqCst);
    }

    pub fn set_bind_failure(&self, fail: bool) {
        self.fail_bind.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_failure(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_send_behaviour(&self, behaviour: SendBehaviour) {
        *self.send_behaviour.lock() = behaviour;
    }

    /// Fail every `set_option` whose option matches `filter`.
    pub fn fail_option<F>(&self, filter: F)
    where
        F: Fn(&SocketOption) -> bool + Send + Sync + 'static,
    {
        *self.failing_option.lock() = Some(Box::new(filter));
    }

    /// Run `hook` whenever `shutdown` succeeds, on the calling thread.
    pub fn on_shutdown<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.shutdown_hook.lock() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    /// Options set on `socket`, in call order
    pub fn options(&self, socket: SocketHandle) -> Vec<SocketOption> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                EngineCall::SetOption { socket: s, option } if *s == socket => Some(option.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sends(&self) -> Vec<(Vec<u8>, ConnAddr, SendInfo)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                EngineCall::Send { data, remote, info, .. } => Some((data.clone(), *remote, *info)),
                _ => None,
            })
            .collect()
    }

    pub fn conn_inputs(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                EngineCall::ConnInput { packet, .. } => Some(packet.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of the threads that called `bind`
    pub fn bind_thread_names(&self) -> Vec<Option<String>> {
        self.bind_threads.lock().clone()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }

    fn io_error(what: &str) -> EngineError {
        EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("mock {what} failure")))
    }
}

impl SctpEngine for MockEngine {
    fn init(&self, settings: &EngineSettings) {
        self.record(EngineCall::Init(*settings));
    }

    fn finish(&self) {
        self.record(EngineCall::Finish);
    }

    fn register_address(&self, association: AssociationToken) {
        self.record(EngineCall::RegisterAddress(association));
    }

    fn deregister_address(&self, association: AssociationToken) {
        self.record(EngineCall::DeregisterAddress(association));
    }

    fn set_debug(&self, enabled: bool) {
        self.record(EngineCall::SetDebug(enabled));
    }

    fn socket(&self, association: AssociationToken, mode: SocketMode) -> Result<SocketHandle, EngineError> {
        self.record(EngineCall::Socket { association, mode });
        if self.fail_socket.load(Ordering::SeqCst) {
            return Err(Self::io_error("socket"));
        }
        Ok(SocketHandle(self.next_socket.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn set_option(&self, socket: SocketHandle, option: SocketOption) -> Result<(), EngineError> {
        let fails = self.failing_option.lock().as_ref().is_some_and(|f| f(&option));
        self.record(EngineCall::SetOption { socket, option });
        if fails {
            return Err(Self::io_error("setsockopt"));
        }
        Ok(())
    }

    fn bind(&self, socket: SocketHandle, local: ConnAddr) -> Result<(), EngineError> {
        self.record(EngineCall::Bind { socket, local });
        self.bind_threads.lock().push(thread::current().name().map(str::to_owned));
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(Self::io_error("bind"));
        }
        let in_use = self
            .bind_addr_in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if in_use {
            return Err(EngineError::AddrInUse);
        }
        Ok(())
    }

    fn connect(&self, socket: SocketHandle, remote: ConnAddr) -> Result<(), EngineError> {
        self.record(EngineCall::Connect { socket, remote });
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Self::io_error("connect"));
        }
        Err(EngineError::InProgress)
    }

    fn send(
        &self,
        socket: SocketHandle,
        data: &[u8],
        remote: ConnAddr,
        info: &SendInfo,
    ) -> Result<usize, EngineError> {
        self.record(EngineCall::Send {
            socket,
            data: data.to_vec(),
            remote,
            info: *info,
        });
        match *self.send_behaviour.lock() {
            SendBehaviour::Accept => Ok(data.len()),
            SendBehaviour::WouldBlock => Err(EngineError::WouldBlock),
            SendBehaviour::Fail => Err(Self::io_error("send")),
        }
    }

    fn shutdown(&self, socket: SocketHandle) -> Result<(), EngineError> {
        self.record(EngineCall::Shutdown(socket));
        if let Some(hook) = self.shutdown_hook.lock().as_ref() {
            hook();
        }
        Ok(())
    }

    fn close(&self, socket: SocketHandle) {
        self.record(EngineCall::Close(socket));
    }

    fn conn_input(&self, association: AssociationToken, packet: &[u8]) {
        self.record(EngineCall::ConnInput {
            association,
            packet: packet.to_vec(),
        });
    }
}

/// Set ports and no-op callbacks so the association promotes itself to READY.
pub fn configure_ready(association: &Association, local_port: u16, remote_port: u16) {
    association.set_on_packet_out(|_: &Association, _: &[u8]| {});
    association.set_on_packet_received(|_: &Association, _: &[u8], _: u16, _: u32| {});
    // Errors only outside NEW, where the ports are already fixed.
    let _ = association.set_local_port(local_port);
    let _ = association.set_remote_port(remote_port);
}

/// Poll `condition` every millisecond until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
