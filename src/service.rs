//! Single-task driver for the interceptor.
//!
//! All interceptor state lives in one task. Applications intercept requests
//! and transports report signals through an [`InterceptorHandle`]; the task
//! applies those commands one at a time and wakes up on its own when the
//! earliest resource timeout is due. Nothing is shared, so nothing is locked.

use crate::error::{InterceptError, Result};
use crate::interceptor::{NetworkInterceptor, Request, Signal};
use crate::transport::{Credentials, Transfer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Work queued for the interceptor task.
pub enum Command {
    Intercept {
        request: Request,
        reply: oneshot::Sender<Option<Arc<dyn Transfer>>>,
    },
    Signal(Signal),
    SetResourceTimeout(Option<Duration>),
    SetMaxAuthAttempts(u32),
    SetCredentials(Credentials),
    SetCustomHeaders(BTreeMap<String, String>),
    Shutdown,
}

/// Cloneable front end to a running [`InterceptorService`].
#[derive(Clone)]
pub struct InterceptorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl InterceptorHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| InterceptError::ServiceClosed)
    }

    /// Intercepts a request and waits for its transfer.
    pub async fn intercept(&self, request: Request) -> Result<Option<Arc<dyn Transfer>>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Intercept { request, reply })?;
        rx.await.map_err(|_| InterceptError::ServiceClosed)
    }

    /// Reports a transport notification.
    pub fn notify(&self, signal: Signal) -> Result<()> {
        self.send(Command::Signal(signal))
    }

    pub fn set_resource_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.send(Command::SetResourceTimeout(timeout))
    }

    pub fn set_max_auth_attempts(&self, max_attempts: u32) -> Result<()> {
        self.send(Command::SetMaxAuthAttempts(max_attempts))
    }

    pub fn set_credentials(&self, credentials: Credentials) -> Result<()> {
        self.send(Command::SetCredentials(credentials))
    }

    pub fn set_custom_headers(&self, headers: BTreeMap<String, String>) -> Result<()> {
        self.send(Command::SetCustomHeaders(headers))
    }

    /// Stops the service after the commands already queued.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owns the interceptor and runs its event loop.
pub struct InterceptorService {
    interceptor: NetworkInterceptor,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl InterceptorService {
    pub fn new(interceptor: NetworkInterceptor) -> (Self, InterceptorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { interceptor, rx }, InterceptorHandle { tx })
    }

    /// Spawns the event loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until shut down or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Interceptor service started");

        loop {
            let deadline = self.interceptor.next_deadline();

            tokio::select! {
                biased;

                command = self.rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.dispatch(command, Instant::now()),
                },
                _ = sleep_until_deadline(deadline) => {
                    self.interceptor.expire_timeouts(Instant::now());
                }
            }
        }

        info!(
            in_flight = self.interceptor.in_flight_count(),
            "Interceptor service stopped"
        );
    }

    /// Timeouts already due at `now` fire before `command` is applied.
    fn dispatch(&mut self, command: Command, now: Instant) {
        self.interceptor.expire_timeouts(now);
        self.apply(command);
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Intercept { request, reply } => {
                let transfer = self.interceptor.intercept(request);
                if reply.send(transfer).is_err() {
                    debug!("Intercept caller went away before the transfer was returned");
                }
            }
            Command::Signal(signal) => self.interceptor.handle(signal),
            Command::SetResourceTimeout(timeout) => self.interceptor.set_resource_timeout(timeout),
            Command::SetMaxAuthAttempts(max) => self.interceptor.set_max_auth_attempts(max),
            Command::SetCredentials(credentials) => self.interceptor.set_credentials(credentials),
            Command::SetCustomHeaders(headers) => self.interceptor.set_custom_headers(headers),
            Command::Shutdown => {}
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
