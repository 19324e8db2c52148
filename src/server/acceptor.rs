//! Connection Acceptor
//!
//! Owns the endpoint and runs at most one session at a time.
//!
//! ```text
//!        ┌──────────────────────────────────────────────┐
//!        ▼                                              │
//!   open endpoint ──> accept ──> spawn session ──> join session
//!        ▲              │                               │
//!        │              │ busy: back off, accept again  │
//!        │              ▼                               │
//!        └──── other accept error                close endpoint
//! ```
//!
//! The endpoint is closed after every session, however it ended (clean
//! disconnect, handshake failure, I/O error, a panic in the evaluator), and
//! opened again before the next accept. A failing session never takes the
//! server down with it.

use crate::connection::session::{ServerStats, Session};
use crate::evaluator::Evaluator;
use crate::server::config::ServerConfig;
use crate::transport::{EndpointState, Transport, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The endpoint could not be created, even after retrying
    #[error("endpoint unavailable after {attempts} attempts: {source}")]
    EndpointUnavailable {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The server task itself panicked or was cancelled
    #[error("server task failed: {0}")]
    Task(#[from] JoinError),
}

/// The evaluation server.
pub struct Server<E> {
    config: ServerConfig,
    transport: Arc<Transport>,
    evaluator: Arc<Mutex<E>>,
    stats: Arc<ServerStats>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    next_session_id: u64,
    opened_before: bool,
}

impl<E: Evaluator + 'static> Server<E> {
    /// Creates a server that will listen on `config.channel_name`.
    ///
    /// Nothing is bound until the server runs.
    pub fn new(config: ServerConfig, evaluator: E) -> Self {
        let transport = Arc::new(Transport::new(
            config.channel_name.clone(),
            config.buffer_size,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            transport,
            evaluator: Arc::new(Mutex::new(evaluator)),
            stats: Arc::new(ServerStats::new()),
            shutdown_tx: Arc::new(shutdown_tx),
            next_session_id: 0,
            opened_before: false,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn transport(&self) -> Arc<Transport> {
        Arc::clone(&self.transport)
    }

    /// Starts the accept loop as a background task.
    ///
    /// The server stops when the returned handle is stopped or dropped.
    pub fn spawn(self) -> ServerHandle {
        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        let stats = Arc::clone(&self.stats);
        let channel_name = self.config.channel_name.clone();

        let task = tokio::spawn(self.run());

        ServerHandle {
            shutdown_tx,
            stats,
            channel_name,
            task: Some(task),
        }
    }

    /// Runs the accept loop until stopped.
    ///
    /// Returns an error only if the endpoint cannot be created at all.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let mut shutdown = self.shutdown_tx.subscribe();
        info!(address = %self.transport.address(), "Evaluation server starting");

        let result = self.accept_loop(&mut shutdown).await;

        self.transport.close().await;
        match &result {
            Ok(()) => info!("Evaluation server stopped"),
            Err(e) => error!(error = %e, "Evaluation server failed"),
        }
        result
    }

    async fn accept_loop(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            if self.transport.state().await != EndpointState::Listening {
                self.open_endpoint().await?;
            }

            let accepted = tokio::select! {
                result = self.transport.accept() => result,
                _ = shutdown.changed() => continue,
            };

            match accepted {
                Ok(()) => self.run_session(shutdown).await,
                Err(TransportError::AcceptBusy(e)) => {
                    debug!(error = %e, "Endpoint busy, retrying accept");
                    tokio::time::sleep(self.config.accept_backoff).await;
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed, recreating endpoint");
                    self.transport.close().await;
                }
            }
        }
    }

    /// Opens the endpoint, retrying up to `max_open_attempts` times.
    async fn open_endpoint(&mut self) -> Result<(), ServerError> {
        let max_attempts = self.config.max_open_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.transport.open().await {
                Ok(()) => {
                    if self.opened_before {
                        self.stats.endpoint_recreated();
                        debug!(address = %self.transport.address(), "Endpoint recreated");
                    } else {
                        info!(address = %self.transport.address(), "Listening");
                    }
                    self.opened_before = true;
                    return Ok(());
                }
                Err(source) if attempts >= max_attempts => {
                    return Err(ServerError::EndpointUnavailable { attempts, source });
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "Failed to create endpoint, retrying");
                    tokio::time::sleep(self.config.reopen_backoff).await;
                }
            }
        }
    }

    /// Runs one session in its own task and waits for it to finish.
    async fn run_session(&mut self, shutdown: &watch::Receiver<bool>) {
        self.next_session_id += 1;
        let id = self.next_session_id;

        self.stats.session_opened();
        let session = Session::new(
            id,
            Arc::clone(&self.transport),
            Arc::clone(&self.evaluator),
            self.config.session_config(),
            Arc::clone(&self.stats),
            shutdown.clone(),
        );

        // Outcomes are logged by the session itself
        match tokio::spawn(session.run()).await {
            Ok(_) => {}
            Err(e) if e.is_panic() => error!(session = id, "Session panicked"),
            Err(e) => warn!(session = id, error = %e, "Session task cancelled"),
        }
        self.stats.session_closed();

        self.transport.close().await;
    }
}

/// A handle to a running server.
///
/// When this handle is dropped, the server is told to stop.
#[derive(Debug)]
pub struct ServerHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    stats: Arc<ServerStats>,
    channel_name: String,
    task: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    /// The endpoint name callers connect to.
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Asks the server to stop.
    ///
    /// An idle server stops at once. A running session ends at its next
    /// instruction boundary, after at most one instruction timeout.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Returns true once the server task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Waits for the server task to end.
    ///
    /// Safe to cancel and call again.
    pub async fn join(&mut self) -> Result<(), ServerError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };

        let result = task.await;
        self.task = None;
        result?
    }

    /// Stops the server and waits for it to end.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        self.stop();
        self.join().await
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientOptions, PipeClient};
    use crate::evaluator::{ArithmeticEvaluator, EvaluatorError};
    use crate::protocol::outcome::EvaluationOutcome;
    use crate::transport::testing::unique_channel_name;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn test_config(tag: &str) -> ServerConfig {
        ServerConfig {
            instruction_timeout: Duration::from_secs(5),
            accept_backoff: Duration::from_millis(10),
            reopen_backoff: Duration::from_millis(10),
            ..ServerConfig::new(unique_channel_name(tag))
        }
    }

    async fn connect(handle: &ServerHandle) -> PipeClient {
        let mut client = PipeClient::connect(handle.channel_name(), ClientOptions::default())
            .await
            .unwrap();
        client.handshake().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_serves_requests() {
        let handle = Server::new(test_config("serve"), ArithmeticEvaluator::new()).spawn();

        let mut client = connect(&handle).await;
        assert_eq!(client.request("x = 5; x * 2").await.unwrap(), "x = 510");
        assert_eq!(client.request("x + 1").await.unwrap(), "6");

        let stats = handle.stats();
        assert_eq!(stats.sessions_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_sessions.load(Ordering::Relaxed), 1);
        assert_eq!(stats.instructions_processed.load(Ordering::Relaxed), 2);

        drop(client);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_variables_survive_reconnect() {
        let handle = Server::new(test_config("persist"), ArithmeticEvaluator::new()).spawn();

        let mut first = connect(&handle).await;
        assert_eq!(first.request("y = 40").await.unwrap(), "y = 40");
        drop(first);

        let mut second = connect(&handle).await;
        assert_eq!(second.request("y + 2").await.unwrap(), "42");

        assert!(handle.stats().endpoint_recreations.load(Ordering::Relaxed) >= 1);
        drop(second);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_survives_evaluator_panic() {
        let evaluator = |instruction: &str| -> Result<Vec<EvaluationOutcome>, EvaluatorError> {
            if instruction == "crash" {
                panic!("evaluator crashed");
            }
            Ok(vec![EvaluationOutcome::value(instruction)])
        };
        let handle = Server::new(test_config("panic"), evaluator).spawn();

        let mut client = connect(&handle).await;
        assert!(client.request("crash").await.is_err());
        drop(client);

        let mut client = connect(&handle).await;
        assert_eq!(client.request("still here").await.unwrap(), "still here");

        drop(client);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_server_stops_promptly() {
        let handle = Server::new(test_config("stop"), ArithmeticEvaluator::new()).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = tokio::time::timeout(Duration::from_secs(2), handle.shutdown()).await;
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_server() {
        let handle = Server::new(test_config("drop"), ArithmeticEvaluator::new()).spawn();
        let transport_name = handle.channel_name().to_string();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let options = ClientOptions {
            connect_attempts: 1,
            ..ClientOptions::default()
        };
        assert!(PipeClient::connect(&transport_name, options).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_endpoint_unavailable_after_retries() {
        let config = ServerConfig {
            max_open_attempts: 2,
            reopen_backoff: Duration::from_millis(10),
            ..ServerConfig::new("/nonexistent-evalpipe-dir/endpoint.sock")
        };
        let mut handle = Server::new(config, ArithmeticEvaluator::new()).spawn();

        let result = handle.join().await;
        assert!(matches!(
            result,
            Err(ServerError::EndpointUnavailable { attempts: 2, .. })
        ));
        assert!(handle.is_finished());
    }
}
