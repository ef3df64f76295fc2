//! Application startup and shutdown.
//!
//! Every [`Bootstrap`] registered with [`Setup::bootstrap`] or provided by
//! the built handler is started concurrently when
//! [`Setup::context`](crate::Setup::context) creates the root context, and
//! stopped in reverse order once that context ends. Both phases are bounded
//! by [`SetupOptions`].
//!
//! ```rust,ignore
//! let context = Setup::default().bootstrap(Arc::new(Warmup)).context().await?;
//! bootstrap::run(&context).await?;
//! ```
//!
//! [`Setup::bootstrap`]: crate::Setup::bootstrap

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use miruken_core::{BoxHandler, Context, ContextObserver, EndReason, HandlerExt, Merge, get_options};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RuntimeError, RuntimeResult};

/// Work done when an application starts and stops.
#[async_trait]
pub trait Bootstrap: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn startup(&self, handler: &BoxHandler) -> miruken_core::Result<()>;

    async fn shutdown(&self) -> miruken_core::Result<()> {
        Ok(())
    }
}

/// Time limits for starting and stopping bootstraps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupOptions {
    pub startup_timeout: Option<Duration>,
    pub shutdown_timeout: Option<Duration>,
}

impl Merge for SetupOptions {
    fn merge(&mut self, other: &Self) {
        if self.startup_timeout.is_none() {
            self.startup_timeout = other.startup_timeout;
        }
        if self.shutdown_timeout.is_none() {
            self.shutdown_timeout = other.shutdown_timeout;
        }
    }
}

/// Starts and stops the bootstraps of a root context.
///
/// Provided by the context it started, so `context.resolve::<Bootstrapper>()`
/// reaches it.
pub struct Bootstrapper {
    options: SetupOptions,
    bootstraps: Vec<Arc<dyn Bootstrap>>,
    stopping: AtomicBool,
    stopped: CancellationToken,
}

impl Bootstrapper {
    pub fn new(options: SetupOptions, bootstraps: Vec<Arc<dyn Bootstrap>>) -> Self {
        Self {
            options,
            bootstraps,
            stopping: AtomicBool::new(false),
            stopped: CancellationToken::new(),
        }
    }

    /// Collects `explicit` plus every bootstrap `context` provides.
    pub(crate) async fn resolve(
        context: &Context,
        explicit: Vec<Arc<dyn Bootstrap>>,
    ) -> RuntimeResult<Arc<Self>> {
        let mut bootstraps = explicit;
        let provided = context.resolve_all::<Arc<dyn Bootstrap>>()?.await?;
        bootstraps.extend(provided.iter().map(|bootstrap| (**bootstrap).clone()));
        let options = get_options::<SetupOptions>(&context.boxed()).unwrap_or_default();
        debug!(bootstraps = bootstraps.len(), ?options, "bootstraps resolved");
        Ok(Arc::new(Self::new(options, bootstraps)))
    }

    pub fn len(&self) -> usize {
        self.bootstraps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bootstraps.is_empty()
    }

    /// Starts every bootstrap concurrently.
    pub async fn startup(&self, handler: &BoxHandler) -> RuntimeResult<()> {
        if self.bootstraps.is_empty() {
            return Ok(());
        }
        let started = try_join_all(self.bootstraps.iter().map(|bootstrap| async move {
            bootstrap
                .startup(handler)
                .await
                .map_err(|source| RuntimeError::Startup {
                    name: bootstrap.name().to_string(),
                    source,
                })
        }));
        match self.options.startup_timeout {
            Some(limit) => tokio::time::timeout(limit, started)
                .await
                .map_err(|_| RuntimeError::StartupTimeout(limit))??,
            None => started.await?,
        };
        info!(bootstraps = self.bootstraps.len(), "bootstraps started");
        Ok(())
    }

    /// Stops every bootstrap in reverse order. Later calls wait for the
    /// first one to finish.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            self.stopped.cancelled().await;
            return Ok(());
        }
        let result = match self.options.shutdown_timeout {
            Some(limit) => tokio::time::timeout(limit, self.stop_all())
                .await
                .unwrap_or(Err(RuntimeError::ShutdownTimeout(limit))),
            None => self.stop_all().await,
        };
        self.stopped.cancel();
        result
    }

    async fn stop_all(&self) -> RuntimeResult<()> {
        let mut errors = Vec::new();
        for bootstrap in self.bootstraps.iter().rev() {
            if let Err(source) = bootstrap.shutdown().await {
                warn!(bootstrap = bootstrap.name(), error = %source, "bootstrap failed to shut down");
                errors.push(RuntimeError::Shutdown {
                    name: bootstrap.name().to_string(),
                    source,
                });
            }
        }
        info!(bootstraps = self.bootstraps.len(), "bootstraps stopped");
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(RuntimeError::Features(errors)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Completes once shutdown has finished.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }

    /// Shuts down when `context` ends.
    pub(crate) fn attach(self: &Arc<Self>, context: &Context) {
        let _ = context.observe(Arc::new(ShutdownOnEnd(self.clone())));
    }
}

struct ShutdownOnEnd(Arc<Bootstrapper>);

impl ContextObserver for ShutdownOnEnd {
    fn context_ended(&self, context: &Context, reason: &EndReason) {
        let bootstrapper = self.0.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(context = context.id(), ?reason, "shutting down bootstraps");
                runtime.spawn(async move {
                    if let Err(err) = bootstrapper.shutdown().await {
                        error!(error = %err, "bootstrap shutdown failed");
                    }
                });
            }
            Err(_) => warn!(
                context = context.id(),
                "context ended outside a tokio runtime, bootstraps were not shut down"
            ),
        }
    }
}

/// Ends `context` and waits for its bootstraps to stop.
pub async fn stop(context: &Context) -> RuntimeResult<()> {
    let bootstrapper = context.resolve::<Bootstrapper>()?.await?;
    context.end(EndReason::Ended);
    match bootstrapper {
        Some(bootstrapper) => bootstrapper.shutdown().await,
        None => Ok(()),
    }
}

/// Runs until `shutdown` completes, then stops `context`.
pub async fn run_until<F>(context: &Context, shutdown: F) -> RuntimeResult<()>
where
    F: Future<Output = ()>,
{
    shutdown.await;
    stop(context).await
}

/// Runs until Ctrl+C or SIGTERM, then stops `context`.
pub async fn run(context: &Context) -> RuntimeResult<()> {
    info!("running, press Ctrl+C to stop");
    run_until(context, wait_for_signal()).await
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
                return;
            }
            Err(err) => warn!(error = %err, "cannot listen for SIGTERM"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(err) => error!(error = %err, "cannot listen for Ctrl+C, shutting down"),
    }
}
