//! Component runtime: runs the swarm's concurrent units side by side.
//!
//! A [`Component`] captures its state at construction (the router owns the
//! roster, the console owns its channel halves) and is handed to
//! [`spawn_components`] together with the shared shutdown token.  The first
//! component that fails cancels the token, so the others wind down too.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AppError;

// ── Component ─────────────────────────────────────────────────────────────────

pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// An independently-runnable unit.
pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component into its run loop.  The loop should return
    /// once `shutdown` is cancelled.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

// ── ComponentSet ───────────────────────────────────────────────────────────────

/// Handle to a running set of components.
pub struct ComponentSet {
    inner: JoinHandle<Result<(), AppError>>,
}

impl ComponentSet {
    /// Wait for every component; returns the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Comms(format!("component set panicked: {e}"))),
        }
    }
}

// ── spawn_components ──────────────────────────────────────────────────────────

/// Spawn each component as its own task.
///
/// A failing or panicking component cancels `shutdown`; the remaining ones
/// are still awaited before the set resolves.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> ComponentSet {
    let inner = tokio::spawn(async move {
        let mut set: JoinSet<(String, Result<(), AppError>)> = JoinSet::new();

        for component in components {
            let id = component.id().to_string();
            debug!(component = %id, "spawning component");
            let fut = component.run(shutdown.clone());
            set.spawn(async move { (id, fut.await) });
        }

        let mut first_err: Option<AppError> = None;
        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| AppError::Comms(format!("component panicked: {e}")));
                }
                Ok((id, Err(e))) => {
                    error!(component = %id, "component failed: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok((id, Ok(()))) => info!(component = %id, "component stopped"),
            }
        }

        first_err.map_or(Ok(()), Err)
    });

    ComponentSet { inner }
}
