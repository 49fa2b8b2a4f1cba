//! # Watch plumbing
//!
//! Three watch streams (service accounts, workload secrets, namespaces)
//! and the scheduler tick fan into one bounded queue consumed by a single
//! worker. The worker owns the [`SecretController`] outright, so
//! reconciliation is serialized and events for one key are handled in
//! arrival order. Senders await queue capacity, so a slow worker
//! backpressures the watch streams instead of dropping events.
//!
//! Shutdown is a separate signal: it stops dispatch between dequeues, and
//! the controller's flag stops in-flight retry loops between attempts.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use kube::api::Api;
use kube::Client;
use kube_runtime::{watcher, WatchStreamExt};
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use crate::constants::{EVENT_QUEUE_DEPTH, SECRET_TYPE, WATCH_RESTART_DELAY_SECS};
use crate::controller::scheduler;
use crate::controller::SecretController;
use crate::observability::probes::Readiness;

/// One unit of work for the reconciliation worker
pub enum Event {
    ServiceAccountApplied(ServiceAccount),
    ServiceAccountDeleted(ServiceAccount),
    SecretApplied(Secret),
    SecretDeleted(Secret),
    NamespaceApplied(Namespace),
    NamespaceDeleted(Namespace),
    Tick,
}

/// Run the controller until a shutdown signal arrives.
///
/// Spawns the watch producers and the scheduler, then drives the worker
/// loop on the current task. The readiness handle is dropped to not-ready
/// as soon as the shutdown signal lands.
pub async fn run(
    controller: SecretController,
    client: Client,
    readiness: Readiness,
) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let shutdown = Arc::new(Notify::new());
    let shutting_down = controller.shutdown_flag();

    {
        let shutdown = shutdown.clone();
        let shutting_down = shutting_down.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal, stopping event dispatch");
            readiness.mark_not_ready();
            shutting_down.store(true, Ordering::Relaxed);
            // notify_one stores a permit, so the worker sees the signal
            // even if it is mid-event rather than parked on the queue.
            shutdown.notify_one();
        });
    }

    let watched = controller.config().watched_namespaces.clone();
    let secret_config =
        watcher::Config::default().fields(&format!("type={SECRET_TYPE}"));

    if watched.is_empty() {
        spawn_watcher(
            Api::<ServiceAccount>::all(client.clone()),
            watcher::Config::default(),
            tx.clone(),
            Event::ServiceAccountApplied,
            Event::ServiceAccountDeleted,
        );
        spawn_watcher(
            Api::<Secret>::all(client.clone()),
            secret_config,
            tx.clone(),
            Event::SecretApplied,
            Event::SecretDeleted,
        );
        spawn_watcher(
            Api::<Namespace>::all(client),
            watcher::Config::default(),
            tx.clone(),
            Event::NamespaceApplied,
            Event::NamespaceDeleted,
        );
    } else {
        for namespace in &watched {
            spawn_watcher(
                Api::<ServiceAccount>::namespaced(client.clone(), namespace),
                watcher::Config::default(),
                tx.clone(),
                Event::ServiceAccountApplied,
                Event::ServiceAccountDeleted,
            );
            spawn_watcher(
                Api::<Secret>::namespaced(client.clone(), namespace),
                secret_config.clone(),
                tx.clone(),
                Event::SecretApplied,
                Event::SecretDeleted,
            );
            // Namespaces are cluster-scoped, so the allow-list becomes one
            // name-selected watch per entry; dispatch still re-checks scope.
            spawn_watcher(
                Api::<Namespace>::all(client.clone()),
                watcher::Config::default().fields(&format!("metadata.name={namespace}")),
                tx.clone(),
                Event::NamespaceApplied,
                Event::NamespaceDeleted,
            );
        }
    }

    scheduler::spawn_ticker(tx, controller.config().scan_interval);

    run_event_loop(controller, rx, shutdown).await;
    Ok(())
}

/// The single worker: FIFO over all event sources
pub async fn run_event_loop(
    mut controller: SecretController,
    mut events: mpsc::Receiver<Event>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("worker stopping");
                break;
            }
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => dispatch(&mut controller, event).await,
                    None => break,
                }
            }
        }
    }
}

async fn dispatch(controller: &mut SecretController, event: Event) {
    if let Some(namespace) = event_namespace(&event) {
        if !controller.config().watches_namespace(namespace) {
            return;
        }
    }
    match event {
        Event::ServiceAccountApplied(account) => {
            controller.service_account_added(&account).await;
        }
        Event::ServiceAccountDeleted(account) => {
            controller.service_account_deleted(&account).await;
        }
        Event::SecretApplied(secret) => controller.secret_applied(&secret).await,
        Event::SecretDeleted(secret) => controller.secret_deleted(&secret).await,
        Event::NamespaceApplied(namespace) => controller.namespace_applied(&namespace).await,
        Event::NamespaceDeleted(namespace) => controller.namespace_deleted(&namespace),
        Event::Tick => controller.scan().await,
    }
}

fn event_namespace(event: &Event) -> Option<&str> {
    match event {
        Event::ServiceAccountApplied(account) | Event::ServiceAccountDeleted(account) => {
            account.metadata.namespace.as_deref()
        }
        Event::SecretApplied(secret) | Event::SecretDeleted(secret) => {
            secret.metadata.namespace.as_deref()
        }
        Event::NamespaceApplied(namespace) | Event::NamespaceDeleted(namespace) => {
            namespace.metadata.name.as_deref()
        }
        Event::Tick => None,
    }
}

/// Feed one watch stream into the event queue, restarting it if it ends.
///
/// Every (re)start begins with a full list, replayed as applies; the
/// handlers absorb the repetition because issuance is idempotent and
/// evaluating a healthy secret is a no-op.
fn spawn_watcher<K>(
    api: Api<K>,
    config: watcher::Config,
    tx: mpsc::Sender<Event>,
    on_apply: fn(K) -> Event,
    on_delete: fn(K) -> Event,
) where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let stream = watcher(api.clone(), config.clone()).default_backoff();
            tokio::pin!(stream);
            while let Some(event) = stream.next().await {
                let outgoing = match event {
                    Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                        on_apply(obj)
                    }
                    Ok(watcher::Event::Delete(obj)) => on_delete(obj),
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => continue,
                    Err(e) => {
                        warn!(error = %e, "watch stream error");
                        continue;
                    }
                };
                if tx.send(outgoing).await.is_err() {
                    // Worker is gone; nothing left to feed.
                    return;
                }
            }
            warn!("watch stream ended, restarting");
            tokio::time::sleep(Duration::from_secs(WATCH_RESTART_DELAY_SECS)).await;
        }
    });
}
