// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent server: wires the adapters, orchestrators and reconcilers together
//! and serves the HTTP API until a shutdown signal arrives.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use algo_agent_core::{
    application::{
        deploy::DeployOrchestrator,
        dispatcher::Dispatcher,
        evaluation::EvaluationOrchestrator,
        extraction::ExtractionOrchestrator,
        lifecycle::{AgentContext, TaskLifecycle},
        notifier::Notifier,
        outbox_recorder::OutboxRecorder,
        reconciler::{ReconcilePolicy, Reconciler},
        training::TrainingOrchestrator,
    },
    domain::{
        node_config::AgentConfig,
        record::{DeployServiceRecord, EvalTaskRecord, ExtractTaskRecord, TaskRecord, TrainingTaskRecord},
        repository::TaskRegistry,
        runtime::ContainerRuntime,
    },
    infrastructure::{
        event_bus::InProcessBus,
        registry::JsonTaskRegistry,
        runtime::DockerRuntime,
        storage::{create_object_storage, StorageBackend},
    },
    presentation::api::{app, AppState},
};

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct ServeOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub data_root: Option<PathBuf>,
}

/// One task kind's registry and lifecycle, kept together for shutdown.
struct KindStack<R: TaskRecord> {
    registry: Arc<JsonTaskRegistry<R>>,
    lifecycle: Arc<TaskLifecycle<R>>,
}

impl<R: TaskRecord> KindStack<R> {
    fn new(config: &AgentConfig, ctx: &AgentContext) -> Self {
        let registry = Arc::new(JsonTaskRegistry::<R>::new(config.registry_path(R::KIND)));
        let lifecycle = Arc::new(TaskLifecycle::new(ctx.clone(), registry.clone() as Arc<dyn TaskRegistry<R>>));
        Self { registry, lifecycle }
    }

    fn reconcile(&self, config: &AgentConfig, shutdown: &CancellationToken) -> JoinHandle<()> {
        let policy = ReconcilePolicy::for_kind(config, R::KIND);
        Arc::new(Reconciler::new(self.lifecycle.clone(), policy)).start(shutdown.clone())
    }

    fn stop(&self) {
        if let Err(e) = self.registry.stop() {
            error!(kind = %R::KIND, error = %e, "Failed to write final registry snapshot");
        }
    }
}

pub async fn run_agent(config_path: Option<PathBuf>, overrides: ServeOverrides) -> Result<()> {
    let mut config = AgentConfig::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(bind) = overrides.bind_address {
        config.http.bind_address = bind;
    }
    if let Some(port) = overrides.port {
        config.http.port = port;
    }
    if let Some(root) = overrides.data_root {
        config.data_root = root;
    }
    config.validate().context("Configuration validation failed")?;
    let config = Arc::new(config);

    info!(
        node = %config.node_name,
        data_root = %config.data_root.display(),
        "algo-agent starting (PID: {})",
        std::process::id()
    );
    tokio::fs::create_dir_all(&config.data_root)
        .await
        .with_context(|| format!("Failed to create data root {}", config.data_root.display()))?;

    // Adapters
    let docker = Arc::new(
        DockerRuntime::new(
            config.runtime.docker_socket_path.clone(),
            config.runtime.memory_bytes,
            config.runtime.interpreter.clone(),
        )
        .context("Failed to initialize container runtime")?,
    );
    docker.healthcheck().await.context("Docker daemon is not reachable")?;
    let runtime: Arc<dyn ContainerRuntime> = docker;

    let storage = create_object_storage(StorageBackend::Local {
        base_path: config.storage.base_path.clone(),
    })
    .context("Failed to initialize object storage")?;

    let bus = Arc::new(InProcessBus::with_default_capacity());
    let outbox_shutdown = CancellationToken::new();
    let outbox = Arc::new(OutboxRecorder::new(bus.clone(), config.data_root.join("outbox.jsonl")))
        .start(outbox_shutdown.clone());
    let notifier = Notifier::new(bus.clone(), config.services.clone());

    let ctx = AgentContext {
        config: config.clone(),
        runtime: runtime.clone(),
        storage,
        notifier: notifier.clone(),
    };

    // Registries, orchestrators, reconcilers
    let train = KindStack::<TrainingTaskRecord>::new(&config, &ctx);
    let eval = KindStack::<EvalTaskRecord>::new(&config, &ctx);
    let extract = KindStack::<ExtractTaskRecord>::new(&config, &ctx);
    let deploy = KindStack::<DeployServiceRecord>::new(&config, &ctx);

    let training = Arc::new(TrainingOrchestrator::new(train.lifecycle.clone()));
    let evaluation = Arc::new(EvaluationOrchestrator::new(eval.lifecycle.clone()));
    let extraction = Arc::new(ExtractionOrchestrator::new(extract.lifecycle.clone()));
    let deployment = Arc::new(DeployOrchestrator::new(deploy.lifecycle.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        training.clone(),
        evaluation.clone(),
        extraction.clone(),
        deployment.clone(),
    ));

    let shutdown = CancellationToken::new();
    let reconcilers = vec![
        train.reconcile(&config, &shutdown),
        eval.reconcile(&config, &shutdown),
        extract.reconcile(&config, &shutdown),
        deploy.reconcile(&config, &shutdown),
    ];

    let router = app(AppState {
        dispatcher,
        training,
        evaluation,
        extraction,
        deploy: deployment,
    });

    let addr = format!("{}:{}", config.http.bind_address, config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Agent listening on {}", addr);

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    info!("Agent shutting down");
    shutdown.cancel();
    for handle in reconcilers {
        if let Err(e) = handle.await {
            warn!(error = %e, "Reconciler task ended abnormally");
        }
    }
    train.stop();
    eval.stop();
    extract.stop();
    deploy.stop();

    notifier.node_offline(&config.node_name).await;
    runtime.close().await;

    outbox_shutdown.cancel();
    if let Err(e) = outbox.await {
        warn!(error = %e, "Outbox recorder ended abnormally");
    }

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
