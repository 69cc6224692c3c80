//! Runs one task of the cluster, either the parameter server or a worker.

mod error;

use std::{collections::BTreeSet, fs, io, net::SocketAddr, path::Path, sync::Arc};

use comms::{
    ClusterRegistry,
    cluster::{PS_ROLE, WORKER_ROLE},
    specs::{NodeConfig, ServerSpec, WorkerSpec},
};
use log::{error, info, warn};
use parameter_server::{
    Checkpoint, CheckpointErr, CheckpointManager, FsPersistence, LifecycleConfig,
    LifecycleCoordinator, ParameterServer, ParameterStore, Persistence, ShutdownReport,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use worker::{AgentConfig, Quadratic, RemoteClient, WorkerAgent, WorkerSession};

pub use error::NodeErr;

/// Reads a `NodeConfig` from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<NodeConfig, NodeErr> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Runs the task described by `config` until it finishes.
///
/// # Arguments
/// * `config` - The whole node configuration.
/// * `shutdown` - Cancelled to stop early, for example on an interrupt.
///
/// # Returns
/// An error if the configuration is unusable or the task failed.
pub async fn run(config: NodeConfig, shutdown: CancellationToken) -> Result<(), NodeErr> {
    let registry = ClusterRegistry::new(config.cluster)?;
    let index = config.task.index;

    // Every block lives on a single parameter server task.
    let ps_tasks = registry.tasks(PS_ROLE)?;
    if ps_tasks.len() != 1 {
        return Err(NodeErr::invalid(format!(
            "expected exactly one {PS_ROLE} task, got {}",
            ps_tasks.len()
        )));
    }
    let ps_addr = ps_tasks[0];

    match config.task.role.as_str() {
        PS_ROLE => {
            let spec = config
                .server
                .ok_or_else(|| NodeErr::invalid("the ps role needs a `server` section"))?;
            let addr = registry.resolve(PS_ROLE, index)?;

            let listener = TcpListener::bind(addr).await?;
            serve_ps(listener, spec, shutdown).await?;
        }
        WORKER_ROLE => {
            let spec = config
                .worker
                .ok_or_else(|| NodeErr::invalid("the worker role needs a `worker` section"))?;
            registry.resolve(WORKER_ROLE, index)?;

            run_worker(ps_addr, index, spec, shutdown).await?;
        }
        role => return Err(NodeErr::invalid(format!("no task can run role {role:?}"))),
    }

    Ok(())
}

/// Runs the parameter server on `listener` until training stops.
///
/// Resumes from the newest complete checkpoint when checkpointing is configured and one
/// exists, otherwise starts from freshly initialized blocks.
///
/// # Arguments
/// * `listener` - Where workers connect.
/// * `spec` - The parameter server specification.
/// * `shutdown` - Cancelled to stop before the target step.
///
/// # Returns
/// What happened during the shutdown.
pub async fn serve_ps(
    listener: TcpListener,
    spec: ServerSpec,
    shutdown: CancellationToken,
) -> Result<ShutdownReport, NodeErr> {
    let persistence = spec
        .checkpoint
        .as_ref()
        .map(|ckpt| Arc::new(FsPersistence::new(&ckpt.dir)) as Arc<dyn Persistence>);

    let recovered = match &persistence {
        Some(persistence) => CheckpointManager::recover(Arc::clone(persistence)).await?,
        None => None,
    };

    let store = match &recovered {
        Some(checkpoint) => {
            check_recovered_blocks(checkpoint, &spec)?;
            info!(step = checkpoint.global_step; "resuming from checkpoint");
            ParameterStore::from_checkpoint(checkpoint)
        }
        None => ParameterStore::from_specs(&spec.blocks, spec.seed)?,
    };

    let checkpoints = match (persistence, &spec.checkpoint) {
        (Some(persistence), Some(ckpt)) => {
            let mut manager = CheckpointManager::new(store.clone(), persistence, ckpt.into());
            if let Some(checkpoint) = &recovered {
                manager = manager.with_committed(checkpoint.global_step);
            }
            Some(Arc::new(manager))
        }
        _ => None,
    };

    let lifecycle = LifecycleConfig {
        target_step: spec.target_step,
        grace_period: spec.grace_period(),
    };
    let coordinator = Arc::new(LifecycleCoordinator::new(
        store.clone(),
        checkpoints.clone(),
        lifecycle,
    ));

    let periodic = checkpoints.map(|manager| {
        let stop = coordinator.stop_token();
        tokio::spawn(async move { manager.run(stop).await })
    });

    let interrupt = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            shutdown.cancelled().await;
            coordinator.shutdown();
        })
    };

    let server = ParameterServer::new(store, Arc::clone(&coordinator));
    let (report, served) = drive(&coordinator, server.serve(listener)).await;
    interrupt.abort();

    if let Some(periodic) = periodic {
        if let Err(e) = periodic.await {
            warn!("checkpoint loop ended abnormally: {e}");
        }
    }

    served?;
    Ok(report?)
}

/// Runs one worker agent against the parameter server at `ps_addr`.
///
/// # Arguments
/// * `ps_addr` - The parameter server endpoint.
/// * `task_index` - This worker's task index.
/// * `spec` - The worker specification.
/// * `shutdown` - Cancelled to stop the agent after its current step.
///
/// # Returns
/// The agent's final session.
pub async fn run_worker(
    ps_addr: SocketAddr,
    task_index: usize,
    spec: WorkerSpec,
    shutdown: CancellationToken,
) -> Result<WorkerSession, NodeErr> {
    info!(task_index = task_index; "training against {ps_addr}");

    let client = RemoteClient::new(ps_addr, task_index);
    let compute = Quadratic::from(spec.compute);
    let config = AgentConfig::from_spec(task_index, &spec);
    let agent = WorkerAgent::new(config, client, compute, shutdown);

    Ok(agent.run().await?)
}

/// Runs the lifecycle next to `serving`, stopping training early if serving fails.
async fn drive<F>(
    coordinator: &LifecycleCoordinator,
    serving: F,
) -> (Result<ShutdownReport, CheckpointErr>, io::Result<()>)
where
    F: Future<Output = io::Result<()>>,
{
    let serving = async {
        let res = serving.await;
        if let Err(e) = &res {
            error!("parameter server stopped serving: {e}");
            coordinator.shutdown();
        }
        res
    };

    tokio::join!(coordinator.run(), serving)
}

fn check_recovered_blocks(checkpoint: &Checkpoint, spec: &ServerSpec) -> Result<(), NodeErr> {
    let configured: BTreeSet<&str> = spec.blocks.iter().map(|b| b.id.as_str()).collect();
    let recovered: BTreeSet<&str> = checkpoint.blocks.keys().map(String::as_str).collect();

    if configured != recovered {
        return Err(NodeErr::invalid(format!(
            "checkpoint at step {} holds {recovered:?}, configured {configured:?}",
            checkpoint.global_step
        )));
    }

    for block in &spec.blocks {
        let len = checkpoint.blocks[block.id.as_str()].len();
        if len != block.len.get() {
            return Err(NodeErr::invalid(format!(
                "checkpointed block {:?} has {len} values, configured {}",
                block.id, block.len
            )));
        }
    }

    Ok(())
}
