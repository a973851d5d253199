//! etcd Kubernetes Operator binary.
//!
//! Runs the EtcdCluster controller against the cluster the process is
//! configured for.

use etcd_operator::controller::{
    ClusterController, ControllerContext, ReconcileAction, cluster_error_policy, cluster_key,
};
use etcd_operator::crd::EtcdCluster;
use etcd_operator::ReconcilerConfig;
use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, CustomResourceExt};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("etcd_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    if std::env::args().any(|arg| arg == "--generate-crds") {
        generate_crds()?;
        return Ok(());
    }

    tracing::info!("Starting etcd Kubernetes Operator");

    let config = ReconcilerConfig::from_env()?;
    tracing::info!(
        store_timeout_ms = config.store_timeout_ms,
        max_boot_member_deferrals = ?config.max_boot_member_deferrals,
        "Loaded reconciler configuration"
    );

    let client = Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let ctx = Arc::new(ControllerContext::new(client.clone(), config));
    run_cluster_controller(client, ctx).await
}

/// Run the EtcdCluster controller.
async fn run_cluster_controller(client: Client, ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    tracing::info!("Starting EtcdCluster controller");

    let clusters: Api<EtcdCluster> = Api::all(client);
    let controller = ClusterController::new(ctx.clone());
    let states = ctx.clone();

    Controller::new(clusters, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            move |cluster, _ctx| {
                let controller = controller.clone();
                async move {
                    match controller.reconcile(cluster).await {
                        Ok(ReconcileAction::Requeue(duration)) => Ok(Action::requeue(duration)),
                        Ok(ReconcileAction::Done) => Ok(Action::await_change()),
                        Err(e) => Err(e),
                    }
                }
            },
            cluster_error_policy,
            ctx,
        )
        .for_each(|result| {
            let states = states.clone();
            async move {
                match result {
                    Ok((obj, action)) => {
                        tracing::debug!(cluster = %obj.name, ?action, "Reconciled cluster");
                    }
                    Err(ControllerError::ObjectNotFound(obj)) => {
                        // Deleted clusters leave the cache before a final pass can run.
                        let namespace = obj.namespace.as_deref().unwrap_or_default();
                        let key = cluster_key(namespace, &obj.name);
                        tracing::debug!(cluster = %key, "Cluster is gone");
                        states.forget_cluster(&key);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Cluster controller stream error");
                    }
                }
            }
        })
        .await;

    tracing::info!("Controller stopped");
    Ok(())
}

/// Print the CRD as YAML.
fn generate_crds() -> anyhow::Result<()> {
    println!("---");
    println!("{}", serde_yaml::to_string(&EtcdCluster::crd())?);
    Ok(())
}
