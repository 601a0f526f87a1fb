//! kube-runtime wiring
//!
//! The management plane runs one controller per watched kind and uses
//! finalizers so removals are never missed. The agent's VlanConfig controller
//! manages its per-node finalizer itself.

use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Error as FinalizerError, Event},
        watcher::Config,
    },
    ResourceExt,
};
use netplane_core::{VlanConfig, VlanStatus};
use std::{fmt::Display, sync::Arc};
use tracing::{error, info, instrument};

use super::{AgentHandler, Context, ManagerHandler, ReconcileError};

const VLAN_CONFIG_FINALIZER: &str = "netplane.io/manager-vlanconfig";
const VLAN_STATUS_FINALIZER: &str = "netplane.io/manager-vlanstatus";

/// Keeps ClusterNetworks and their MTU source in line with VlanConfigs.
pub struct VlanConfigController;

impl VlanConfigController {
    pub async fn run(ctx: Arc<Context<ManagerHandler>>) {
        let api: Api<VlanConfig> = Api::all(ctx.client.clone());

        Controller::new(api, Config::default())
            .shutdown_on_signal()
            .run(reconcile_vlan_config, error_policy, ctx)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => info!(name = %obj.name, "Reconciled VlanConfig"),
                    Err(e) => error!(error = %e, "Reconcile error"),
                }
            })
            .await;
    }
}

/// Aggregates VlanStatus readiness into ClusterNetworks.
pub struct VlanStatusController;

impl VlanStatusController {
    pub async fn run(ctx: Arc<Context<ManagerHandler>>) {
        let api: Api<VlanStatus> = Api::all(ctx.client.clone());

        Controller::new(api, Config::default())
            .shutdown_on_signal()
            .run(reconcile_vlan_status, error_policy, ctx)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => info!(name = %obj.name, "Reconciled VlanStatus"),
                    Err(e) => error!(error = %e, "Reconcile error"),
                }
            })
            .await;
    }
}

/// Builds this node's VLAN devices for the VlanConfigs selecting it.
pub struct AgentController;

impl AgentController {
    pub async fn run(ctx: Arc<Context<AgentHandler>>) {
        let api: Api<VlanConfig> = Api::all(ctx.client.clone());

        Controller::new(api, Config::default())
            .shutdown_on_signal()
            .run(reconcile_agent, error_policy, ctx)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => info!(name = %obj.name, "Reconciled VlanConfig"),
                    Err(e) => error!(error = %e, "Reconcile error"),
                }
            })
            .await;
    }
}

#[instrument(skip(vc, ctx), fields(name = %vc.name_any()))]
async fn reconcile_vlan_config(
    vc: Arc<VlanConfig>,
    ctx: Arc<Context<ManagerHandler>>,
) -> Result<Action, FinalizerError<ReconcileError>> {
    let api: Api<VlanConfig> = Api::all(ctx.client.clone());

    finalizer(&api, VLAN_CONFIG_FINALIZER, vc, |event| async {
        match event {
            Event::Apply(vc) => ctx
                .handler
                .ensure_cluster_network(&vc)
                .await
                .map(|()| Action::requeue(ctx.settings.resync())),
            Event::Cleanup(vc) => ctx
                .handler
                .on_vlan_config_remove(&vc)
                .await
                .map(|()| Action::await_change()),
        }
    })
    .await
}

#[instrument(skip(vs, ctx), fields(name = %vs.name_any()))]
async fn reconcile_vlan_status(
    vs: Arc<VlanStatus>,
    ctx: Arc<Context<ManagerHandler>>,
) -> Result<Action, FinalizerError<ReconcileError>> {
    let api: Api<VlanStatus> = Api::all(ctx.client.clone());

    finalizer(&api, VLAN_STATUS_FINALIZER, vs, |event| async {
        match event {
            Event::Apply(vs) => ctx
                .handler
                .set_cluster_network_ready(&vs)
                .await
                .map(|()| Action::requeue(ctx.settings.resync())),
            Event::Cleanup(vs) => ctx
                .handler
                .set_cluster_network_unready(&vs)
                .await
                .map(|()| Action::await_change()),
        }
    })
    .await
}

#[instrument(skip(vc, ctx), fields(name = %vc.name_any()))]
async fn reconcile_agent(
    vc: Arc<VlanConfig>,
    ctx: Arc<Context<AgentHandler>>,
) -> Result<Action, ReconcileError> {
    if vc.is_deleting() {
        ctx.handler.on_remove(&vc).await?;
        return Ok(Action::await_change());
    }
    ctx.handler.on_change(&vc).await?;
    Ok(Action::requeue(ctx.settings.resync()))
}

fn error_policy<K, E: Display, H>(_obj: Arc<K>, error: &E, ctx: Arc<Context<H>>) -> Action {
    error!(error = %error, "Reconcile failed");
    Action::requeue(ctx.settings.error_backoff())
}
