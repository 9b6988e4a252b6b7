use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use std::io::IsTerminal;

use crate::{
    actions,
    config::{GcpArgs, RunContext},
    gcloud::Gcloud,
};

pub fn run(gcp: &GcpArgs, ctx: &RunContext, yes: bool) -> Result<()> {
    let vm_name = ctx.vm_name(gcp.vm_name.as_deref())?;

    // Pipelines have no terminal; only ask a human.
    if !yes && std::io::stdin().is_terminal() {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete GCE instance '{}' in {}?", vm_name, gcp.gcp_zone))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let gcloud = Gcloud::from_args(gcp);
    delete(&gcloud, gcp.gcp_service_account_key.as_deref(), &vm_name)
}

/// Tear the VM down. Deleting the VM disconnects the runner agent; GitHub
/// drops the ephemeral registration on its own.
pub fn delete(gcloud: &Gcloud, service_account_key: Option<&str>, vm_name: &str) -> Result<()> {
    super::authenticate(gcloud, service_account_key)?;

    actions::info(format!("Deleting GCE instance {} ...", vm_name.cyan()));
    gcloud.delete_instance(vm_name)?;
    actions::success(format!("Deleted GCE instance {}", vm_name.cyan()));
    Ok(())
}
