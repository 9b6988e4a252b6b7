pub mod create;
pub mod delete;
pub mod status;

use anyhow::{Result, bail};
use std::str::FromStr;

use crate::{actions, gcloud::Gcloud};

/// The `command` input of the pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCommand {
    Create,
    Delete,
}

impl FromStr for ActionCommand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "create" => Ok(ActionCommand::Create),
            "delete" => Ok(ActionCommand::Delete),
            other => bail!("Invalid command parameter: {}", other),
        }
    }
}

/// Activate the service-account key when one is configured; otherwise rely on
/// whatever credentials gcloud already has.
pub fn authenticate(gcloud: &Gcloud, service_account_key: Option<&str>) -> Result<()> {
    let Some(key) = service_account_key.map(str::trim).filter(|k| !k.is_empty()) else {
        actions::info("No service-account key given, using ambient gcloud credentials");
        return Ok(());
    };

    actions::info("Authenticating gcloud ...");
    gcloud.activate_service_account(key)?;
    actions::success("Authenticated gcloud");
    Ok(())
}
