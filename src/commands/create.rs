use anyhow::{Result, bail};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use crate::{
    actions, config,
    config::{CreateArgs, GcpArgs, RunContext},
    gcloud::{Gcloud, InstanceSpec},
    github,
    readiness::{self, Readiness},
    startup::StartupScript,
};

pub const RUNNER_LABEL_OUTPUT: &str = "runner_label";

/// Everything `provision` needs once a registration token has been issued.
#[derive(Debug, Clone)]
pub struct Provision<'a> {
    pub vm_name: &'a str,
    pub runner_url: &'a str,
    pub registration_token: &'a str,
    pub service_account_key: Option<&'a str>,
    pub output_file: Option<&'a Path>,
}

pub async fn run(gcp: &GcpArgs, args: &CreateArgs, ctx: &RunContext) -> Result<()> {
    let (owner, repo) = ctx.owner_repo()?;
    let vm_name = ctx.vm_name(gcp.vm_name.as_deref())?;
    let runner_url = ctx.runner_url()?;

    let api_token = config::github_token(args.gh_api_token.as_deref())?;
    actions::add_mask(&api_token);
    let gh = github::client(&api_token, &ctx.api_url)?;
    let registration = github::create_registration_token(&gh, &owner, &repo).await?;
    actions::add_mask(&registration.token);
    actions::success(format!(
        "Got a runner registration token for {}/{}",
        owner.cyan(),
        repo.cyan()
    ));
    if let Some(expires_at) = &registration.expires_at {
        actions::debug(format!("Registration token expires at {}", expires_at));
    }

    let gcloud = Gcloud::from_args(gcp);
    let plan = Provision {
        vm_name: &vm_name,
        runner_url: &runner_url,
        registration_token: &registration.token,
        service_account_key: gcp.gcp_service_account_key.as_deref(),
        output_file: ctx.output_file.as_deref(),
    };
    provision(&gcloud, args, &plan)
}

/// Authenticate, create the VM and wait for its runner agent to come up.
/// The `runner_label` output is set even when the wait times out so a later
/// delete step can still find the VM.
pub fn provision(gcloud: &Gcloud, args: &CreateArgs, plan: &Provision<'_>) -> Result<()> {
    super::authenticate(gcloud, plan.service_account_key)?;

    let script = StartupScript {
        vm_name: plan.vm_name.to_string(),
        zone: gcloud.zone().to_string(),
        project: gcloud.project().map(str::to_string),
        runner_url: plan.runner_url.to_string(),
        registration_token: plan.registration_token.to_string(),
        runner_version: args.gh_runner_version.clone(),
        runner_arch: args.gh_runner_arch,
        actions_preinstalled: args.actions_preinstalled,
    };
    let spec = InstanceSpec {
        name: plan.vm_name.to_string(),
        image_project: args.gcp_image_project.clone(),
        image_family: args.gcp_image_family.clone(),
        machine_type: args.gcp_machine_type.clone(),
        startup_script: script.render(),
    };

    actions::info(format!(
        "Creating GCE instance {} ({}, {}/{}) in {}",
        plan.vm_name.cyan(),
        spec.machine_type,
        spec.image_project,
        spec.image_family,
        gcloud.zone()
    ));
    gcloud.create_instance(&spec)?;
    actions::success(format!("Created GCE instance {}", plan.vm_name.cyan()));

    let outcome = wait_until_ready(gcloud, args, plan.vm_name);
    actions::set_output(plan.output_file, RUNNER_LABEL_OUTPUT, plan.vm_name)?;

    match outcome? {
        Readiness::Ready { attempts, elapsed } => {
            actions::debug(format!("Ready after {} check(s) in {:.1}s", attempts, elapsed.as_secs_f64()));
            actions::success(format!("{} is ready and accepting work", plan.vm_name.cyan()));
            Ok(())
        }
        Readiness::TimedOut { attempts, elapsed } => {
            actions::debug(format!("Gave up after {} check(s) in {:.1}s", attempts, elapsed.as_secs_f64()));
            bail!(
                "VM {} was still not ready / registered with GitHub after {}s",
                plan.vm_name,
                args.ready_timeout_secs
            )
        }
    }
}

fn wait_until_ready(gcloud: &Gcloud, args: &CreateArgs, vm_name: &str) -> Result<Readiness> {
    let policy = args.readiness_policy();
    actions::info("Waiting for the instance to be ready and the runner agent running ...");

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{elapsed}]")?);
    pb.set_message(format!("waiting for {}", vm_name));
    pb.enable_steady_tick(Duration::from_millis(120));
    let hidden = pb.is_hidden();

    let outcome = readiness::wait_for_label(
        &policy,
        || gcloud.describe_labels(vm_name),
        |attempt| {
            if hidden {
                actions::info(format!(
                    "{} not ready yet, waiting {}s ...",
                    vm_name,
                    policy.interval.as_secs_f64()
                ));
            } else {
                pb.set_message(format!("waiting for {} (check {})", vm_name, attempt));
            }
        },
    );

    pb.finish_and_clear();
    outcome
}
