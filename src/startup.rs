//! The bash script GCE runs on first boot to install and start the runner agent.

use crate::config::RunnerArch;
use crate::github;
use crate::readiness::{READY_LABEL, READY_VALUE};

pub const RUNNER_DIR: &str = "/actions-runner";

#[derive(Debug, Clone)]
pub struct StartupScript {
    pub vm_name: String,
    pub zone: String,
    pub project: Option<String>,
    pub runner_url: String,
    pub registration_token: String,
    pub runner_version: String,
    pub runner_arch: RunnerArch,
    pub actions_preinstalled: bool,
}

impl StartupScript {
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = vec!["#!/bin/bash".into(), "set -e".into()];

        if self.actions_preinstalled {
            lines.push(format!("cd {}", RUNNER_DIR));
        } else {
            let tarball = github::runner_tarball(&self.runner_version, self.runner_arch);
            lines.push(format!("mkdir -p {}", RUNNER_DIR));
            lines.push(format!("cd {}", RUNNER_DIR));
            lines.push("echo download_actions_runner".into());
            lines.push(format!(
                "curl --silent --fail -o {} -L {}",
                tarball,
                github::runner_download_url(&self.runner_version, self.runner_arch)
            ));
            lines.push(format!("tar xzf ./{}", tarball));
        }

        lines.push("echo configuring_actions_runner".into());
        lines.push(format!(
            "RUNNER_ALLOW_RUNASROOT=1 ./config.sh --url {} --token {} --labels {} --disableupdate --ephemeral --unattended",
            self.runner_url, self.registration_token, self.vm_name
        ));

        lines.push("echo adding_gh_ready_label".into());
        let project = self
            .project
            .as_deref()
            .map(|p| format!(" --project={}", p))
            .unwrap_or_default();
        lines.push(format!(
            "gcloud compute instances add-labels {}{} --zone={} --labels={}={}",
            self.vm_name, project, self.zone, READY_LABEL, READY_VALUE
        ));

        lines.push("echo starting_github_actions_runner".into());
        lines.push("RUNNER_ALLOW_RUNASROOT=1 ./run.sh".into());

        let mut script = lines.join("\n");
        script.push('\n');
        script
    }
}
