use anyhow::{Context, Result};
use octocrab::Octocrab;
use serde::Deserialize;

use crate::config::{DEFAULT_API_URL, RunnerArch};

/// Build an authenticated Octocrab client against `api_url`.
pub fn client(token: &str, api_url: &str) -> Result<Octocrab> {
    let mut builder = Octocrab::builder().personal_token(token.to_string());
    if api_url.trim_end_matches('/') != DEFAULT_API_URL {
        builder = builder
            .base_uri(api_url)
            .with_context(|| format!("Invalid GitHub API URL: {}", api_url))?;
    }
    builder.build().context("Failed to build GitHub client")
}

/// A short-lived token the runner agent uses once to register itself.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationToken {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Issue a repository-scoped runner registration token.
pub async fn create_registration_token(client: &Octocrab, owner: &str, repo: &str) -> Result<RegistrationToken> {
    client
        .post(registration_token_route(owner, repo), None::<&()>)
        .await
        .with_context(|| format!("Failed to issue a runner registration token for {}/{}", owner, repo))
}

fn registration_token_route(owner: &str, repo: &str) -> String {
    format!("/repos/{}/{}/actions/runners/registration-token", owner, repo)
}

/// Release tarball of the runner agent for Linux.
pub fn runner_download_url(version: &str, arch: RunnerArch) -> String {
    let version = version.trim_start_matches('v');
    format!(
        "https://github.com/actions/runner/releases/download/v{v}/{file}",
        v = version,
        file = runner_tarball(version, arch)
    )
}

pub fn runner_tarball(version: &str, arch: RunnerArch) -> String {
    format!("actions-runner-linux-{}-{}.tar.gz", arch, version.trim_start_matches('v'))
}
