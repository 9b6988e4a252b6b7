use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use url::Url;

use crate::readiness::ReadinessPolicy;

/// GCE instance names: lowercase letters, digits and hyphens, at most 63 chars.
pub const MAX_INSTANCE_NAME_LEN: usize = 63;

pub const DEFAULT_SERVER_URL: &str = "https://github.com";
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Cloud settings shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct GcpArgs {
    /// GCP project that owns the runner VM
    #[arg(long, env = "INPUT_GCP_PROJECT")]
    pub gcp_project: Option<String>,

    /// Zone the VM lives in
    #[arg(long, env = "INPUT_GCP_ZONE")]
    pub gcp_zone: String,

    /// Service-account key (JSON). When absent, ambient gcloud credentials are used.
    #[arg(long, env = "INPUT_GCP_SERVICE_ACCOUNT_KEY", hide_env_values = true)]
    pub gcp_service_account_key: Option<String>,

    /// Name of the VM; derived from the repository and run when omitted
    #[arg(long, env = "INPUT_VM_NAME")]
    pub vm_name: Option<String>,

    /// Path to the gcloud binary
    #[arg(long, env = "GCLOUD_BIN", default_value = "gcloud")]
    pub gcloud_bin: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunnerArch {
    X64,
    Arm64,
}

impl std::fmt::Display for RunnerArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerArch::X64 => write!(f, "x64"),
            RunnerArch::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Settings only `create` needs.
#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    /// Version of the actions runner agent to install (e.g. 2.319.1)
    #[arg(long, env = "INPUT_GH_RUNNER_VERSION")]
    pub gh_runner_version: String,

    /// Project hosting the boot image
    #[arg(long, env = "INPUT_GCP_IMAGE_PROJECT")]
    pub gcp_image_project: String,

    /// Image family to boot from
    #[arg(long, env = "INPUT_GCP_IMAGE_FAMILY")]
    pub gcp_image_family: String,

    /// Machine type (e.g. e2-standard-4)
    #[arg(long, env = "INPUT_GCP_MACHINE_TYPE")]
    pub gcp_machine_type: String,

    /// Token allowed to issue runner registration tokens for the repository
    #[arg(
        long,
        env = "INPUT_GH_API_TOKEN_TO_ISSUE_RUNNER_TOKENS",
        hide_env_values = true
    )]
    pub gh_api_token: Option<String>,

    /// Seconds to wait for the runner to report ready
    #[arg(long, env = "INPUT_READY_TIMEOUT_SECS", default_value_t = 120)]
    pub ready_timeout_secs: u64,

    /// Seconds between readiness checks
    #[arg(long, env = "INPUT_READY_POLL_SECS", default_value_t = 1)]
    pub ready_poll_secs: u64,

    /// Runner agent architecture
    #[arg(long, env = "INPUT_GH_RUNNER_ARCH", value_enum, default_value_t = RunnerArch::X64)]
    pub gh_runner_arch: RunnerArch,

    /// The image already has the runner unpacked in /actions-runner
    #[arg(long, env = "INPUT_ACTIONS_PREINSTALLED")]
    pub actions_preinstalled: bool,
}

impl CreateArgs {
    pub fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            timeout: Duration::from_secs(self.ready_timeout_secs),
            interval: Duration::from_secs(self.ready_poll_secs),
            ..ReadinessPolicy::default()
        }
    }
}

/// Values the pipeline host provides through its environment.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// `owner/repo`
    pub repository: Option<String>,
    pub repository_owner: Option<String>,
    pub run_id: Option<String>,
    pub run_attempt: String,
    pub server_url: String,
    pub api_url: String,
    pub output_file: Option<PathBuf>,
}

impl RunContext {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        RunContext {
            repository: get("GITHUB_REPOSITORY"),
            repository_owner: get("GITHUB_REPOSITORY_OWNER"),
            run_id: get("GITHUB_RUN_ID"),
            run_attempt: get("GITHUB_RUN_ATTEMPT").unwrap_or_else(|| "1".to_string()),
            server_url: get("GITHUB_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            api_url: get("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            output_file: get("GITHUB_OUTPUT").map(PathBuf::from),
        }
    }

    /// Split the repository into (owner, repo). The explicit owner variable wins.
    pub fn owner_repo(&self) -> Result<(String, String)> {
        let full = self
            .repository
            .as_deref()
            .context("GITHUB_REPOSITORY is not set; expected `owner/repo`")?;
        let (owner, repo) = parse_repository(full)?;
        let owner = self.repository_owner.clone().unwrap_or(owner);
        Ok((owner, repo))
    }

    /// URL the runner agent registers against, e.g. `https://github.com/acme/app`.
    pub fn runner_url(&self) -> Result<String> {
        let (owner, repo) = self.owner_repo()?;
        let base = Url::parse(&self.server_url)
            .with_context(|| format!("Invalid GITHUB_SERVER_URL: {}", self.server_url))?;
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("GITHUB_SERVER_URL cannot be a base: {}", base))?
            .pop_if_empty()
            .push(&owner)
            .push(&repo);
        Ok(url.to_string())
    }

    /// The VM name for this run: the explicit override, or one derived from
    /// the repository, run id and attempt so `create` and `delete` agree.
    pub fn vm_name(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
            validate_instance_name(name)?;
            return Ok(name.to_string());
        }

        let run_id = self
            .run_id
            .as_deref()
            .context("GITHUB_RUN_ID is not set; pass --vm-name to name the VM explicitly")?;
        let repo = match self.repository.as_deref() {
            Some(full) => parse_repository(full)?.1,
            None => String::new(),
        };
        Ok(derive_vm_name(&repo, run_id, &self.run_attempt))
    }
}

pub(crate) fn parse_repository(full: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = full.trim().splitn(2, '/').collect();
    match parts.as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => bail!("Cannot parse repository `{}`; expected `owner/repo`", full),
    }
}

/// `gh-<repo>-<run_id>-<attempt>`, squeezed into a valid GCE instance name.
pub fn derive_vm_name(repo: &str, run_id: &str, run_attempt: &str) -> String {
    let suffix = format!("-{}-{}", slug(run_id), slug(run_attempt));
    let budget = MAX_INSTANCE_NAME_LEN.saturating_sub("gh-".len() + suffix.len());

    let mut repo_part: String = slug(repo).chars().take(budget).collect();
    while repo_part.ends_with('-') {
        repo_part.pop();
    }

    let name = if repo_part.is_empty() {
        format!("gh{}", suffix)
    } else {
        format!("gh-{}{}", repo_part, suffix)
    };
    name.chars().take(MAX_INSTANCE_NAME_LEN).collect()
}

/// Lowercase, map anything outside `[a-z0-9]` to `-`, squash runs of `-`.
fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

pub fn validate_instance_name(name: &str) -> Result<()> {
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if name.len() > MAX_INSTANCE_NAME_LEN || !starts_with_letter || !valid_chars || name.ends_with('-') {
        bail!(
            "Invalid VM name `{}`: use 1-{} lowercase letters, digits or hyphens, starting with a letter and not ending with a hyphen",
            name,
            MAX_INSTANCE_NAME_LEN
        );
    }
    Ok(())
}

/// Resolve a GitHub token: the explicit input, then `gh auth token`, then GITHUB_TOKEN.
pub fn github_token(explicit: Option<&str>) -> Result<String> {
    resolve_token(explicit, gh_cli_token, || std::env::var("GITHUB_TOKEN").ok())
}

/// First non-blank token from the explicit value, the gh CLI and the environment,
/// in that order. Later sources are not consulted once one yields a token.
pub(crate) fn resolve_token(
    explicit: Option<&str>,
    gh_cli: impl FnOnce() -> Option<String>,
    env: impl FnOnce() -> Option<String>,
) -> Result<String> {
    let non_blank = |t: String| Some(t.trim().to_string()).filter(|t| !t.is_empty());

    if let Some(token) = explicit.map(str::to_string).and_then(non_blank) {
        return Ok(token);
    }
    if let Some(token) = gh_cli().and_then(non_blank) {
        return Ok(token);
    }
    env().and_then(non_blank).context(
        "No GitHub token found. Pass --gh-api-token, run `gh auth login`, or set GITHUB_TOKEN.",
    )
}

fn gh_cli_token() -> Option<String> {
    let output = Command::new("gh").args(["auth", "token"]).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx(vars: &[(&str, &str)]) -> RunContext {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        RunContext::from_lookup(|k| map.get(k).cloned())
    }

    // ── RunContext ────────────────────────────────────────────────────────

    #[test]
    fn test_defaults_when_env_is_empty() {
        let c = ctx(&[]);
        assert_eq!(c.run_attempt, "1");
        assert_eq!(c.server_url, DEFAULT_SERVER_URL);
        assert_eq!(c.api_url, DEFAULT_API_URL);
        assert!(c.output_file.is_none());
        assert!(c.repository.is_none());
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let c = ctx(&[("GITHUB_RUN_ATTEMPT", ""), ("GITHUB_OUTPUT", "  ")]);
        assert_eq!(c.run_attempt, "1");
        assert!(c.output_file.is_none());
    }

    #[test]
    fn test_owner_repo_from_repository() {
        let c = ctx(&[("GITHUB_REPOSITORY", "acme/widgets")]);
        assert_eq!(c.owner_repo().unwrap(), ("acme".to_string(), "widgets".to_string()));
    }

    #[test]
    fn test_owner_variable_overrides_repository_owner() {
        let c = ctx(&[("GITHUB_REPOSITORY", "acme/widgets"), ("GITHUB_REPOSITORY_OWNER", "Acme-Org")]);
        assert_eq!(c.owner_repo().unwrap().0, "Acme-Org");
    }

    #[test]
    fn test_owner_repo_missing_repository_is_error() {
        let err = ctx(&[]).owner_repo().unwrap_err().to_string();
        assert!(err.contains("GITHUB_REPOSITORY"), "got: {}", err);
    }

    #[test]
    fn test_parse_repository_rejects_garbage() {
        assert!(parse_repository("no-slash").is_err());
        assert!(parse_repository("/repo").is_err());
        assert!(parse_repository("owner/").is_err());
        assert!(parse_repository("a/b/c").is_err());
    }

    #[test]
    fn test_runner_url_default_server() {
        let c = ctx(&[("GITHUB_REPOSITORY", "acme/widgets")]);
        assert_eq!(c.runner_url().unwrap(), "https://github.com/acme/widgets");
    }

    #[test]
    fn test_runner_url_enterprise_server_with_trailing_slash() {
        let c = ctx(&[
            ("GITHUB_REPOSITORY", "acme/widgets"),
            ("GITHUB_SERVER_URL", "https://ghe.example.com/"),
        ]);
        assert_eq!(c.runner_url().unwrap(), "https://ghe.example.com/acme/widgets");
    }

    // ── VM names ──────────────────────────────────────────────────────────

    #[test]
    fn test_derive_vm_name_basic() {
        assert_eq!(derive_vm_name("widgets", "123456", "1"), "gh-widgets-123456-1");
    }

    #[test]
    fn test_derive_vm_name_sanitises_repo() {
        assert_eq!(derive_vm_name("My_Repo.rs", "9", "2"), "gh-my-repo-rs-9-2");
    }

    #[test]
    fn test_derive_vm_name_truncates_long_repo() {
        let repo = "a".repeat(100);
        let name = derive_vm_name(&repo, "98765432101", "3");
        assert_eq!(name.len(), MAX_INSTANCE_NAME_LEN);
        assert!(name.ends_with("-98765432101-3"));
        validate_instance_name(&name).unwrap();
    }

    #[test]
    fn test_derive_vm_name_truncation_does_not_leave_double_hyphen() {
        // Cut point lands right after a hyphen in the slug.
        let repo = format!("{}-tail", "b".repeat(55));
        let name = derive_vm_name(&repo, "1", "1");
        assert!(!name.contains("--"), "got: {}", name);
        validate_instance_name(&name).unwrap();
    }

    #[test]
    fn test_derive_vm_name_without_repo() {
        assert_eq!(derive_vm_name("", "42", "1"), "gh-42-1");
    }

    #[test]
    fn test_vm_name_prefers_explicit_override() {
        let c = ctx(&[("GITHUB_RUN_ID", "1")]);
        assert_eq!(c.vm_name(Some("custom-runner")).unwrap(), "custom-runner");
    }

    #[test]
    fn test_vm_name_rejects_invalid_override() {
        let c = ctx(&[]);
        assert!(c.vm_name(Some("Bad_Name")).is_err());
    }

    #[test]
    fn test_vm_name_requires_run_id_without_override() {
        let err = ctx(&[]).vm_name(None).unwrap_err().to_string();
        assert!(err.contains("--vm-name"), "got: {}", err);
    }

    #[test]
    fn test_vm_name_is_stable_across_create_and_delete() {
        let vars = [("GITHUB_REPOSITORY", "acme/widgets"), ("GITHUB_RUN_ID", "777"), ("GITHUB_RUN_ATTEMPT", "2")];
        assert_eq!(ctx(&vars).vm_name(None).unwrap(), ctx(&vars).vm_name(None).unwrap());
        assert_eq!(ctx(&vars).vm_name(None).unwrap(), "gh-widgets-777-2");
    }

    #[test]
    fn test_validate_instance_name() {
        assert!(validate_instance_name("runner-1").is_ok());
        assert!(validate_instance_name("1runner").is_err());
        assert!(validate_instance_name("runner-").is_err());
        assert!(validate_instance_name("").is_err());
        assert!(validate_instance_name(&"r".repeat(64)).is_err());
    }

    // ── github_token ──────────────────────────────────────────────────────

    #[test]
    fn test_github_token_prefers_explicit_value() {
        assert_eq!(github_token(Some("  ghp_explicit ")).unwrap(), "ghp_explicit");
    }

    #[test]
    fn test_resolve_token_explicit_skips_other_sources() {
        let token = resolve_token(
            Some("from-input"),
            || panic!("gh must not be consulted"),
            || panic!("env must not be consulted"),
        )
        .unwrap();
        assert_eq!(token, "from-input");
    }

    #[test]
    fn test_resolve_token_falls_back_to_gh_cli() {
        let token = resolve_token(
            Some("   "),
            || Some("gho_cli\n".to_string()),
            || panic!("env must not be consulted"),
        )
        .unwrap();
        assert_eq!(token, "gho_cli");
    }

    #[test]
    fn test_resolve_token_falls_back_to_env_last() {
        let token = resolve_token(None, || Some(String::new()), || Some("ghs_env".to_string())).unwrap();
        assert_eq!(token, "ghs_env");
    }

    #[test]
    fn test_resolve_token_missing_everywhere_is_helpful_error() {
        let err = resolve_token(None, || None, || None).unwrap_err().to_string();
        assert!(err.contains("GITHUB_TOKEN") && err.contains("gh auth login"), "got: {}", err);
    }

    #[test]
    fn test_runner_arch_display() {
        assert_eq!(RunnerArch::X64.to_string(), "x64");
        assert_eq!(RunnerArch::Arm64.to_string(), "arm64");
    }
}
