use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::GcpArgs;
use crate::readiness::{Labels, NOT_READY_VALUE, READY_LABEL};

/// The VM needs `compute-rw` so its startup script can label itself.
pub const INSTANCE_SCOPES: &str = "default,compute-rw";

/// Thin wrapper over the `gcloud` binary for one project and zone.
#[derive(Debug, Clone)]
pub struct Gcloud {
    bin: PathBuf,
    project: Option<String>,
    zone: String,
}

#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub name: String,
    pub image_project: String,
    pub image_family: String,
    pub machine_type: String,
    pub startup_script: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub machine_type: String,
    #[serde(default)]
    pub labels: Labels,
}

impl InstanceInfo {
    /// `machineType` comes back as a full resource URL; keep the last segment.
    pub fn machine_type_short(&self) -> &str {
        self.machine_type.rsplit('/').next().unwrap_or(&self.machine_type)
    }
}

#[derive(Debug, Deserialize)]
struct LabelsOnly {
    #[serde(default)]
    labels: Labels,
}

impl Gcloud {
    pub fn new(bin: impl Into<PathBuf>, project: Option<String>, zone: impl Into<String>) -> Self {
        Gcloud {
            bin: bin.into(),
            project: project.filter(|p| !p.trim().is_empty()),
            zone: zone.into(),
        }
    }

    pub fn from_args(args: &GcpArgs) -> Self {
        Gcloud::new(args.gcloud_bin.clone(), args.gcp_project.clone(), args.gcp_zone.clone())
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    /// Authenticate with a service-account key passed on stdin.
    pub fn activate_service_account(&self, key_json: &str) -> Result<()> {
        let args = ["--quiet", "auth", "activate-service-account", "--key-file", "-"];
        self.output(&args, Some(key_json.as_bytes()))
            .context("Failed to authenticate gcloud with the service-account key")?;
        Ok(())
    }

    /// Create the runner VM. The startup script travels through a temporary
    /// file so its content needs no escaping.
    pub fn create_instance(&self, spec: &InstanceSpec) -> Result<()> {
        let mut script = tempfile::NamedTempFile::new().context("Failed to create startup-script file")?;
        script
            .write_all(spec.startup_script.as_bytes())
            .context("Failed to write startup-script file")?;
        script.flush()?;

        let args = create_args(spec, &self.zone, script.path());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.status(&args)
            .with_context(|| format!("Failed to create instance '{}'", spec.name))
    }

    /// Labels currently set on the instance.
    pub fn describe_labels(&self, name: &str) -> Result<Labels> {
        let zone = format!("--zone={}", self.zone);
        let args = ["compute", "instances", "describe", name, zone.as_str(), "--format=json(labels)"];
        let stdout = self.output(&args, None)?;
        parse_labels(&stdout)
    }

    pub fn describe_instance(&self, name: &str) -> Result<InstanceInfo> {
        let zone = format!("--zone={}", self.zone);
        let args = [
            "compute",
            "instances",
            "describe",
            name,
            zone.as_str(),
            "--format=json(name,status,machineType,labels)",
        ];
        let stdout = self.output(&args, None)?;
        serde_json::from_str(&stdout).with_context(|| format!("Failed to parse description of instance '{}'", name))
    }

    pub fn delete_instance(&self, name: &str) -> Result<()> {
        let zone = format!("--zone={}", self.zone);
        self.status(&["--quiet", "compute", "instances", "delete", name, zone.as_str()])
            .with_context(|| format!("Failed to delete instance '{}'", name))
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.bin);
        if let Some(project) = &self.project {
            cmd.arg("--project").arg(project);
        }
        cmd.args(args);
        cmd
    }

    /// Run with inherited stdio so gcloud's own progress shows in the step log.
    fn status(&self, args: &[&str]) -> Result<()> {
        let status = self
            .command(args)
            .status()
            .with_context(|| format!("Failed to run `{}`", self.bin.display()))?;
        if !status.success() {
            bail!("`{} {}` exited with {}", self.bin.display(), first_words(args), status);
        }
        Ok(())
    }

    /// Run capturing stdout, optionally feeding `input` on stdin.
    fn output(&self, args: &[&str], input: Option<&[u8]>) -> Result<String> {
        let mut cmd = self.command(args);
        cmd.stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to run `{}`", self.bin.display()))?;
        if let Some(bytes) = input {
            let mut stdin = child.stdin.take().context("gcloud stdin was not captured")?;
            stdin.write_all(bytes).context("Failed to write to gcloud stdin")?;
        }
        let output = child.wait_with_output().context("Failed to wait for gcloud")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("`{} {}` failed: {}", self.bin.display(), first_words(args), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Arguments for `gcloud compute instances create`, minus the global flags.
pub(crate) fn create_args(spec: &InstanceSpec, zone: &str, script_path: &Path) -> Vec<String> {
    vec![
        "compute".to_string(),
        "instances".to_string(),
        "create".to_string(),
        spec.name.clone(),
        "--quiet".to_string(),
        format!("--zone={}", zone),
        format!("--scopes={}", INSTANCE_SCOPES),
        format!("--image-project={}", spec.image_project),
        format!("--image-family={}", spec.image_family),
        format!("--machine-type={}", spec.machine_type),
        format!("--metadata-from-file=startup-script={}", script_path.display()),
        format!("--labels={}={}", READY_LABEL, NOT_READY_VALUE),
    ]
}

pub(crate) fn parse_labels(json: &str) -> Result<Labels> {
    let parsed: LabelsOnly = serde_json::from_str(json.trim()).context("Failed to parse instance labels")?;
    Ok(parsed.labels)
}

/// Subcommand words for error messages; never includes flag values.
fn first_words(args: &[&str]) -> String {
    args.iter()
        .copied()
        .filter(|a| !a.starts_with('-'))
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> InstanceSpec {
        InstanceSpec {
            name: "gh-widgets-42-1".to_string(),
            image_project: "ubuntu-os-cloud".to_string(),
            image_family: "ubuntu-2204-lts".to_string(),
            machine_type: "e2-standard-4".to_string(),
            startup_script: "#!/bin/bash\n".to_string(),
        }
    }

    #[test]
    fn test_create_args_carry_all_instance_settings() {
        let args = create_args(&spec(), "us-central1-a", Path::new("/tmp/script.sh"));
        assert_eq!(&args[..4], ["compute", "instances", "create", "gh-widgets-42-1"]);
        for expected in [
            "--quiet",
            "--zone=us-central1-a",
            "--scopes=default,compute-rw",
            "--image-project=ubuntu-os-cloud",
            "--image-family=ubuntu-2204-lts",
            "--machine-type=e2-standard-4",
            "--metadata-from-file=startup-script=/tmp/script.sh",
            "--labels=gh_ready=0",
        ] {
            assert!(args.iter().any(|a| a == expected), "missing {} in {:?}", expected, args);
        }
    }

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels(r#"{"labels": {"gh_ready": "1", "team": "ci"}}"#).unwrap();
        assert_eq!(labels.get("gh_ready").map(String::as_str), Some("1"));
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_parse_labels_missing_key_is_empty() {
        assert!(parse_labels("{}\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_labels_rejects_non_json() {
        assert!(parse_labels("ERROR: not found").is_err());
    }

    #[test]
    fn test_instance_info_machine_type_short() {
        let info: InstanceInfo = serde_json::from_str(
            r#"{"name":"vm","status":"RUNNING","machineType":"https://www.googleapis.com/compute/v1/projects/p/zones/z/machineTypes/e2-medium"}"#,
        )
        .unwrap();
        assert_eq!(info.machine_type_short(), "e2-medium");
        assert_eq!(info.status, "RUNNING");
        assert!(info.labels.is_empty());
    }

    #[test]
    fn test_first_words_skips_flags() {
        let args = ["--quiet", "compute", "instances", "delete", "vm", "--zone=z"];
        assert_eq!(first_words(&args), "compute instances delete");
    }

    #[test]
    fn test_blank_project_is_ignored() {
        let g = Gcloud::new("gcloud", Some("  ".to_string()), "z");
        assert!(g.project().is_none());
    }

    #[test]
    fn test_missing_binary_is_error() {
        let g = Gcloud::new("/nonexistent/gcloud-binary", None, "z");
        let err = g.describe_labels("vm").unwrap_err().to_string();
        assert!(err.contains("Failed to run"), "got: {}", err);
    }
}
