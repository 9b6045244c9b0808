//! `helm` command-line implementation of [`HelmClient`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use promoter_state::{
    CollaboratorError, CollaboratorResult, Credentials, DependencyUpdateRequest, HelmClient,
    TemplateRequest,
};
use tokio::process::Command;
use tracing::instrument;

use crate::config::EngineConfig;
use crate::process::run_command;

/// Helm client backed by the `helm` executable.
#[derive(Debug, Clone)]
pub struct HelmCli {
    bin: PathBuf,
    timeout: Option<Duration>,
}

impl HelmCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            bin: config.helm_bin.clone(),
            timeout: config.command_timeout,
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.bin)
    }

    fn template_args(request: &TemplateRequest, values_file: &Path) -> Vec<String> {
        let mut args = vec![
            "template".to_string(),
            request.release_name.clone(),
            request.chart_path.display().to_string(),
            "--namespace".to_string(),
            request.namespace.clone(),
            "--values".to_string(),
            values_file.display().to_string(),
        ];
        if request.include_crds {
            args.push("--include-crds".to_string());
        }
        if let Some(kube_version) = request.kube_version.as_deref() {
            args.push("--kube-version".to_string());
            args.push(kube_version.to_string());
        }
        for api_version in &request.api_versions {
            args.push("--api-versions".to_string());
            args.push(api_version.clone());
        }
        args
    }
}

/// Point every Helm state directory at `home` so concurrent runs never share
/// caches or credentials.
fn isolate_home(cmd: &mut Command, home: &Path) {
    cmd.env("HELM_CACHE_HOME", home.join("cache"))
        .env("HELM_CONFIG_HOME", home.join("config"))
        .env("HELM_DATA_HOME", home.join("data"));
}

#[async_trait]
impl HelmClient for HelmCli {
    #[instrument(skip_all, fields(chart = %request.chart_path.display(), release = %request.release_name))]
    async fn template(&self, request: TemplateRequest) -> CollaboratorResult<String> {
        let scratch = tempfile::tempdir()?;
        let values_file = scratch.path().join("values.yaml");
        let values = serde_yaml::to_string(&request.values)
            .map_err(|e| CollaboratorError::Decode(format!("encode values: {e}")))?;
        crate::workdir::write_private(&values_file, values.as_bytes())?;

        let args = Self::template_args(&request, &values_file);
        let mut cmd = self.command();
        cmd.args(&args);
        isolate_home(&mut cmd, scratch.path());
        run_command(cmd, &format!("helm {}", args.join(" ")), None, self.timeout).await
    }

    #[instrument(skip_all, fields(chart = %request.chart_path.display()))]
    async fn update_dependencies(
        &self,
        request: DependencyUpdateRequest,
    ) -> CollaboratorResult<()> {
        let args = vec![
            "dependency".to_string(),
            "update".to_string(),
            request.chart_path.display().to_string(),
            "--repository-config".to_string(),
            request.repository_config.display().to_string(),
            "--registry-config".to_string(),
            request.registry_config.display().to_string(),
        ];
        let mut cmd = self.command();
        cmd.args(&args);
        isolate_home(&mut cmd, &request.helm_home);
        run_command(cmd, &format!("helm {}", args.join(" ")), None, self.timeout).await?;
        Ok(())
    }

    #[instrument(skip(self, credentials))]
    async fn registry_login(
        &self,
        registry_config: &Path,
        host: &str,
        credentials: &Credentials,
    ) -> CollaboratorResult<()> {
        let mut cmd = self.command();
        cmd.args(["registry", "login", host, "--username"])
            .arg(&credentials.username)
            .arg("--password-stdin")
            .arg("--registry-config")
            .arg(registry_config);
        if let Some(home) = registry_config.parent() {
            isolate_home(&mut cmd, home);
        }
        run_command(
            cmd,
            &format!("helm registry login {host}"),
            Some(credentials.password.as_bytes()),
            self.timeout,
        )
        .await?;
        Ok(())
    }
}
