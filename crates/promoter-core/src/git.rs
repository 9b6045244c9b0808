//! `git` command-line implementation of [`GitClient`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use promoter_state::{
    CollaboratorError, CollaboratorResult, Credentials, GitClient, PushOptions, PushOutcome,
};
use tokio::process::Command;
use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::process::run_command;

/// Git client backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    bin: PathBuf,
    timeout: Option<Duration>,
}

impl GitCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            bin: config.git_bin.clone(),
            timeout: config.command_timeout,
        }
    }

    fn command(&self, work_tree: &Path) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.current_dir(work_tree)
            .env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    async fn git(&self, work_tree: &Path, args: &[&str]) -> CollaboratorResult<String> {
        let mut cmd = self.command(work_tree);
        cmd.args(args);
        let out = run_command(cmd, &format!("git {}", args.join(" ")), None, self.timeout).await?;
        Ok(out.trim().to_string())
    }

    /// HEAD commit of `work_tree`.
    pub async fn head_commit(&self, work_tree: &Path) -> CollaboratorResult<String> {
        let sha = self.git(work_tree, &["rev-parse", "HEAD"]).await?;
        if sha.is_empty() {
            return Err(CollaboratorError::Decode(
                "git rev-parse HEAD returned empty output".to_string(),
            ));
        }
        Ok(sha)
    }

    /// Configure credentials for a single push and return the extra `-c`
    /// arguments plus environment to apply. The returned guard must outlive
    /// the push.
    fn credential_setup(
        &self,
        remote_url: &str,
        credentials: &Credentials,
    ) -> CollaboratorResult<(tempfile::TempDir, Vec<String>, Vec<(String, String)>)> {
        let dir = tempfile::tempdir()?;
        let mut config_args = Vec::new();
        let mut env = Vec::new();

        if let Some(key) = credentials.ssh_private_key.as_deref() {
            let key_path = dir.path().join("id");
            crate::workdir::write_private(&key_path, key.as_bytes())?;
            env.push((
                "GIT_SSH_COMMAND".to_string(),
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no",
                    key_path.display()
                ),
            ));
        } else if !credentials.username.is_empty() || !credentials.password.is_empty() {
            if let Some((scheme, rest)) = remote_url.split_once("://") {
                let host = rest.split('/').next().unwrap_or_default();
                let host = host.rsplit('@').next().unwrap_or(host);
                let store = dir.path().join("credentials");
                let line = format!(
                    "{scheme}://{}:{}@{host}\n",
                    percent_encode(&credentials.username),
                    percent_encode(&credentials.password)
                );
                crate::workdir::write_private(&store, line.as_bytes())?;
                config_args.push("-c".to_string());
                config_args.push("credential.helper=".to_string());
                config_args.push("-c".to_string());
                config_args.push(format!("credential.helper=store --file={}", store.display()));
            }
        }
        Ok((dir, config_args, env))
    }
}

/// Percent-encode everything outside the URL unreserved set.
fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[async_trait]
impl GitClient for GitCli {
    async fn current_branch(&self, work_tree: &Path) -> CollaboratorResult<String> {
        self.git(work_tree, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
    }

    async fn remote_url(&self, work_tree: &Path) -> CollaboratorResult<String> {
        self.git(work_tree, &["remote", "get-url", "origin"]).await
    }

    #[instrument(skip(self, options), fields(work_tree = %options.work_tree.display(), branch = %options.target_branch))]
    async fn push(&self, options: PushOptions) -> CollaboratorResult<PushOutcome> {
        let work_tree = options.work_tree.as_path();
        let remote_url = self.remote_url(work_tree).await?;

        let (_guard, config_args, env) = match options.credentials.as_ref() {
            Some(creds) => {
                let (guard, args, env) = self.credential_setup(&remote_url, creds)?;
                (Some(guard), args, env)
            }
            None => (None, Vec::new(), Vec::new()),
        };

        let refspec = format!("HEAD:refs/heads/{}", options.target_branch);
        let mut cmd = self.command(work_tree);
        cmd.args(&config_args)
            .args(["push", "origin", refspec.as_str()])
            .envs(env);
        run_command(
            cmd,
            &format!("git push origin {refspec}"),
            None,
            self.timeout,
        )
        .await?;

        let commit = self.head_commit(work_tree).await?;
        info!(commit = %commit, "pushed");
        Ok(PushOutcome {
            branch: options.target_branch,
            commit,
        })
    }
}
