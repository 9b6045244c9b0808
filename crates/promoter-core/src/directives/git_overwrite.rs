//! `git-overwrite`: replace the contents of a work tree with another
//! directory, keeping the `.git` entry of both sides out of the way.

use std::fs;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::config::{bind, ConfigSchema};
use super::context::{StepContext, StepResult};
use super::registry::Directive;
use crate::error::{ConfigError, DirectiveError};

const NAME: &str = "git-overwrite";
const GIT_DIR: &str = ".git";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOverwriteConfig {
    pub in_path: String,
    pub out_path: String,
}

pub struct GitOverwrite {
    schema: ConfigSchema,
}

impl GitOverwrite {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            schema: ConfigSchema::from_json(
                NAME,
                include_str!("../../schemas/git-overwrite-config.json"),
            )?,
        })
    }
}

/// Remove everything in `dir` except `.git`.
fn clear_except_git(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name() == GIT_DIR {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Copy the contents of `from` into `to`, skipping a top-level `.git`.
fn copy_except_git(from: &Path, to: &Path) -> io::Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_name() == GIT_DIR {
            continue;
        }
        copy_entry(&entry.path(), &to.join(entry.file_name()))?;
    }
    Ok(())
}

fn copy_entry(from: &Path, to: &Path) -> io::Result<()> {
    let file_type = fs::symlink_metadata(from)?.file_type();
    if file_type.is_symlink() {
        #[cfg(unix)]
        {
            let target = fs::read_link(from)?;
            std::os::unix::fs::symlink(&target, to)?;
        }
        #[cfg(not(unix))]
        {
            fs::copy(from, to)?;
        }
    } else if file_type.is_dir() {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_entry(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else {
        fs::copy(from, to)?;
    }
    Ok(())
}

#[async_trait]
impl Directive for GitOverwrite {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    async fn run(
        &self,
        ctx: &StepContext<'_>,
        config: &Value,
    ) -> Result<StepResult, DirectiveError> {
        let cfg: GitOverwriteConfig = bind(NAME, config)?;
        let in_path = ctx.work_dir().join(&cfg.in_path)?;
        let out_path = ctx.work_dir().join(&cfg.out_path)?;

        if !in_path.is_dir() {
            return Err(DirectiveError::invalid_content(
                format!("error reading input path {:?}", cfg.in_path),
                "not a directory",
            ));
        }
        if !out_path.join(GIT_DIR).exists() {
            return Err(DirectiveError::invalid_content(
                format!("error reading output path {:?}", cfg.out_path),
                "not a git working tree",
            ));
        }

        clear_except_git(&out_path).map_err(|e| {
            DirectiveError::io(format!("error clearing {:?}", cfg.out_path), e)
        })?;
        copy_except_git(&in_path, &out_path).map_err(|e| {
            DirectiveError::io(
                format!("error copying {:?} to {:?}", cfg.in_path, cfg.out_path),
                e,
            )
        })?;
        debug!(in_path = %cfg.in_path, out_path = %cfg.out_path, "overwrote work tree");
        Ok(StepResult::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_keeps_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.yaml"), "a").unwrap();
        fs::write(dir.path().join("b.yaml"), "b").unwrap();

        clear_except_git(dir.path()).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(".git")]);
        assert!(dir.path().join(".git/objects").is_dir());
    }

    #[test]
    fn test_copy_skips_source_git_dir() {
        let from = tempfile::tempdir().unwrap();
        let to = tempfile::tempdir().unwrap();
        fs::create_dir_all(from.path().join(".git")).unwrap();
        fs::write(from.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(from.path().join("nested/deeper")).unwrap();
        fs::write(from.path().join("nested/deeper/c.yaml"), "c").unwrap();

        copy_except_git(from.path(), to.path()).unwrap();
        assert!(!to.path().join(".git").exists());
        assert_eq!(
            fs::read_to_string(to.path().join("nested/deeper/c.yaml")).unwrap(),
            "c"
        );
    }
}
