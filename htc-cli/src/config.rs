//! Loading and saving the YAML config file.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use libhtc::config::HtcConfig;
use libhtc::log::*;
use tokio::fs;

pub fn default_config_path() -> Result<PathBuf> {
    directories::ProjectDirs::from("org", "htcondor", "htc")
        .map(|dirs| dirs.config_dir().join("config.yaml"))
        .ok_or_else(|| eyre!("could not determine the user config directory"))
}

/// Read the config at `path`. A missing file is the default config.
#[tracing::instrument]
pub async fn load(path: &Path) -> Result<HtcConfig> {
    if !path.exists() {
        debug!("no config at {}, using defaults", path.display());
        return Ok(HtcConfig::default());
    }
    let config = fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("Failed reading config file {}", path.display()))?;
    serde_yaml::from_str(config.as_str())
        .wrap_err_with(|| format!("deserializing config file {}", path.display()))
}

#[tracing::instrument(skip(config))]
pub async fn save(path: &Path, config: &HtcConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .wrap_err_with(|| format!("Failed creating config directory {}", parent.display()))?;
    }
    let yaml = serde_yaml::to_string(config).wrap_err("serializing config")?;
    fs::write(path, yaml)
        .await
        .wrap_err_with(|| format!("Failed writing config file {}", path.display()))?;
    info!("saved config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use libhtc::config::Tools;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn missing_file_is_the_default_config() -> Result<()> {
        let dir = TempDir::new()?;
        let config = load(&dir.path().join("config.yaml")).await?;
        assert_eq!(HtcConfig::default(), config);
        assert_eq!("condor_submit", config.tools().submit());
        Ok(())
    }

    #[tokio::test]
    async fn partial_file_keeps_the_other_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "access_point: ap40.uw.osg-htc.org\nusername: alice\ntools:\n  shell: ssh -F /etc/htc/ssh_config\n",
        )?;

        let config = load(&path).await?;
        assert_eq!(&Some("ap40.uw.osg-htc.org".to_string()), config.access_point());
        assert_eq!("ssh -F /etc/htc/ssh_config", config.tools().shell());
        assert_eq!("scp", config.tools().copy());
        assert_eq!(&10, config.tools().pid_timeout_secs());
        assert!(config.access_points().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn saved_selection_is_loaded_back() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = HtcConfig::new_with_endpoint("ap1.example.org", "alice");
        config.select_access_point("ap2.example.org");
        config.set_tools(Tools::new_with_local_tools("scp -q", "ssh"));
        config.set_ssh_options(vec!["-o".into(), "BatchMode=yes".into()]);
        save(&path, &config).await?;

        let loaded = load(&path).await?;
        assert_eq!(config, loaded);
        assert_eq!(&vec!["-o".to_string(), "BatchMode=yes".to_string()], loaded.ssh_options());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "access_points: [unterminated\n")?;
        assert!(load(&path).await.is_err());
        Ok(())
    }
}
