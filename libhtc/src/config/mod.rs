use derive_getters::Getters;
use serde::{Deserialize, Serialize};

use crate::submit::Endpoint;

pub fn default_copy_tool() -> String {
    "scp".into()
}

pub fn default_shell_tool() -> String {
    "ssh".into()
}

pub fn default_submit_tool() -> String {
    "condor_submit".into()
}

pub fn default_tail_tool() -> String {
    "tail".into()
}

pub fn default_kill_by_name_tool() -> String {
    "pkill".into()
}

pub fn default_pid_timeout_secs() -> u64 {
    10
}

/// User-level settings: which access point to talk to, as whom, and which
/// tools to do it with.
#[derive(Getters, Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct HtcConfig {
    #[serde(default)]
    access_point: Option<String>,
    #[serde(default)]
    access_points: Vec<String>,
    #[serde(default)]
    username: Option<String>,
    /// Remote directory job descriptions are copied into. Defaults to
    /// `/home/<username>`.
    #[serde(default)]
    remote_home: Option<String>,
    /// Extra options handed to both the copy and the shell tool, e.g.
    /// `["-o", "BatchMode=yes"]`.
    #[serde(default)]
    ssh_options: Vec<String>,
    #[serde(default)]
    tools: Tools,
}

impl HtcConfig {
    pub fn new_with_endpoint<S: Into<String>>(access_point: S, username: S) -> Self {
        let access_point = access_point.into();
        Self {
            access_points: vec![access_point.clone()],
            access_point: Some(access_point),
            username: Some(username.into()),
            ..Default::default()
        }
    }

    /// The endpoint of the current access point, if both halves are known.
    pub fn endpoint(&self) -> Option<Endpoint> {
        match (&self.access_point, &self.username) {
            (Some(host), Some(user)) if !host.is_empty() && !user.is_empty() => {
                Some(Endpoint::new(host.as_str(), user.as_str()))
            }
            _ => None,
        }
    }

    pub fn remote_home_for(&self, endpoint: &Endpoint) -> String {
        match &self.remote_home {
            Some(home) if !home.is_empty() => home.trim_end_matches('/').to_string(),
            _ => format!("/home/{}", endpoint.user()),
        }
    }

    /// Make `access_point` the current one, remembering it in the list of
    /// known access points.
    pub fn select_access_point<S: Into<String>>(&mut self, access_point: S) {
        let access_point = access_point.into();
        if !self.access_points.contains(&access_point) {
            self.access_points.push(access_point.clone());
        }
        self.access_point = Some(access_point);
    }

    pub fn set_username<S: Into<String>>(&mut self, username: S) {
        self.username = Some(username.into());
    }

    pub fn set_remote_home<S: Into<String>>(&mut self, remote_home: S) {
        self.remote_home = Some(remote_home.into());
    }

    pub fn set_ssh_options(&mut self, ssh_options: Vec<String>) {
        self.ssh_options = ssh_options;
    }

    pub fn set_tools(&mut self, tools: Tools) {
        self.tools = tools;
    }
}

/// Local and remote programs used by the workflow. Local tool strings may
/// carry arguments (`"ssh -F ~/.ssh/ap_config"`).
#[derive(Getters, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tools {
    #[serde(default = "self::default_copy_tool")]
    copy: String,
    #[serde(default = "self::default_shell_tool")]
    shell: String,
    #[serde(default = "self::default_submit_tool")]
    submit: String,
    #[serde(default = "self::default_tail_tool")]
    tail: String,
    #[serde(default = "self::default_kill_by_name_tool")]
    kill_by_name: String,
    #[serde(default = "self::default_pid_timeout_secs")]
    pid_timeout_secs: u64,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            copy: default_copy_tool(),
            shell: default_shell_tool(),
            submit: default_submit_tool(),
            tail: default_tail_tool(),
            kill_by_name: default_kill_by_name_tool(),
            pid_timeout_secs: default_pid_timeout_secs(),
        }
    }
}

impl Tools {
    pub fn new_with_local_tools<S: Into<String>>(copy: S, shell: S) -> Self {
        Self {
            copy: copy.into(),
            shell: shell.into(),
            ..Default::default()
        }
    }

    pub fn with_pid_timeout_secs(mut self, pid_timeout_secs: u64) -> Self {
        self.pid_timeout_secs = pid_timeout_secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_requires_host_and_user() {
        let mut config = HtcConfig::default();
        assert!(config.endpoint().is_none());

        config.select_access_point("ap40.uw.osg-htc.org");
        assert!(config.endpoint().is_none());

        config.set_username("alice");
        let endpoint = config.endpoint().unwrap();
        assert_eq!("ap40.uw.osg-htc.org", endpoint.host());
        assert_eq!("alice", endpoint.user());
    }

    #[test]
    fn remote_home_defaults_to_user_home() {
        let mut config = HtcConfig::new_with_endpoint("ap.example.org", "alice");
        let endpoint = config.endpoint().unwrap();
        assert_eq!("/home/alice", config.remote_home_for(&endpoint));

        config.set_remote_home("/scratch/alice/");
        assert_eq!("/scratch/alice", config.remote_home_for(&endpoint));
    }

    #[test]
    fn selecting_an_access_point_remembers_it_once() {
        let mut config = HtcConfig::new_with_endpoint("ap1.example.org", "alice");
        config.select_access_point("ap2.example.org");
        config.select_access_point("ap1.example.org");
        assert_eq!(
            &vec!["ap1.example.org".to_string(), "ap2.example.org".to_string()],
            config.access_points()
        );
        assert_eq!(&Some("ap1.example.org".to_string()), config.access_point());
    }
}
