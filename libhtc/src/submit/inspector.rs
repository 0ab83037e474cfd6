//! Finds the `log = <path>` directive in a job description.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use derive_getters::Getters;
use regex::Regex;

use crate::log::*;

static LOG_DIRECTIVE: OnceLock<Regex> = OnceLock::new();

fn log_directive() -> &'static Regex {
    LOG_DIRECTIVE.get_or_init(|| {
        Regex::new(r"(?m)^log[ \t]*=[ \t]*(\S+)").expect("log directive pattern is valid")
    })
}

/// The job log named by a job description, and where it lives on both ends.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
pub struct LogReference {
    /// The path exactly as written after `log =`.
    file_name: String,
    /// The path resolved under the job description's directory.
    local_mirror_path: PathBuf,
    /// The path resolved under the remote home directory.
    remote_path: String,
}

/// The value of the first `log =` directive in `raw_text`, if any. Later
/// directives are ignored.
pub fn find_log_directive(raw_text: &str) -> Option<&str> {
    log_directive()
        .captures(raw_text)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str())
}

/// The components of a `log =` value that stay below the directory it is
/// resolved against. A leading root is dropped, so `/abs/run.log` becomes
/// `abs/run.log`. Any `..` makes the value unusable.
fn contained_components(value: &str) -> Option<Vec<String>> {
    let mut parts = vec![];
    for component in Path::new(value).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

/// Derive the [`LogReference`] for the job description at `descriptor`
/// whose contents are `raw_text`. `None` just means there is nothing to
/// follow.
///
/// Both ends always resolve below their base directory: the local mirror
/// never leaves the job description's directory and the remote log never
/// leaves `remote_home`.
pub fn extract_log_reference(
    raw_text: &str,
    descriptor: &Path,
    remote_home: &str,
) -> Option<LogReference> {
    let file_name = find_log_directive(raw_text)?;
    let Some(parts) = contained_components(file_name) else {
        warn!(
            "not following log {}: it escapes the directory of {}",
            file_name,
            descriptor.display()
        );
        return None;
    };
    let descriptor_dir = descriptor.parent().unwrap_or_else(|| Path::new(""));
    let mut local_mirror_path = descriptor_dir.to_path_buf();
    local_mirror_path.extend(&parts);
    Some(LogReference {
        file_name: file_name.to_string(),
        local_mirror_path,
        remote_path: format!("{}/{}", remote_home.trim_end_matches('/'), parts.join("/")),
    })
}
