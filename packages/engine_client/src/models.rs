//! Parameter and response shapes used by the container operations.
//!
//! Query parameter structs serialize with the daemon's query names; `None`
//! fields are left out of the query string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogsParameters {
    pub follow: Option<bool>,
    pub stdout: Option<bool>,
    pub stderr: Option<bool>,
    /// Unix timestamp.
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub timestamps: Option<bool>,
    /// Number of lines from the end, or `all`.
    pub tail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsParameters {
    pub stream: Option<bool>,
    #[serde(rename = "one-shot")]
    pub one_shot: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AttachParameters {
    pub stream: Option<bool>,
    pub stdin: Option<bool>,
    pub stdout: Option<bool>,
    pub stderr: Option<bool>,
    pub logs: Option<bool>,
    #[serde(rename = "detachKeys")]
    pub detach_keys: Option<String>,
}

impl AttachParameters {
    /// Live stdin/stdout/stderr.
    pub fn interactive() -> Self {
        Self {
            stream: Some(true),
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListParameters {
    pub all: Option<bool>,
    pub limit: Option<u32>,
    pub size: Option<bool>,
    /// e.g. `{"status": ["running"]}`; sent JSON-encoded.
    pub filters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateParameters {
    pub name: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateResponse {
    pub id: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TopParameters {
    pub ps_args: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KillParameters {
    pub signal: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StopParameters {
    /// Seconds to wait before killing the container.
    pub t: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoveParameters {
    pub v: Option<bool>,
    pub force: Option<bool>,
    pub link: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResizeParameters {
    pub h: u32,
    pub w: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenameParameters {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveParameters {
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractArchiveParameters {
    pub path: String,
    #[serde(rename = "noOverwriteDirNonDir")]
    pub no_overwrite_dir_non_dir: Option<bool>,
}

/// Body of an exec create call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecConfig {
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub privileged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detach_keys: Option<String>,
}

/// Body of an exec start call.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecStartConfig {
    pub detach: bool,
    pub tty: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecCreateResponse {
    #[serde(rename = "Id")]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitResponse {
    pub status_code: i64,
    #[serde(default)]
    pub error: Option<WaitError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitError {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::to_query_string;

    #[test]
    fn logs_query_names() {
        let params = LogsParameters {
            stdout: Some(true),
            timestamps: Some(true),
            tail: Some("all".into()),
            ..Default::default()
        };
        assert_eq!(
            to_query_string(&params).unwrap(),
            "stdout=true&tail=all&timestamps=true"
        );
    }

    #[test]
    fn list_filters_are_json_encoded() {
        let params = ListParameters {
            all: Some(true),
            filters: Some(serde_json::json!({"status": ["running"]})),
            ..Default::default()
        };
        assert_eq!(
            to_query_string(&params).unwrap(),
            "all=true&filters=%7B%22status%22%3A%5B%22running%22%5D%7D"
        );
    }

    #[test]
    fn create_response_tolerates_missing_warnings() {
        let created: CreateResponse = serde_json::from_str(r#"{"Id":"abc"}"#).unwrap();
        assert_eq!(created.id, "abc");
        assert!(created.warnings.is_empty());
    }

    #[test]
    fn exec_config_wire_names() {
        let config = ExecConfig {
            attach_stdout: true,
            cmd: vec!["ls".into()],
            working_dir: Some("/srv".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["AttachStdout"], true);
        assert_eq!(json["Cmd"][0], "ls");
        assert_eq!(json["WorkingDir"], "/srv");
        assert!(json.get("Env").is_none());
    }

    #[test]
    fn wait_response_shape() {
        let wait: WaitResponse =
            serde_json::from_str(r#"{"StatusCode":137,"Error":{"Message":"killed"}}"#).unwrap();
        assert_eq!(wait.status_code, 137);
        assert_eq!(wait.error.unwrap().message, "killed");
    }
}
