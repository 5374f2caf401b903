//! Path metadata carried in archive response headers.

use chrono::{DateTime, FixedOffset};
use data_encoding::BASE64;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolViolation, Result};
use crate::monitor::ResponseBody;

pub const PATH_STAT_HEADER: &str = "X-Docker-Container-Path-Stat";

const MODE_DIR: u32 = 1 << 31;
const MODE_SYMLINK: u32 = 1 << 27;

/// Stat of a path inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStat {
    pub name: String,
    pub size: i64,
    /// File mode with the daemon's type bits in the high bits.
    pub mode: u32,
    pub mtime: DateTime<FixedOffset>,
    #[serde(rename = "linkTarget", default)]
    pub link_target: String,
}

impl PathStat {
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_DIR != 0
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & MODE_SYMLINK != 0
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o777
    }
}

/// Decode the path stat header: base64 (standard alphabet, padded) over
/// UTF-8 JSON.
pub fn extract_path_stat(headers: &HeaderMap) -> Result<PathStat> {
    let value = headers
        .get(PATH_STAT_HEADER)
        .ok_or(ProtocolViolation::MissingHeader(PATH_STAT_HEADER))?;
    let invalid = |reason: String| ProtocolViolation::InvalidHeader {
        name: PATH_STAT_HEADER,
        reason,
    };

    let encoded = value
        .to_str()
        .map_err(|e| invalid(format!("not visible ASCII: {e}")))?;
    let decoded = BASE64
        .decode(encoded.trim().as_bytes())
        .map_err(|e| invalid(format!("bad base64: {e}")))?;
    let json = std::str::from_utf8(&decoded).map_err(|e| invalid(format!("bad UTF-8: {e}")))?;
    let stat = serde_json::from_str(json).map_err(|e| invalid(format!("bad JSON: {e}")))?;
    Ok(stat)
}

/// Inverse of [`extract_path_stat`].
pub fn encode_path_stat(stat: &PathStat) -> Result<String> {
    let json = serde_json::to_vec(stat)?;
    Ok(BASE64.encode(&json))
}

/// Result of an archive read. `body` is the tar stream, absent for
/// stat-only requests.
pub struct ArchiveResponse {
    pub stat: PathStat,
    pub body: Option<ResponseBody>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use http::{HeaderName, HeaderValue};

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(PATH_STAT_HEADER.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn decodes_daemon_header() {
        let json = r#"{"name":"hosts","size":174,"mode":420,"mtime":"2024-05-06T07:08:09.5+02:00","linkTarget":""}"#;
        let headers = headers_with(&BASE64.encode(json.as_bytes()));

        let stat = extract_path_stat(&headers).unwrap();
        assert_eq!(stat.name, "hosts");
        assert_eq!(stat.size, 174);
        assert_eq!(stat.permissions(), 0o644);
        assert!(!stat.is_dir());
        assert_eq!(stat.mtime.offset().local_minus_utc(), 2 * 3600);
        assert_eq!(stat.link_target, "");
    }

    #[test]
    fn directory_and_symlink_bits() {
        let json = format!(
            r#"{{"name":"etc","size":4096,"mode":{},"mtime":"2024-01-01T00:00:00Z","linkTarget":"/real"}}"#,
            MODE_DIR | MODE_SYMLINK | 0o755
        );
        let stat = extract_path_stat(&headers_with(&BASE64.encode(json.as_bytes()))).unwrap();
        assert!(stat.is_dir());
        assert!(stat.is_symlink());
        assert_eq!(stat.link_target, "/real");
    }

    #[test]
    fn missing_header() {
        let err = extract_path_stat(&HeaderMap::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolViolation::MissingHeader(PATH_STAT_HEADER))
        ));
    }

    #[test]
    fn malformed_header() {
        let bad_json = BASE64.encode(b"{not json");
        for value in ["%%%not-base64%%%", bad_json.as_str()] {
            let err = extract_path_stat(&headers_with(value)).unwrap_err();
            assert!(matches!(
                err,
                EngineError::Protocol(ProtocolViolation::InvalidHeader { .. })
            ));
        }
    }

    #[test]
    fn encode_matches_extract() {
        let stat = PathStat {
            name: "app.log".into(),
            size: 12,
            mode: 0o600,
            mtime: DateTime::parse_from_rfc3339("2023-11-14T22:13:20Z").unwrap(),
            link_target: String::new(),
        };
        let headers = headers_with(&encode_path_stat(&stat).unwrap());
        assert_eq!(extract_path_stat(&headers).unwrap(), stat);
    }
}
