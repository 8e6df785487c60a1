//! Argument and result payloads of the agent methods this client speaks.

use serde::{Deserialize, Serialize};

use crate::digest::MultipleDigest;
use crate::task::ResponseShape;

/// Argument of `fetch_logs_with_signed_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchLogsWithSignedUrlRequest {
    pub signed_url: String,
    pub log_type: String,
    pub filters: Vec<String>,
}

/// Result of `fetch_logs_with_signed_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchLogsWithSignedUrlResponse {
    /// SHA-1 of the uploaded log archive.
    #[serde(rename = "sha1")]
    pub sha1_digest: String,
}

impl ResponseShape for FetchLogsWithSignedUrlResponse {
    const EXPECTED: &'static str = "object with a sha1 digest";
}

/// Argument of `sync_dns_with_signed_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDnsWithSignedUrlRequest {
    pub signed_url: String,
    pub multi_digest: MultipleDigest,
    pub version: u64,
}

/// Parameters of the `ssh` method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshParams {
    pub user: String,
    #[serde(default)]
    pub user_regex: String,
    #[serde(default)]
    pub public_key: String,
}

/// Result of the `ssh` method.
///
/// `status` is the agent's report of the shell command; a non-`success`
/// status is not turned into an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshResult {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_public_key: Option<String>,
}

impl ResponseShape for SshResult {
    const EXPECTED: &'static str = "ssh result object";
}

/// Settings pushed with `update_settings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    #[serde(default)]
    pub trusted_certs: String,
    #[serde(default)]
    pub disk_associations: Vec<DiskAssociation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskAssociation {
    pub name: String,
    pub disk_cid: String,
}
