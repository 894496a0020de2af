//! HTTP client that queries the latest-version metadata and downloads the
//! binary it points at.
//!
//! The transport host here is a pairwise tunnel multiplexer, not a general
//! HTTP transport, so the upgrade client instead speaks plain HTTPS to the
//! upgrade server directly over `ureq`, the same outbound-HTTP idiom the
//! rendezvous client uses for its own sync calls.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checksum::{ChecksumAlgorithm, Sha256Checksum};
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub program: String,
    pub version: String,
    #[serde(rename = "downloadServer")]
    pub download_server: String,
    #[serde(rename = "downloadPath")]
    pub download_path: String,
    /// Upstream checksum field. Format unconfirmed upstream;
    /// verification against it is best-effort.
    pub checksum: Option<String>,
}

pub struct UpgradeClient {
    agent: ureq::Agent,
    os_arch_tag: String,
    checksum_algo: Box<dyn ChecksumAlgorithm>,
}

impl UpgradeClient {
    pub fn new(os_arch_tag: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(10))
                .build(),
            os_arch_tag: os_arch_tag.into(),
            checksum_algo: Box::new(Sha256Checksum),
        }
    }

    pub fn with_checksum_algorithm(mut self, algo: Box<dyn ChecksumAlgorithm>) -> Self {
        self.checksum_algo = algo;
        self
    }

    /// `QueryLatestVersion(program) -> VersionInfo`.
    pub async fn query_latest_version(&self, server: &str, program: &str) -> Result<VersionInfo> {
        let url = format!("{server}/version/{program}?sys_type={}", self.os_arch_tag);
        let agent = self.agent.clone();
        let response = tokio::task::spawn_blocking(move || agent.get(&url).call())
            .await
            .map_err(Error::Join)?
            .map_err(|e| Error::Request(e.to_string()))?;
        let text = response
            .into_string()
            .map_err(|e| Error::Malformed(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| Error::Malformed(e.to_string()))
    }

    /// `Download(server, path)` streams the binary to `dest`, verifying the
    /// checksum field when present (best-effort: logged, not fatal, per the
    /// unresolved upstream format — see [`crate::checksum`]).
    pub async fn download(&self, info: &VersionInfo, dest: &Path) -> Result<()> {
        let url = format!("{}{}", info.download_server, info.download_path);
        let agent = self.agent.clone();
        let response = tokio::task::spawn_blocking(move || agent.get(&url).call())
            .await
            .map_err(Error::Join)?
            .map_err(|e| Error::Request(e.to_string()))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(Error::Io)?;

        if let Some(expected) = &info.checksum {
            let computed = self.checksum_algo.digest(&bytes);
            if &computed != expected {
                // TODO: the upstream source never finalized whether this
                // field is a raw hex digest, a prefixed "sha256:..." tag, or
                // something else entirely, so a mismatch here is logged
                // rather than treated as fatal until that's confirmed.
                warn!(expected, computed, "upgrade checksum mismatch, continuing anyway");
            } else {
                debug!("upgrade checksum verified");
            }
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let mut file = std::fs::File::create(dest).map_err(Error::Io)?;
        file.write_all(&bytes).map_err(Error::Io)?;
        Ok(())
    }

    /// Upgrade procedure: download to a temp file, rename the
    /// current executable to `*.bak`, rename the temp file into place, then
    /// mark it executable.
    pub async fn apply(&self, info: &VersionInfo, current_exe: &Path) -> Result<()> {
        let tmp = current_exe.with_extension("new");
        self.download(info, &tmp).await?;

        let backup = backup_path(current_exe);
        if current_exe.exists() {
            std::fs::rename(current_exe, &backup).map_err(Error::Io)?;
        }
        std::fs::rename(&tmp, current_exe).map_err(Error::Io)?;
        set_executable(current_exe)?;
        Ok(())
    }
}

fn backup_path(current_exe: &Path) -> PathBuf {
    let mut name = current_exe.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path).map_err(Error::Io)?.permissions();
    perms.set_mode(0o775);
    std::fs::set_permissions(path, perms).map_err(Error::Io)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_path_appends_bak_suffix() {
        let path = PathBuf::from("/usr/local/bin/pierce-daemon");
        assert_eq!(backup_path(&path), PathBuf::from("/usr/local/bin/pierce-daemon.bak"));
    }

    /// Spawns a minimal single-request HTTP/1.1 server on a loopback socket
    /// that replies with `body` to whatever it receives, for exercising
    /// `ureq` without pulling in an HTTP-mocking dependency this workspace
    /// doesn't otherwise use.
    async fn spawn_one_shot_http_server(body: &'static [u8]) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            use std::io::Read;
            if let Ok((mut sock, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = sock.write_all(response.as_bytes());
                let _ = sock.write_all(body);
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn query_latest_version_parses_a_well_formed_response() {
        let body = br#"{"program":"pierce-daemon","version":"1.2.3","downloadServer":"http://example.test","downloadPath":"/bin/pierce-daemon","checksum":null}"#;
        let base = spawn_one_shot_http_server(body).await;

        let client = UpgradeClient::new("linux-amd64");
        let info = client
            .query_latest_version(&base, "pierce-daemon")
            .await
            .expect("query");
        assert_eq!(info.version, "1.2.3");
    }

    #[tokio::test]
    async fn download_writes_bytes_to_dest_even_without_checksum() {
        let base = spawn_one_shot_http_server(b"binary-contents").await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let client = UpgradeClient::new("linux-amd64");
        let info = VersionInfo {
            program: "pierce-daemon".into(),
            version: "1.0.0".into(),
            download_server: base,
            download_path: String::new(),
            checksum: None,
        };
        client.download(&info, &dest).await.expect("download");
        assert_eq!(std::fs::read(&dest).unwrap(), b"binary-contents");
    }
}
