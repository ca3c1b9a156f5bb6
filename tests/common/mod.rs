//! Shared helpers for the integration suite: tempdir daemon homes,
//! shell-script fixture daemons, and a one-shot HTTP fixture for download
//! scenarios.

use sha2::{Digest, Sha256};
use std::fs;
#[cfg(unix)]
use std::path::Path;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use upswitch::Config;

/// A daemon home rooted in a tempdir.
pub struct TestHome {
    pub dir: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create tempdir"),
        }
    }

    pub fn config(&self, name: &str) -> Config {
        Config::new(self.dir.path(), name)
    }

    /// Installs a shell script as the genesis binary.
    #[cfg(unix)]
    pub fn install_genesis_script(&self, cfg: &Config, body: &str) {
        write_script(&cfg.genesis_bin(), body);
    }

    /// Installs a shell script as the binary for an upgrade plan.
    #[cfg(unix)]
    pub fn install_upgrade_script(&self, cfg: &Config, plan: &str, body: &str) {
        write_script(&cfg.upgrade_bin(plan), body);
    }

    /// Creates a data directory with a couple of files and wires it into a
    /// copy of the config.
    pub fn with_data_dir(&self, cfg: &Config) -> Config {
        let data = self.dir.path().join("data");
        fs::create_dir_all(data.join("modules")).expect("create data dir");
        fs::write(data.join("application.db"), "test\n").expect("write data");
        fs::write(data.join("modules/state.db"), "test\n").expect("write data");

        let mut cfg = cfg.clone();
        cfg.data_dir = Some(data);
        cfg
    }
}

/// Writes an executable `/bin/sh` script at `path`.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(path.parent().expect("script has a parent")).expect("create script dir");
    fs::write(path, format!("#!/bin/sh\n{body}")).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Serves `body` to exactly one HTTP request and returns the URL it will be
/// available at (with the checksum parameter already attached).
pub async fn serve_artifact_once(body: Vec<u8>, checksum: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept connection");

        // Read until the end of the request headers; the bodyless GET is all
        // we ever receive.
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.expect("read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }

        let header = format!(
            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(header.as_bytes()).await.expect("write header");
        socket.write_all(&body).await.expect("write body");
        socket.shutdown().await.ok();
    });

    format!("http://{addr}/artifact?checksum=sha256:{checksum}")
}
