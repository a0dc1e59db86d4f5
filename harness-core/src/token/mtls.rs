//! Per-request X.509 key material.
//!
//! The pair is written to a private directory under the scratch root, read back
//! into a TLS identity and removed again. The directory is a [`TempDir`], so it
//! is gone on every exit path: explicit [`KeyMaterial::close`], an early `?`
//! return, a panic, or a dropped future.

use crate::error::{HarnessError, HarnessResult};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";

pub struct KeyMaterial {
    dir: TempDir,
}

impl KeyMaterial {
    pub async fn write(scratch_root: &Path, certificate: &str, private_key: &str) -> HarnessResult<Self> {
        tokio::fs::create_dir_all(scratch_root).await?;
        let dir = tempfile::Builder::new().prefix("mtls-").tempdir_in(scratch_root)?;

        let material = Self { dir };
        tokio::fs::write(material.cert_path(), normalize_pem(certificate)).await?;
        tokio::fs::write(material.key_path(), normalize_pem(private_key)).await?;
        debug!(path = %material.dir.path().display(), "Wrote mTLS key material");
        Ok(material)
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.path().join(CERT_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.path().join(KEY_FILE)
    }

    /// Certificate chain followed by the private key, as reqwest expects.
    pub async fn identity_pem(&self) -> HarnessResult<Vec<u8>> {
        let mut pem = tokio::fs::read(self.cert_path()).await?;
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend(tokio::fs::read(self.key_path()).await?);
        Ok(pem)
    }

    pub async fn identity(&self) -> HarnessResult<reqwest::Identity> {
        let pem = self.identity_pem().await?;
        reqwest::Identity::from_pem(&pem).map_err(|e| {
            HarnessError::Transport(anyhow::anyhow!("invalid client certificate or key: {}", e))
        })
    }

    /// Removes the files now and reports failures, instead of on drop.
    pub fn close(self) -> HarnessResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(path = %path.display(), "Removed mTLS key material");
        Ok(())
    }
}

/// Service keys sometimes carry PEM blocks with escaped newlines.
fn normalize_pem(pem: &str) -> String {
    let mut text = pem.replace("\\n", "\n");
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}
