// Docker credential helper protocol: `docker-credential-<name> get` reads the
// server URL on stdin and prints {"ServerURL","Username","Secret"} on stdout.

use super::Credential;
use crate::error::{PackageError, Result};
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Username helpers report when the secret is an identity token
const IDENTITY_TOKEN_USERNAME: &str = "<token>";
const NOT_FOUND_MESSAGE: &str = "credentials not found in native keychain";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperReply {
    #[serde(default)]
    username: String,
    #[serde(default)]
    secret: String,
}

pub(super) async fn get(helper: &str, server_url: &str) -> Result<Credential> {
    let program = format!("docker-credential-{}", helper);

    let mut child = Command::new(&program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PackageError::CredentialStore(format!("failed to run {}: {}", program, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(server_url.as_bytes()).await.map_err(|e| {
            PackageError::CredentialStore(format!("failed to write to {}: {}", program, e))
        })?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| PackageError::CredentialStore(format!("{} failed: {}", program, e)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        if stdout.trim() == NOT_FOUND_MESSAGE {
            return Ok(Credential::default());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PackageError::CredentialStore(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
        )));
    }

    parse_reply(&stdout).map_err(|e| match e {
        PackageError::CredentialStore(msg) => {
            PackageError::CredentialStore(format!("{}: {}", program, msg))
        }
        other => other,
    })
}

fn parse_reply(stdout: &str) -> Result<Credential> {
    let reply: HelperReply = serde_json::from_str(stdout.trim())
        .map_err(|e| PackageError::CredentialStore(format!("invalid helper reply: {}", e)))?;

    if reply.username == IDENTITY_TOKEN_USERNAME {
        Ok(Credential {
            refresh_token: reply.secret,
            ..Credential::default()
        })
    } else {
        Ok(Credential {
            username: reply.username,
            password: reply.secret,
            refresh_token: String::new(),
        })
    }
}
