//! Host automation bridge.
//!
//! The viewer application exposes no "page changed" event, so everything the
//! poller knows comes through [`HostBridge`]: whether the app is running and
//! frontmost, the titles of its visible windows, the path of its front
//! document, and the text of a page.
//!
//! [`OsaScriptBridge`] implements the trait on macOS by running JavaScript
//! for Automation snippets through `osascript`. On other platforms the
//! `osascript` binary is missing and every call fails, which the poller
//! treats as a transient error.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

use crate::extract;

/// A window of the target application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WindowInfo {
    pub title: String,
}

impl WindowInfo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

#[async_trait]
pub trait HostBridge: Send + Sync {
    async fn is_target_app_running(&self) -> Result<bool>;

    async fn is_frontmost(&self) -> Result<bool>;

    /// Visible windows, frontmost first.
    async fn visible_windows(&self) -> Result<Vec<WindowInfo>>;

    async fn front_document_path(&self) -> Result<Option<PathBuf>>;

    /// Text of a 1-indexed page, or `None` when the page does not exist.
    async fn extract_page_text(&self, path: &Path, page_number: u32) -> Result<Option<String>>;
}

/// macOS bridge built on `osascript -l JavaScript`.
pub struct OsaScriptBridge {
    app_name: String,
    pdfs: Arc<extract::PdfCache>,
}

impl OsaScriptBridge {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            pdfs: Arc::new(extract::PdfCache::default()),
        }
    }

    /// App name as a JavaScript string literal.
    fn app_literal(&self) -> String {
        serde_json::Value::String(self.app_name.clone()).to_string()
    }

    async fn run_jxa(&self, script: &str) -> Result<String> {
        let output = Command::new("osascript")
            .arg("-l")
            .arg("JavaScript")
            .arg("-e")
            .arg(script)
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run osascript")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("osascript failed ({}): {}", output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn parse_bool(output: &str) -> Result<bool> {
    match output {
        "true" => Ok(true),
        "false" => Ok(false),
        other => bail!("unexpected osascript output: {:?}", other),
    }
}

#[async_trait]
impl HostBridge for OsaScriptBridge {
    async fn is_target_app_running(&self) -> Result<bool> {
        let script = format!("Application({}).running()", self.app_literal());
        parse_bool(&self.run_jxa(&script).await?)
    }

    async fn is_frontmost(&self) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const procs = Application("System Events").processes.whose({{ name: {app} }});
                return procs.length > 0 && procs[0].frontmost();
            }})()"#,
            app = self.app_literal()
        );
        parse_bool(&self.run_jxa(&script).await?)
    }

    async fn visible_windows(&self) -> Result<Vec<WindowInfo>> {
        let script = format!(
            r#"(() => {{
                const procs = Application("System Events").processes.whose({{ name: {app} }});
                if (procs.length === 0) return "[]";
                const titles = procs[0].windows().filter(w => {{
                    try {{ return w.attributes.byName("AXMinimized").value() !== true; }}
                    catch (e) {{ return true; }}
                }}).map(w => ({{ title: w.name() || "" }}));
                return JSON.stringify(titles);
            }})()"#,
            app = self.app_literal()
        );
        let output = self.run_jxa(&script).await?;
        serde_json::from_str(&output).context("Failed to parse window list from osascript")
    }

    async fn front_document_path(&self) -> Result<Option<PathBuf>> {
        let script = format!(
            r#"(() => {{
                const docs = Application({app}).documents();
                return docs.length > 0 ? (docs[0].path() || "") : "";
            }})()"#,
            app = self.app_literal()
        );
        let output = self.run_jxa(&script).await?;
        Ok(if output.is_empty() {
            None
        } else {
            Some(PathBuf::from(output))
        })
    }

    async fn extract_page_text(&self, path: &Path, page_number: u32) -> Result<Option<String>> {
        let path = path.to_path_buf();
        let pdfs = self.pdfs.clone();
        tokio::task::spawn_blocking(move || pdfs.page_text(&path, page_number))
            .await
            .context("PDF extraction task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_literal_escapes_quotes() {
        let bridge = OsaScriptBridge::new(r#"My "Viewer""#);
        assert_eq!(bridge.app_literal(), r#""My \"Viewer\"""#);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_window_list_json() {
        let windows: Vec<WindowInfo> =
            serde_json::from_str(r#"[{"title":"paper.pdf – Page 3 of 12"},{"title":""}]"#).unwrap();
        assert_eq!(windows[0], WindowInfo::new("paper.pdf – Page 3 of 12"));
        assert_eq!(windows[1].title, "");
    }
}
