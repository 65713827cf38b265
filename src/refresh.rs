//! # Refresh Callbacks
//!
//! Ways of handing a new snapshot to the application:
//!
//! - [`HttpRefresh`] POSTs to a refresh endpoint such as `/actuator/refresh`
//! - [`FileRefresh`] rewrites a `.properties` file the application reads
//! - [`LogRefresh`] only logs, for dry runs

use crate::error::{ReloadError, Result};
use crate::snapshot::EffectiveSnapshot;
use crate::trigger::RefreshCallback;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// POST to an HTTP refresh endpoint; any non-2xx status is a failure
#[derive(Debug, Clone)]
pub struct HttpRefresh {
    client: reqwest::Client,
    url: String,
}

impl HttpRefresh {
    /// # Errors
    ///
    /// Returns `Refresh` when the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReloadError::Refresh(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RefreshCallback for HttpRefresh {
    async fn refresh(&self, _snapshot: &EffectiveSnapshot) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(|e| ReloadError::Refresh(format!("POST {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReloadError::Refresh(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                self.url,
                body
            )));
        }
        debug!(url = %self.url, status = status.as_u16(), "refresh.http.accepted");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Rewrite a properties file atomically (temp file in the same directory, then rename)
#[derive(Debug, Clone)]
pub struct FileRefresh {
    path: PathBuf,
}

impl FileRefresh {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RefreshCallback for FileRefresh {
    async fn refresh(&self, snapshot: &EffectiveSnapshot) -> Result<()> {
        let path = self.path.clone();
        let contents = render_properties(snapshot);
        tokio::task::spawn_blocking(move || write_atomically(&path, contents.as_bytes()))
            .await
            .map_err(|e| ReloadError::Refresh(format!("file refresh task failed: {e}")))??;
        info!(path = %self.path.display(), properties = snapshot.len(), "refresh.file.written");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let to_refresh_error = |e: std::io::Error| {
        ReloadError::Refresh(format!("failed to write {}: {e}", path.display()))
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(to_refresh_error)?;
    temp.write_all(contents).map_err(to_refresh_error)?;
    temp.as_file().sync_all().map_err(to_refresh_error)?;
    temp.persist(path).map_err(|e| to_refresh_error(e.error))?;
    Ok(())
}

/// Sorted `key=value` lines with `.properties` escaping
fn render_properties(snapshot: &EffectiveSnapshot) -> String {
    let mut out = String::new();
    for (key, value) in &snapshot.properties {
        out.push_str(&escape(key, true));
        out.push('=');
        out.push_str(&escape(value, false));
        out.push('\n');
    }
    out
}

fn escape(text: &str, is_key: bool) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '\x0c' => escaped.push_str("\\f"),
            // Leading whitespace of a value would be skipped on read
            ' ' if escaped.is_empty() => escaped.push_str("\\ "),
            '=' | ':' | ' ' | '#' | '!' if is_key => {
                escaped.push('\\');
                escaped.push(c);
            }
            c => escaped.push(c),
        }
    }
    escaped
}

/// Log the size of each applied snapshot and do nothing else
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRefresh;

#[async_trait]
impl RefreshCallback for LogRefresh {
    async fn refresh(&self, snapshot: &EffectiveSnapshot) -> Result<()> {
        info!(
            properties = snapshot.len(),
            sources = snapshot.source_versions.len(),
            "refresh.log.applied"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot(pairs: &[(&str, &str)]) -> EffectiveSnapshot {
        EffectiveSnapshot {
            properties: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            source_versions: BTreeMap::new(),
        }
    }

    #[test]
    fn test_render_properties_sorted_and_escaped() {
        let rendered = render_properties(&snapshot(&[
            ("b.key", "line1\nline2"),
            ("a key", "x=y"),
        ]));
        assert_eq!(rendered, "a\\ key=x=y\nb.key=line1\\nline2\n");
    }

    #[test]
    fn test_rendered_properties_read_back_unchanged() {
        let original = snapshot(&[
            ("a key", " padded value"),
            ("dir", "C:\\"),
            ("host:port", "x=y"),
            ("multi", "line1\nline2\ttab"),
        ]);
        let rendered = render_properties(&original);
        let parsed = crate::snapshot::embedded::expand(
            crate::snapshot::embedded::DocumentFormat::Properties,
            &rendered,
        )
        .unwrap();
        assert_eq!(parsed, original.properties);
    }

    #[tokio::test]
    async fn test_file_refresh_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("application.properties");
        std::fs::write(&path, "stale=true\n").unwrap();

        let refresh = FileRefresh::new(&path);
        refresh
            .refresh(&snapshot(&[("from.properties.key", "after-change")]))
            .await
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "from.properties.key=after-change\n");
        assert_eq!(refresh.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_file_refresh_missing_directory_is_refresh_error() {
        let dir = tempfile::tempdir().unwrap();
        let refresh = FileRefresh::new(dir.path().join("missing").join("app.properties"));

        let err = refresh.refresh(&snapshot(&[])).await.unwrap_err();
        assert!(matches!(err, ReloadError::Refresh(_)));
    }

    mod http_tests {
        use super::*;
        use axum::{http::StatusCode, routing::post, Router};

        async fn serve(router: Router) -> String {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, router).await.unwrap();
            });
            format!("http://{addr}")
        }

        #[tokio::test]
        async fn test_http_refresh_accepts_2xx() {
            let base = serve(
                Router::new().route("/actuator/refresh", post(|| async { StatusCode::OK })),
            )
            .await;
            let refresh =
                HttpRefresh::new(format!("{base}/actuator/refresh"), Duration::from_secs(5))
                    .unwrap();

            assert!(refresh.refresh(&snapshot(&[])).await.is_ok());
        }

        #[tokio::test]
        async fn test_http_refresh_non_2xx_is_refresh_error() {
            let base = serve(Router::new().route(
                "/actuator/refresh",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "warming up") }),
            ))
            .await;
            let refresh =
                HttpRefresh::new(format!("{base}/actuator/refresh"), Duration::from_secs(5))
                    .unwrap();

            let err = refresh.refresh(&snapshot(&[])).await.unwrap_err();
            assert!(matches!(
                err,
                ReloadError::Refresh(ref msg) if msg.contains("503") && msg.contains("warming up")
            ));
        }
    }

    #[tokio::test]
    async fn test_log_refresh_always_succeeds() {
        assert!(LogRefresh.refresh(&snapshot(&[("a", "1")])).await.is_ok());
        assert_eq!(LogRefresh.name(), "log");
    }
}
