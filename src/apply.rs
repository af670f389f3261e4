//! Configuration rendering, atomic write, and proxy reload.
//!
//! Rendering and reload are injected capabilities ([`Renderer`] and
//! [`ReloadHook`]) so the apply path can be exercised without a real
//! subprocess. The production renderer binds the candidate set under the
//! single top-level template name `services`; the production reload hook
//! executes the configured command with no arguments and a bounded timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use minijinja::{Environment, context};
use tokio::process::Command;
use tracing::{info, warn};

use crate::candidate::ExposureRecord;
use crate::error::{ApplyError, ReloadError, RenderError};

/// Renders template text against a candidate set.
pub trait Renderer: Send + Sync {
    /// Produces the configuration text for the given records.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] if the template fails to parse or render.
    fn render(&self, template: &str, records: &[ExposureRecord]) -> Result<String, RenderError>;
}

/// [`Renderer`] backed by a `minijinja` environment.
///
/// Templates see the records as `services`, e.g.
/// `{% for s in services %}{{ s.name }} ... {% endfor %}`.
pub struct JinjaRenderer {
    env: Environment<'static>,
}

impl JinjaRenderer {
    /// Creates a renderer with the default environment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }
}

impl Default for JinjaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for JinjaRenderer {
    fn render(&self, template: &str, records: &[ExposureRecord]) -> Result<String, RenderError> {
        let rendered = self
            .env
            .render_str(template, context! { services => records })
            .map_err(RenderError::Template)?;
        Ok(rendered)
    }
}

/// Captured result of one reload invocation.
#[derive(Clone, Debug)]
pub struct ReloadOutput {
    /// Exit code, `None` if the command was terminated by a signal.
    pub code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
}

impl ReloadOutput {
    /// Whether the command exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Side-effecting trigger that tells the proxy to pick up the new
/// configuration.
#[async_trait]
pub trait ReloadHook: Send + Sync {
    /// Runs the reload action once.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError`] if the action could not be launched or timed
    /// out; a non-zero exit is reported through [`ReloadOutput`], not as an
    /// error.
    async fn reload(&self) -> Result<ReloadOutput, ReloadError>;
}

/// [`ReloadHook`] that executes an external command with no arguments.
pub struct CommandReload {
    command: PathBuf,
    timeout: Duration,
}

impl CommandReload {
    /// Configures the command path and execution timeout.
    #[must_use]
    pub fn new(command: PathBuf, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl ReloadHook for CommandReload {
    async fn reload(&self) -> Result<ReloadOutput, ReloadError> {
        let mut cmd = Command::new(&self.command);
        // A hung reload script must not block reconciliation forever; the
        // child is killed when the timeout fires and the future is dropped.
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ReloadError::TimedOut(self.timeout))?
            .map_err(|source| ReloadError::Launch {
                command: self.command.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ReloadOutput {
            code: output.status.code(),
            output: combined,
        })
    }
}

/// Renders the template against a candidate set, replaces the output file,
/// and triggers the reload hook.
pub struct ConfigApplier<R, H> {
    template_path: PathBuf,
    output_path: PathBuf,
    renderer: R,
    reload: H,
}

impl<R: Renderer, H: ReloadHook> ConfigApplier<R, H> {
    /// Wires the applier to its template, output path, and collaborators.
    #[must_use]
    pub fn new(template_path: PathBuf, output_path: PathBuf, renderer: R, reload: H) -> Self {
        Self {
            template_path,
            output_path,
            renderer,
            reload,
        }
    }

    /// Applies one candidate set: render, write, reload.
    ///
    /// The output file is replaced atomically (staging file plus rename), so
    /// a read or render failure leaves the previously written configuration
    /// untouched. Reload failures are logged and do not fail the apply; the
    /// configuration file is already updated at that point.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the template cannot be read, rendering
    /// fails, or the output file cannot be written.
    pub async fn apply(&self, records: &[ExposureRecord]) -> Result<(), ApplyError> {
        for (index, record) in records.iter().enumerate() {
            info!(
                index,
                rule = %record.name,
                address = %record.load_balancer_address,
                exposed_port = record.exposed_port,
                target_port = record.target_port,
                backends = ?record.backends,
                "applying exposure"
            );
        }

        let template = tokio::fs::read_to_string(&self.template_path)
            .await
            .map_err(|source| ApplyError::ReadTemplate {
                path: self.template_path.clone(),
                source,
            })?;

        let rendered = self.renderer.render(&template, records)?;

        let staging = staging_path(&self.output_path);
        let write_err = |source| ApplyError::WriteConfig {
            path: self.output_path.clone(),
            source,
        };
        tokio::fs::write(&staging, rendered.as_bytes())
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&staging, &self.output_path)
            .await
            .map_err(write_err)?;

        info!(path = %self.output_path.display(), "wrote proxy configuration");

        match self.reload.reload().await {
            Ok(out) if out.success() => {
                info!(output = %out.output.trim(), "reload command succeeded");
            }
            Ok(out) => {
                warn!(
                    code = ?out.code,
                    output = %out.output.trim(),
                    "reload command exited non-zero"
                );
            }
            Err(e) => {
                warn!(error = %e, "reload command failed");
            }
        }

        Ok(())
    }
}

/// Sibling staging file for atomic replacement of the output path.
fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".tmp");
    PathBuf::from(staged)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const LISTING_TEMPLATE: &str = "{% for s in services %}{{ s.name }} \
        {{ s.load_balancer_address }}:{{ s.exposed_port }} -> \
        {% for b in s.backends %}{{ b }} {% endfor %}\n{% endfor %}";

    /// Reload hook that only counts invocations.
    #[derive(Clone, Default)]
    struct CountingReload {
        calls: Arc<AtomicUsize>,
    }

    impl CountingReload {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReloadHook for CountingReload {
        async fn reload(&self) -> Result<ReloadOutput, ReloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ReloadOutput {
                code: Some(0),
                output: String::new(),
            })
        }
    }

    fn record(name: &str, backends: Vec<&str>) -> ExposureRecord {
        ExposureRecord {
            name: name.to_string(),
            namespace: "default".to_string(),
            load_balancer_address: "10.0.0.5".to_string(),
            exposed_port: 80,
            target_port: 8080,
            backends: backends.into_iter().map(String::from).collect(),
        }
    }

    // Renderer tests

    #[test]
    fn renderer_binds_records_as_services() {
        let renderer = JinjaRenderer::new();
        let records = vec![record("default_web_80", vec!["10.1.1.1:8080"])];

        let out = renderer
            .render("{% for s in services %}{{ s.name }}{% endfor %}", &records)
            .unwrap();

        assert_eq!(out, "default_web_80");
    }

    #[test]
    fn renderer_rejects_invalid_syntax() {
        let renderer = JinjaRenderer::new();

        let result = renderer.render("{% for s in services %}", &[]);

        assert!(result.is_err());
    }

    // staging_path tests

    #[test]
    fn staging_path_is_a_sibling() {
        let staged = staging_path(Path::new("/etc/proxy/config.conf"));
        assert_eq!(staged, PathBuf::from("/etc/proxy/config.conf.tmp"));
    }

    // apply tests

    #[tokio::test]
    async fn apply_writes_rendered_output_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("config.tmpl");
        let output_path = dir.path().join("config.conf");
        std::fs::write(&template_path, LISTING_TEMPLATE).unwrap();

        let reload = CountingReload::default();
        let applier = ConfigApplier::new(
            template_path,
            output_path.clone(),
            JinjaRenderer::new(),
            reload.clone(),
        );

        let records = vec![record("default_web_80", vec!["10.1.1.1:8080", "10.1.1.2:8080"])];
        applier.apply(&records).await.unwrap();

        let written = std::fs::read_to_string(&output_path).unwrap();
        assert!(written.contains("default_web_80 10.0.0.5:80"));
        assert!(written.contains("10.1.1.1:8080 10.1.1.2:8080"));
        assert_eq!(reload.calls(), 1);
    }

    #[tokio::test]
    async fn apply_render_failure_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("config.tmpl");
        let output_path = dir.path().join("config.conf");
        std::fs::write(&template_path, "{% for s in services %}").unwrap();
        std::fs::write(&output_path, "previous contents").unwrap();
        let mtime = std::fs::metadata(&output_path).unwrap().modified().unwrap();

        let reload = CountingReload::default();
        let applier = ConfigApplier::new(
            template_path,
            output_path.clone(),
            JinjaRenderer::new(),
            reload.clone(),
        );

        let result = applier.apply(&[record("default_web_80", vec!["10.1.1.1:8080"])]).await;

        assert!(matches!(result, Err(ApplyError::Render(_))));
        let contents = std::fs::read_to_string(&output_path).unwrap();
        assert_eq!(contents, "previous contents");
        assert_eq!(
            std::fs::metadata(&output_path).unwrap().modified().unwrap(),
            mtime
        );
        assert_eq!(reload.calls(), 0);
    }

    #[tokio::test]
    async fn apply_missing_template_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("config.conf");
        std::fs::write(&output_path, "previous contents").unwrap();

        let reload = CountingReload::default();
        let applier = ConfigApplier::new(
            dir.path().join("missing.tmpl"),
            output_path.clone(),
            JinjaRenderer::new(),
            reload.clone(),
        );

        let result = applier.apply(&[]).await;

        assert!(matches!(result, Err(ApplyError::ReadTemplate { .. })));
        assert_eq!(
            std::fs::read_to_string(&output_path).unwrap(),
            "previous contents"
        );
        assert_eq!(reload.calls(), 0);
    }

    #[tokio::test]
    async fn apply_write_failure_skips_reload() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("config.tmpl");
        std::fs::write(&template_path, "static").unwrap();

        let reload = CountingReload::default();
        let applier = ConfigApplier::new(
            template_path,
            dir.path().join("no-such-dir").join("config.conf"),
            JinjaRenderer::new(),
            reload.clone(),
        );

        let result = applier.apply(&[]).await;

        assert!(matches!(result, Err(ApplyError::WriteConfig { .. })));
        assert_eq!(reload.calls(), 0);
    }

    // CommandReload tests (Unix: tests spawn real executables)

    #[cfg(unix)]
    #[tokio::test]
    async fn command_reload_captures_exit_and_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("reload.sh");
        std::fs::write(&script, "#!/bin/sh\necho reloaded\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let hook = CommandReload::new(script, Duration::from_secs(5));
        let out = hook.reload().await.unwrap();

        assert!(out.success());
        assert_eq!(out.output.trim(), "reloaded");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_reload_reports_non_zero_exit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("reload.sh");
        std::fs::write(&script, "#!/bin/sh\necho broken >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let hook = CommandReload::new(script, Duration::from_secs(5));
        let out = hook.reload().await.unwrap();

        assert!(!out.success());
        assert_eq!(out.code, Some(3));
        assert_eq!(out.output.trim(), "broken");
    }

    #[tokio::test]
    async fn command_reload_missing_executable_fails_to_launch() {
        let hook = CommandReload::new(
            PathBuf::from("/no/such/reload-command"),
            Duration::from_secs(5),
        );

        let result = hook.reload().await;

        assert!(matches!(result, Err(ReloadError::Launch { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_reload_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("reload.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let hook = CommandReload::new(script, Duration::from_millis(100));
        let result = hook.reload().await;

        assert!(matches!(result, Err(ReloadError::TimedOut(_))));
    }
}
