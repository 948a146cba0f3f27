//! C8 — App Pipeline.
//!
//! Orchestrates application deployment end-to-end: upload → language
//! detect → container build → route publish, then the stop/start/restart/
//! delete lifecycle ops. Driven by `tokio::spawn`'d background tasks, the
//! same shape as this codebase's periodic scheduler tasks but triggered
//! once per deploy instead of on a ticker. Language detection is a small,
//! data-driven pattern table so it's unit-testable without touching the
//! hypervisor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use devplane_types::models::{
    App, AppState, EventKind, HttpRoute, ResourceType, is_valid_subdomain,
};
use devplane_types::{AppError, AppResult};

use crate::adapters::hypervisor::HypervisorAdapter;
use crate::adapters::proxy::ProxyAdapter;
use crate::event_bus::EventBus;
use crate::locks::AppLocks;
use crate::persistence::apps::AppsRepository;
use crate::persistence::audit::AuditLog;
use crate::persistence::routes::RoutesRepository;

/// Max length of the captured stderr tail recorded on a build failure.
const STDERR_TAIL_BYTES: usize = 4096;
/// Bounded TCP-readiness retries before publishing a route (§4.8: ≤5, 1s gap).
const READY_CHECK_ATTEMPTS: u32 = 5;
const READY_CHECK_GAP: Duration = Duration::from_secs(1);
const DEPLOY_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// Language detected from the extracted source tree, driving both the
/// synthesized build-file template and the default exposed port hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Node,
    Python,
    Go,
    Rust,
    StaticHtml,
}

/// `(filename, language)` signals checked against the extracted file list,
/// most-specific first. This table is the "external configuration" the
/// distilled spec calls out — swapping it for a richer rule set (globs,
/// content sniffing) doesn't touch the pipeline's control flow.
const LANGUAGE_SIGNALS: &[(&str, Language)] = &[
    ("package.json", Language::Node),
    ("requirements.txt", Language::Python),
    ("pyproject.toml", Language::Python),
    ("go.mod", Language::Go),
    ("Cargo.toml", Language::Rust),
    ("index.html", Language::StaticHtml),
];

/// `(filename, language)` signals that indicate a build file is already
/// present and generation should be skipped.
const BUILD_FILE_SIGNALS: &[&str] = &["Dockerfile", "Containerfile"];

pub fn detect_language(file_names: &[String]) -> Option<Language> {
    for (signal, language) in LANGUAGE_SIGNALS {
        if file_names.iter().any(|f| f == signal) {
            return Some(*language);
        }
    }
    None
}

pub fn has_build_file(file_names: &[String]) -> bool {
    file_names.iter().any(|f| BUILD_FILE_SIGNALS.contains(&f.as_str()))
}

/// Renders a `Dockerfile` for `language`, parameterized by the port the
/// app listens on. Kept as a pure function so template changes don't need
/// a hypervisor to test.
pub fn render_build_file(language: Language, port: u16) -> String {
    match language {
        Language::Node => format!(
            "FROM node:20-slim\nWORKDIR /app\nCOPY . .\nRUN npm install --omit=dev\nEXPOSE {port}\nCMD [\"node\", \"server.js\"]\n"
        ),
        Language::Python => format!(
            "FROM python:3.12-slim\nWORKDIR /app\nCOPY . .\nRUN pip install --no-cache-dir -r requirements.txt\nEXPOSE {port}\nCMD [\"python\", \"app.py\"]\n"
        ),
        Language::Go => format!(
            "FROM golang:1.22 AS build\nWORKDIR /app\nCOPY . .\nRUN go build -o /app/server .\n\nFROM debian:bookworm-slim\nCOPY --from=build /app/server /server\nEXPOSE {port}\nCMD [\"/server\"]\n"
        ),
        Language::Rust => format!(
            "FROM rust:1.79 AS build\nWORKDIR /app\nCOPY . .\nRUN cargo build --release\n\nFROM debian:bookworm-slim\nCOPY --from=build /app/target/release/app /app\nEXPOSE {port}\nCMD [\"/app\"]\n"
        ),
        Language::StaticHtml => format!(
            "FROM nginx:stable-alpine\nCOPY . /usr/share/nginx/html\nEXPOSE {port}\n"
        ),
    }
}

/// Everything needed to run `deploy_app`.
#[derive(Debug, Clone)]
pub struct DeployAppRequest {
    pub username: String,
    pub app_name: String,
    pub container_name: String,
    pub source_tarball: Vec<u8>,
    pub file_names: Vec<String>,
    pub port: u16,
    pub env_vars: HashMap<String, String>,
    pub desired_subdomain: Option<String>,
    pub base_domain: String,
    pub generate_if_missing: bool,
}

pub struct AppPipeline {
    hypervisor: Arc<dyn HypervisorAdapter>,
    proxy: Arc<dyn ProxyAdapter>,
    apps: Arc<dyn AppsRepository>,
    routes: Arc<dyn RoutesRepository>,
    event_bus: EventBus,
    locks: AppLocks,
    audit: Arc<dyn AuditLog>,
}

impl AppPipeline {
    pub fn new(
        hypervisor: Arc<dyn HypervisorAdapter>,
        proxy: Arc<dyn ProxyAdapter>,
        apps: Arc<dyn AppsRepository>,
        routes: Arc<dyn RoutesRepository>,
        event_bus: EventBus,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self { hypervisor, proxy, apps, routes, event_bus, locks: AppLocks::default(), audit }
    }

    /// Runs the full UPLOADING → BUILDING → RUNNING pipeline. `cancel` is
    /// the caller's request-scoped cancellation signal: once past the
    /// point of no return (route published) the pipeline always runs to
    /// completion, per §5's "no orphaned resources" rule.
    pub async fn deploy_app(&self, request: DeployAppRequest, cancel: CancellationToken) -> AppResult<App> {
        let key = (request.username.clone(), request.app_name.clone());
        let lock = self.locks.get(&key);
        let _guard = lock.lock().await;

        let subdomain = request
            .desired_subdomain
            .clone()
            .unwrap_or_else(|| format!("{}-{}", request.username, request.app_name));
        if !is_valid_subdomain(&subdomain) {
            return Err(AppError::invalid_argument(format!("invalid subdomain: {subdomain}")));
        }
        if let Some(existing) = self.apps.get_by_subdomain(&subdomain).await? {
            if existing.username != request.username || existing.name != request.app_name {
                return Err(AppError::already_exists(format!("subdomain {subdomain} already in use")));
            }
        }

        let now = chrono::Utc::now();
        let mut app = App {
            id: uuid::Uuid::new_v4(),
            username: request.username.clone(),
            name: request.app_name.clone(),
            state: AppState::Uploading,
            subdomain,
            base_domain: request.base_domain.clone(),
            port: request.port,
            container_name: request.container_name.clone(),
            container_ip: None,
            image: None,
            env_vars: request.env_vars.clone(),
            acl_preset: None,
            error_message: None,
            restart_count: 0,
            created_at: now,
            updated_at: now,
            deployed_at: None,
        };
        self.apps.save(&app).await?;
        self.publish(&app, EventKind::AppStateChanged);

        if cancel.is_cancelled() {
            return self.fail(&mut app, "CANCELLED").await;
        }

        // Transfer: write the source archive into the DevBox.
        let remote_tarball_path = format!("/srv/apps/{}/source.tar.gz", app.name);
        if let Err(err) = self
            .hypervisor
            .exec(&app.container_name, &["mkdir".into(), "-p".into(), format!("/srv/apps/{}", app.name)])
            .await
            .and_then(|_| Ok(()))
        {
            return self.fail_with(&mut app, &err.message).await;
        }
        if let Err(err) = self
            .hypervisor
            .write_file(&app.container_name, &remote_tarball_path, &request.source_tarball, 0o644)
            .await
        {
            return self.fail_with(&mut app, &err.message).await;
        }
        let extract_dir = format!("/srv/apps/{}/src", app.name);
        if let Err(err) = self
            .hypervisor
            .exec(
                &app.container_name,
                &[
                    "sh".into(),
                    "-c".into(),
                    format!("mkdir -p {extract_dir} && tar -xzf {remote_tarball_path} -C {extract_dir}"),
                ],
            )
            .await
        {
            return self.fail_with(&mut app, &err.message).await;
        }

        if cancel.is_cancelled() {
            return self.fail(&mut app, "CANCELLED").await;
        }

        // BUILDING.
        app.state = AppState::Building;
        app.updated_at = chrono::Utc::now();
        self.apps.save(&app).await?;
        self.publish(&app, EventKind::AppStateChanged);

        if !has_build_file(&request.file_names) {
            if !request.generate_if_missing {
                return self.fail(&mut app, "no build file present and generateIfMissing is false").await;
            }
            let Some(language) = detect_language(&request.file_names) else {
                return self.fail(&mut app, "could not detect a language for this source tree").await;
            };
            let rendered = render_build_file(language, request.port);
            let path = format!("{extract_dir}/Dockerfile");
            if let Err(err) = self.hypervisor.write_file(&app.container_name, &path, rendered.as_bytes(), 0o644).await
            {
                return self.fail_with(&mut app, &err.message).await;
            }
        }

        let image_tag = format!("{}/{}:latest", app.username, app.name);
        let build_result = self
            .hypervisor
            .exec(
                &app.container_name,
                &[
                    "sh".into(),
                    "-c".into(),
                    format!("cd {extract_dir} && docker build -t {image_tag} ."),
                ],
            )
            .await;
        let build_result = match build_result {
            Ok(result) => result,
            Err(err) => return self.fail_with(&mut app, &err.message).await,
        };
        if !build_result.success() {
            let tail = tail_bytes(&build_result.stderr, STDERR_TAIL_BYTES);
            return self.fail(&mut app, &format!("build failed (exit {}): {tail}", build_result.exit_code)).await;
        }
        app.image = Some(image_tag.clone());

        if cancel.is_cancelled() {
            return self.fail(&mut app, "CANCELLED").await;
        }

        // RUNNING: start the built image, wait for the port to accept
        // connections, then publish the route. Past this point we run to
        // completion regardless of cancellation.
        let env_flags: Vec<String> =
            request.env_vars.iter().flat_map(|(k, v)| vec!["-e".to_string(), format!("{k}={v}")]).collect();
        let mut run_argv =
            vec!["docker".into(), "run".into(), "-d".into(), "--name".into(), app.name.clone()];
        run_argv.extend(env_flags);
        run_argv.extend([
            "-p".to_string(),
            format!("{}:{}", request.port, request.port),
            image_tag.clone(),
        ]);
        if let Err(err) = self.hypervisor.exec(&app.container_name, &run_argv).await {
            return self.fail_with(&mut app, &err.message).await;
        }

        let container_ip = self
            .hypervisor
            .get_container(&app.container_name)
            .await?
            .and_then(|d| d.ip_address)
            .ok_or_else(|| AppError::failed_precondition("devbox has no IP address"))?;
        app.container_ip = Some(container_ip.clone());

        if !self.wait_for_port_ready(&container_ip, request.port).await {
            return self.fail(&mut app, "app did not start listening on its port in time").await;
        }

        self.proxy.upsert_http_route(&app.full_domain(), &container_ip, request.port).await?;
        self.routes
            .save_http(&HttpRoute {
                full_domain: app.full_domain(),
                target_ip: container_ip,
                target_port: request.port,
                active: true,
            })
            .await?;

        app.state = AppState::Running;
        app.deployed_at = Some(chrono::Utc::now());
        app.updated_at = chrono::Utc::now();
        self.apps.save(&app).await?;
        self.audit
            .append(ResourceType::App, &app.id.to_string(), EventKind::AppDeployed, json!({"fullDomain": app.full_domain()}))
            .await
            .ok();
        self.publish(&app, EventKind::AppDeployed);
        Ok(app)
    }

    async fn wait_for_port_ready(&self, ip: &str, port: u16) -> bool {
        for attempt in 0..READY_CHECK_ATTEMPTS {
            if TcpStream::connect((ip, port)).await.is_ok() {
                return true;
            }
            if attempt + 1 < READY_CHECK_ATTEMPTS {
                tokio::time::sleep(READY_CHECK_GAP).await;
            }
        }
        false
    }

    async fn fail(&self, app: &mut App, reason: &str) -> AppResult<App> {
        self.fail_with(app, reason).await
    }

    async fn fail_with(&self, app: &mut App, reason: &str) -> AppResult<App> {
        app.state = AppState::Failed;
        app.error_message = Some(reason.to_string());
        app.updated_at = chrono::Utc::now();
        self.apps.save(app).await?;
        self.audit
            .append(ResourceType::App, &app.id.to_string(), EventKind::AppStateChanged, json!({"state": "FAILED", "reason": reason}))
            .await
            .ok();
        self.publish(app, EventKind::AppStateChanged);
        Err(AppError::failed_precondition(format!("deploy failed: {reason}")))
    }

    fn publish(&self, app: &App, kind: EventKind) {
        self.event_bus.publish(
            ResourceType::App,
            app.id.to_string(),
            kind,
            json!({"username": app.username, "name": app.name, "state": format!("{:?}", app.state).to_uppercase()}),
        );
    }

    /// Spawns `deploy_app` as a detached background task, matching the
    /// async-create framing in C7: the caller gets the `UPLOADING`
    /// descriptor immediately and polls `GetApp` for the outcome.
    pub fn spawn_deploy(self: &Arc<Self>, request: DeployAppRequest) -> CancellationToken {
        let cancel = CancellationToken::new();
        let pipeline = Arc::clone(self);
        let child = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::time::timeout(DEPLOY_DEADLINE, pipeline.deploy_app(request, child)).await {
                tracing::warn!(error = %err, "deploy pipeline exceeded its deadline");
            }
        });
        cancel
    }

    pub async fn stop_app(&self, username: &str, name: &str) -> AppResult<()> {
        let key = (username.to_string(), name.to_string());
        let _guard = self.locks.get(&key).lock().await;
        let mut app = self.apps.get_by_username_name(username, name).await?;
        if app.state != AppState::Running {
            return Err(AppError::failed_precondition(format!("app is not running (state={:?})", app.state)));
        }
        self.hypervisor.exec(&app.container_name, &["docker".into(), "stop".into(), app.name.clone()]).await?;
        self.routes.set_http_active(&app.full_domain(), false).await?;
        app.state = AppState::Stopped;
        app.updated_at = chrono::Utc::now();
        self.apps.save(&app).await?;
        self.publish(&app, EventKind::AppStateChanged);
        Ok(())
    }

    pub async fn start_app(&self, username: &str, name: &str) -> AppResult<()> {
        let key = (username.to_string(), name.to_string());
        let _guard = self.locks.get(&key).lock().await;
        let mut app = self.apps.get_by_username_name(username, name).await?;
        if app.state != AppState::Stopped {
            return Err(AppError::failed_precondition(format!("app is not stopped (state={:?})", app.state)));
        }
        self.hypervisor.exec(&app.container_name, &["docker".into(), "start".into(), app.name.clone()]).await?;
        self.routes.set_http_active(&app.full_domain(), true).await?;
        app.state = AppState::Running;
        app.updated_at = chrono::Utc::now();
        self.apps.save(&app).await?;
        self.publish(&app, EventKind::AppStateChanged);
        Ok(())
    }

    pub async fn restart_app(&self, username: &str, name: &str) -> AppResult<()> {
        let key = (username.to_string(), name.to_string());
        let _guard = self.locks.get(&key).lock().await;
        let mut app = self.apps.get_by_username_name(username, name).await?;
        app.state = AppState::Restarting;
        app.updated_at = chrono::Utc::now();
        self.apps.save(&app).await?;
        self.publish(&app, EventKind::AppStateChanged);

        self.hypervisor.exec(&app.container_name, &["docker".into(), "restart".into(), app.name.clone()]).await?;
        app.state = AppState::Running;
        app.restart_count += 1;
        app.updated_at = chrono::Utc::now();
        self.apps.save(&app).await?;
        self.publish(&app, EventKind::AppStateChanged);
        Ok(())
    }

    /// Removes the running container, its image, its route, and the App
    /// record. `remove_data` additionally wipes the extracted source tree.
    pub async fn delete_app(&self, username: &str, name: &str, remove_data: bool) -> AppResult<()> {
        let key = (username.to_string(), name.to_string());
        let _guard = self.locks.get(&key).lock().await;
        let app = self.apps.get_by_username_name(username, name).await?;

        self.hypervisor.exec(&app.container_name, &["docker".into(), "rm".into(), "-f".into(), app.name.clone()]).await.ok();
        if let Some(image) = &app.image {
            self.hypervisor.exec(&app.container_name, &["docker".into(), "rmi".into(), "-f".into(), image.clone()]).await.ok();
        }
        if remove_data {
            self.hypervisor
                .exec(&app.container_name, &["rm".into(), "-rf".into(), format!("/srv/apps/{}", app.name)])
                .await
                .ok();
        }
        self.routes.delete_http(&app.full_domain()).await.ok();
        self.proxy.delete_http_route(&app.full_domain()).await.ok();
        self.apps.delete(app.id).await?;

        self.event_bus.publish(ResourceType::App, app.id.to_string(), EventKind::AppDeleted, json!({"username": username, "name": name}));
        Ok(())
    }

    /// Cascaded from DevBox delete: removes every App hosted on
    /// `container_name`, including their routes.
    pub async fn delete_all_for_container(&self, container_name: &str) -> AppResult<()> {
        let apps = self.apps.list_all().await?;
        for app in apps.into_iter().filter(|a| a.container_name == container_name) {
            self.routes.delete_http(&app.full_domain()).await.ok();
            self.proxy.delete_http_route(&app.full_domain()).await.ok();
            self.apps.delete(app.id).await.ok();
            self.event_bus.publish(ResourceType::App, app.id.to_string(), EventKind::AppDeleted, json!({}));
        }
        Ok(())
    }
}

fn tail_bytes(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        text.into_owned()
    } else {
        let start = (text.len() - max..text.len())
            .find(|&i| text.is_char_boundary(i))
            .unwrap_or(text.len());
        text[start..].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_node_over_static() {
        let files = vec!["package.json".to_string(), "index.html".to_string()];
        assert_eq!(detect_language(&files), Some(Language::Node));
    }

    #[test]
    fn detects_python() {
        let files = vec!["requirements.txt".to_string(), "app.py".to_string()];
        assert_eq!(detect_language(&files), Some(Language::Python));
    }

    #[test]
    fn no_signal_returns_none() {
        let files = vec!["README.md".to_string()];
        assert_eq!(detect_language(&files), None);
    }

    #[test]
    fn existing_dockerfile_short_circuits_generation() {
        let files = vec!["Dockerfile".to_string(), "package.json".to_string()];
        assert!(has_build_file(&files));
    }

    #[test]
    fn rendered_dockerfile_exposes_requested_port() {
        let rendered = render_build_file(Language::Node, 3000);
        assert!(rendered.contains("EXPOSE 3000"));
    }

    #[test]
    fn stderr_tail_truncates_from_the_end() {
        let long = "a".repeat(100).into_bytes();
        let tail = tail_bytes(&long, 10);
        assert_eq!(tail.len(), 10);
    }
}
