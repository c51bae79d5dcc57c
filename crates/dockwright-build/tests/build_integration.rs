//! ビルド全体の統合テスト
//!
//! Docker を使わず、記録用のドライバーでプラン・ディスパッチャー・サービスの
//! 連携を確認します。

use async_trait::async_trait;
use dockwright_build::{
    BuildDriver, BuildDriverOptions, BuildEntrypoint, BuildError, BuildRequest, BuildService,
    CascadePlan, Depth, DriverRegistry, PlanKind, Planner, ServiceOptions, SinglePlan,
};
use dockwright_config::Settings;
use dockwright_core::{
    ANSIBLE_PLAYBOOK_DRIVER, Builder, BuilderOptions, BuilderRef, BuildersIndex, DEFAULT_DRIVER,
    DOCKER_DRIVER, DRY_RUN_DRIVER, Image, ImageGraph, ImageKey, StaticCredentials,
    UserPasswordAuth,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingDriver {
    events: Mutex<Vec<String>>,
    built: Mutex<Vec<(Image, BuildDriverOptions)>>,
    fail: Vec<String>,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingDriver {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn failing(keys: &[&str]) -> Self {
        Self {
            fail: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn built_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .built
            .lock()
            .unwrap()
            .iter()
            .map(|(image, _)| image.key().to_string())
            .collect();
        keys.sort();
        keys
    }

    fn built(&self, key: &str) -> (Image, BuildDriverOptions) {
        self.built
            .lock()
            .unwrap()
            .iter()
            .find(|(image, _)| image.key().to_string() == key)
            .cloned()
            .unwrap()
    }

    fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("missing event {}", event))
    }
}

#[async_trait]
impl BuildDriver for RecordingDriver {
    async fn build(
        &self,
        _cancel: &CancellationToken,
        image: &Image,
        options: &BuildDriverOptions,
    ) -> dockwright_build::Result<()> {
        let key = image.key().to_string();
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        self.events.lock().unwrap().push(format!("start:{}", key));

        tokio::time::sleep(self.delay).await;

        self.built
            .lock()
            .unwrap()
            .push((image.clone(), options.clone()));
        self.events.lock().unwrap().push(format!("finish:{}", key));
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail.contains(&key) {
            return Err(BuildError::BuildFailed(format!("{} exited with 1", key)));
        }
        Ok(())
    }
}

/// ubuntu:20.04 ─┬─ php-fpm:8.0 ── php-app:1.0
///               └─ nginx:1.25
/// ubuntu:22.04
fn graph() -> ImageGraph {
    let mut graph = ImageGraph::new();

    let mut php = Image::new("php-fpm", "8.0");
    php.builder = Some(BuilderRef::from("php-builder"));
    php.persistent_vars.insert("php_version".into(), json!("8.0"));
    php.registry_host = "registry.example.com".into();

    for image in [
        Image::new("ubuntu", "20.04"),
        Image::new("ubuntu", "22.04"),
        php,
        Image::new("php-app", "1.0"),
        Image::new("nginx", "1.25"),
    ] {
        graph.add(image).unwrap();
    }

    for (parent, child) in [
        (("ubuntu", "20.04"), ("php-fpm", "8.0")),
        (("php-fpm", "8.0"), ("php-app", "1.0")),
        (("ubuntu", "20.04"), ("nginx", "1.25")),
    ] {
        graph
            .link(
                &ImageKey::new(parent.0, parent.1),
                &ImageKey::new(child.0, child.1),
            )
            .unwrap();
    }
    graph
}

fn builders() -> BuildersIndex {
    let mut builders = BuildersIndex::new();
    builders.add(Builder::new("php-builder", "docker"));
    builders
}

fn entrypoint(driver: Arc<RecordingDriver>) -> BuildEntrypoint {
    let mut credentials = StaticCredentials::new();
    credentials.insert("registry.example.com", UserPasswordAuth::new("ci", "secret"));

    BuildEntrypoint::new(Arc::new(graph()), Arc::new(builders()))
        .with_credentials(Arc::new(credentials))
        .with_drivers(
            DriverRegistry::new()
                .with_driver(DEFAULT_DRIVER, driver.clone())
                .with_driver(DOCKER_DRIVER, driver),
        )
        .with_settings(Settings {
            concurrency: 2,
            ..Settings::default()
        })
}

fn link(graph: &mut ImageGraph, parent: (&str, &str), child: (&str, &str)) {
    graph
        .link(
            &ImageKey::new(parent.0, parent.1),
            &ImageKey::new(child.0, child.1),
        )
        .unwrap();
}

fn cascade(depth: Depth, versions: &[&str]) -> BuildRequest {
    BuildRequest {
        versions: versions.iter().map(|v| v.to_string()).collect(),
        plan: PlanKind::Cascade { depth },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_single_plan_builds_every_version() {
    let driver = Arc::new(RecordingDriver::default());

    let result = entrypoint(driver.clone())
        .execute(&CancellationToken::new(), "ubuntu", BuildRequest::default())
        .await;

    tokio_test::assert_ok!(result);
    assert_eq!(driver.built_keys(), vec!["ubuntu:20.04", "ubuntu:22.04"]);
}

#[tokio::test]
async fn test_single_plan_does_not_follow_children() {
    let driver = Arc::new(RecordingDriver::default());
    let request = BuildRequest {
        versions: vec!["20.04".into()],
        ..Default::default()
    };

    entrypoint(driver.clone())
        .execute(&CancellationToken::new(), "ubuntu", request)
        .await
        .unwrap();

    assert_eq!(driver.built_keys(), vec!["ubuntu:20.04"]);
}

#[tokio::test]
async fn test_cascade_builds_parents_before_children() {
    let driver = Arc::new(RecordingDriver::with_delay(Duration::from_millis(20)));

    entrypoint(driver.clone())
        .execute(
            &CancellationToken::new(),
            "ubuntu",
            cascade(Depth::Unlimited, &["20.04"]),
        )
        .await
        .unwrap();

    assert_eq!(
        driver.built_keys(),
        vec!["nginx:1.25", "php-app:1.0", "php-fpm:8.0", "ubuntu:20.04"]
    );
    assert!(driver.position("finish:ubuntu:20.04") < driver.position("start:php-fpm:8.0"));
    assert!(driver.position("finish:ubuntu:20.04") < driver.position("start:nginx:1.25"));
    assert!(driver.position("finish:php-fpm:8.0") < driver.position("start:php-app:1.0"));
}

#[tokio::test]
async fn test_cascade_depth_bound() {
    let driver = Arc::new(RecordingDriver::default());

    entrypoint(driver.clone())
        .execute(
            &CancellationToken::new(),
            "ubuntu",
            cascade(Depth::Limited(1), &["20.04"]),
        )
        .await
        .unwrap();

    assert_eq!(
        driver.built_keys(),
        vec!["nginx:1.25", "php-fpm:8.0", "ubuntu:20.04"]
    );
}

#[tokio::test]
async fn test_cascade_failure_unblocks_children_and_returns_error() {
    let driver = Arc::new(RecordingDriver::failing(&["php-fpm:8.0"]));

    let result = entrypoint(driver.clone())
        .execute(
            &CancellationToken::new(),
            "ubuntu",
            cascade(Depth::Unlimited, &["20.04"]),
        )
        .await;

    match result {
        Err(BuildError::Step { image, source }) => {
            assert_eq!(image, "php-fpm:8.0");
            assert!(matches!(*source, BuildError::BuildFailed(_)));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    // 失敗した親の子も実行される
    assert_eq!(
        driver.built_keys(),
        vec!["nginx:1.25", "php-app:1.0", "php-fpm:8.0", "ubuntu:20.04"]
    );
}

#[tokio::test]
async fn test_dispatcher_bounds_concurrency() {
    let mut graph = ImageGraph::new();
    for i in 0..8 {
        graph.add(Image::new("worker", format!("1.{}", i))).unwrap();
    }

    let driver = Arc::new(RecordingDriver::with_delay(Duration::from_millis(30)));
    let entrypoint = BuildEntrypoint::new(Arc::new(graph), Arc::new(BuildersIndex::new()))
        .with_credentials(Arc::new(StaticCredentials::new()))
        .with_drivers(DriverRegistry::new().with_driver(DEFAULT_DRIVER, driver.clone()));

    let request = BuildRequest {
        concurrency: Some(3),
        ..Default::default()
    };
    entrypoint
        .execute(&CancellationToken::new(), "worker", request)
        .await
        .unwrap();

    assert_eq!(driver.built_keys().len(), 8);
    let max = driver.max_running.load(Ordering::SeqCst);
    assert!(max <= 3, "max concurrent builds: {}", max);
    assert!(max >= 2, "builds did not overlap: {}", max);
}

#[tokio::test]
async fn test_dry_run_uses_dry_run_driver() {
    let failing = Arc::new(RecordingDriver::failing(&["ubuntu:20.04", "ubuntu:22.04"]));
    let dry_run = Arc::new(RecordingDriver::default());

    let entrypoint = BuildEntrypoint::new(Arc::new(graph()), Arc::new(builders()))
        .with_credentials(Arc::new(StaticCredentials::new()))
        .with_drivers(
            DriverRegistry::new()
                .with_driver(DEFAULT_DRIVER, failing.clone())
                .with_driver(DRY_RUN_DRIVER, dry_run.clone()),
        );

    let request = BuildRequest {
        options: ServiceOptions {
            dry_run: true,
            ..Default::default()
        },
        ..Default::default()
    };
    entrypoint
        .execute(&CancellationToken::new(), "ubuntu", request)
        .await
        .unwrap();

    assert!(failing.built_keys().is_empty());
    assert_eq!(dry_run.built_keys().len(), 2);
}

#[tokio::test]
async fn test_options_are_merged_into_driver_options() {
    let driver = Arc::new(RecordingDriver::default());

    let mut options = ServiceOptions {
        push_image_after_build: true,
        tags: vec!["stable".into()],
        ..Default::default()
    };
    options.add_persistent_var("php_version=7.4").unwrap();
    options.add_persistent_var("os=linux").unwrap();
    options.add_label("team=platform").unwrap();

    let request = BuildRequest {
        versions: vec!["8.0".into()],
        options,
        ..Default::default()
    };
    entrypoint(driver.clone())
        .execute(&CancellationToken::new(), "php-fpm", request)
        .await
        .unwrap();

    let (image, options) = driver.built("php-fpm:8.0");
    assert_eq!(image.persistent_vars["php_version"], json!("8.0"));
    assert_eq!(image.persistent_vars["os"], json!("linux"));
    assert_eq!(image.labels["team"], "platform");
    assert_eq!(image.tags, vec!["stable"]);
    assert_eq!(options.builder_name, "builder_docker__php-fpm_8.0");
    assert_eq!(options.push_auth.map(|a| a.username).as_deref(), Some("ci"));
    assert!(options.push_image_after_build);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let driver = Arc::new(RecordingDriver::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = entrypoint(driver.clone())
        .execute(&cancel, "ubuntu", BuildRequest::default())
        .await;

    assert!(matches!(result, Err(BuildError::Cancelled)));
    assert!(driver.built_keys().is_empty());
}

#[tokio::test]
async fn test_service_requires_components() {
    let planner = SinglePlan::new(Arc::new(graph()));

    let result = BuildService::new()
        .build(
            &CancellationToken::new(),
            &planner,
            "ubuntu",
            &[],
            &ServiceOptions::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(BuildError::MissingComponent("builders store"))
    ));
}

#[tokio::test]
async fn test_cascade_depth_cut_still_orders_fan_in() {
    // base ─┬─ tools ── app
    //       └─ app
    let mut graph = ImageGraph::new();
    for name in ["base", "tools", "app"] {
        graph.add(Image::new(name, "1.0")).unwrap();
    }
    link(&mut graph, ("base", "1.0"), ("tools", "1.0"));
    link(&mut graph, ("base", "1.0"), ("app", "1.0"));
    link(&mut graph, ("tools", "1.0"), ("app", "1.0"));

    let driver = Arc::new(RecordingDriver::with_delay(Duration::from_millis(20)));
    let entrypoint = BuildEntrypoint::new(Arc::new(graph), Arc::new(BuildersIndex::new()))
        .with_credentials(Arc::new(StaticCredentials::new()))
        .with_drivers(DriverRegistry::new().with_driver(DEFAULT_DRIVER, driver.clone()))
        .with_settings(Settings {
            concurrency: 3,
            ..Settings::default()
        });

    entrypoint
        .execute(&CancellationToken::new(), "base", cascade(Depth::Limited(1), &[]))
        .await
        .unwrap();

    assert_eq!(driver.built_keys(), vec!["app:1.0", "base:1.0", "tools:1.0"]);
    assert!(driver.position("finish:base:1.0") < driver.position("start:tools:1.0"));
    assert!(driver.position("finish:tools:1.0") < driver.position("start:app:1.0"));
}

#[tokio::test]
async fn test_unregistered_driver_fails_step() {
    let mut graph = ImageGraph::new();
    let mut app = Image::new("app", "1.0");
    app.builder = Some(BuilderRef::from(
        Builder::new("", ANSIBLE_PLAYBOOK_DRIVER).with_options(BuilderOptions {
            playbook: Some("site.yml".into()),
            inventory: Some("hosts.ini".into()),
            ..Default::default()
        }),
    ));
    graph.add(app).unwrap();
    graph.add(Image::new("app", "2.0")).unwrap();

    let driver = Arc::new(RecordingDriver::default());
    let entrypoint = BuildEntrypoint::new(Arc::new(graph), Arc::new(BuildersIndex::new()))
        .with_credentials(Arc::new(StaticCredentials::new()))
        .with_drivers(DriverRegistry::new().with_driver(DEFAULT_DRIVER, driver.clone()));

    let result = entrypoint
        .execute(&CancellationToken::new(), "app", BuildRequest::default())
        .await;

    match result {
        Err(BuildError::Step { image, source }) => {
            assert_eq!(image, "app:1.0");
            assert!(
                matches!(*source, BuildError::DriverNotFound(ref id) if id == ANSIBLE_PLAYBOOK_DRIVER)
            );
        }
        other => panic!("unexpected result: {:?}", other),
    }

    // default ドライバーで代わりにビルドされることはない
    assert_eq!(driver.built_keys(), vec!["app:2.0"]);
}

#[test]
fn test_cascade_plan_is_deterministic() {
    let planner = CascadePlan::new(Arc::new(graph()), Depth::Unlimited);
    let versions = vec!["20.04".to_string()];

    let first = planner.plan("ubuntu", &versions).unwrap();
    let second = planner.plan("ubuntu", &versions).unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.image(), b.image());
        assert_eq!(a.pending_parents(), b.pending_parents());
        assert!(!Arc::ptr_eq(a, b));
    }
}
