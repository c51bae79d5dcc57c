//! ビルドサービス
//!
//! プランの各ステップを1タスクとして起動し、タスクごとに
//!
//! 1. 親ステップの完了を待つ
//! 2. ビルダー、認証情報、ドライバーを解決してオプションをマージする
//! 3. ジョブを作成してディスパッチャーへ投入し、結果を待つ
//!
//! を行います。ステップは成功・失敗にかかわらず必ず子ステップへ通知します。

use crate::command::CommandFactory;
use crate::driver::{BuildDriver, DriverFactory};
use crate::error::{BuildError, Result};
use crate::options::{BuildDriverOptions, ServiceOptions};
use crate::plan::{Planner, Step, StepState};
use crate::semver::SemverGenerator;
use dockwright_core::{
    Builder, BuilderRef, BuildersStore, CoreError, CredentialsStore, DEFAULT_DRIVER,
    DRY_RUN_DRIVER, Image, ImageReference, UserPasswordAuth,
};
use dockwright_scheduler::{Dispatcher, JobError, JobFactory};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// 中間コンテナ名の接頭辞
const INTERMEDIATE_CONTAINER_PREFIX: &str = "builder";

#[derive(Clone, Default)]
pub struct BuildService {
    builders: Option<Arc<dyn BuildersStore>>,
    credentials: Option<Arc<dyn CredentialsStore>>,
    drivers: Option<Arc<dyn DriverFactory>>,
    commands: Option<Arc<dyn CommandFactory>>,
    jobs: Option<Arc<dyn JobFactory>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    semver: Option<Arc<dyn SemverGenerator>>,
}

/// 検証済みの依存コンポーネント
struct Components {
    builders: Arc<dyn BuildersStore>,
    credentials: Arc<dyn CredentialsStore>,
    drivers: Arc<dyn DriverFactory>,
    commands: Arc<dyn CommandFactory>,
    jobs: Arc<dyn JobFactory>,
    dispatcher: Arc<dyn Dispatcher>,
    semver: Option<Arc<dyn SemverGenerator>>,
}

/// ドライバーへ渡す直前まで解決されたステップ
#[derive(Debug, Clone)]
pub(crate) struct PreparedBuild {
    pub image: Image,
    pub driver_id: String,
    pub options: BuildDriverOptions,
}

impl BuildService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builders(mut self, builders: Arc<dyn BuildersStore>) -> Self {
        self.builders = Some(builders);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_driver_factory(mut self, drivers: Arc<dyn DriverFactory>) -> Self {
        self.drivers = Some(drivers);
        self
    }

    pub fn with_command_factory(mut self, commands: Arc<dyn CommandFactory>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn with_job_factory(mut self, jobs: Arc<dyn JobFactory>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// semver タグを有効にする場合に必要
    pub fn with_semver(mut self, semver: Arc<dyn SemverGenerator>) -> Self {
        self.semver = Some(semver);
        self
    }

    fn components(&self, options: &ServiceOptions) -> Result<Components> {
        fn require<T: ?Sized>(component: &Option<Arc<T>>, name: &'static str) -> Result<Arc<T>> {
            component.clone().ok_or(BuildError::MissingComponent(name))
        }

        let semver = self.semver.clone();
        if options.enable_semver_tags && semver.is_none() {
            return Err(BuildError::MissingComponent("semver generator"));
        }

        Ok(Components {
            builders: require(&self.builders, "builders store")?,
            credentials: require(&self.credentials, "credentials store")?,
            drivers: require(&self.drivers, "driver factory")?,
            commands: require(&self.commands, "command factory")?,
            jobs: require(&self.jobs, "job factory")?,
            dispatcher: require(&self.dispatcher, "dispatcher")?,
            semver,
        })
    }

    /// プランの全ステップをビルド
    ///
    /// 兄弟ステップはキャンセルせず全て完了を待ち、完了順で最初のエラーを返します。
    pub async fn build(
        &self,
        cancel: &CancellationToken,
        planner: &dyn Planner,
        name: &str,
        versions: &[String],
        options: &ServiceOptions,
    ) -> Result<()> {
        let components = Arc::new(self.components(options)?);
        let steps = planner.plan(name, versions)?;
        tracing::info!(image = name, steps = steps.len(), "Build plan created");

        let options = Arc::new(options.clone());
        let mut tasks = JoinSet::new();

        for step in steps {
            let components = components.clone();
            let options = options.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let key = step.key();
                let result = components.build_step(&cancel, step, &options).await;
                (key, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((_, Err(BuildError::Cancelled))) => BuildError::Cancelled,
                Ok((key, Err(e))) => BuildError::for_step(key.to_string(), e),
                Err(e) => BuildError::TaskPanicked(e.to_string()),
            };

            tracing::error!(error = %err, "Step failed");
            if first_error.is_none() {
                first_error = Some(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Components {
    async fn build_step(
        &self,
        cancel: &CancellationToken,
        step: Arc<Step>,
        options: &ServiceOptions,
    ) -> Result<()> {
        let _guard = step.notify_guard();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                step.set_state(StepState::Failed);
                return Err(BuildError::Cancelled);
            }
            _ = step.wait() => {}
        }

        step.set_state(StepState::Running);
        tracing::info!(step = %step.key(), "Step started");

        let result = self.execute(cancel, &step, options).await;
        match &result {
            Ok(()) => {
                step.set_state(StepState::Succeeded);
                tracing::info!(step = %step.key(), "Step finished");
            }
            Err(e) => {
                step.set_state(StepState::Failed);
                tracing::debug!(step = %step.key(), error = %e, "Step failed");
            }
        }
        result
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        step: &Step,
        options: &ServiceOptions,
    ) -> Result<()> {
        let prepared = self.prepare(step.image(), options)?;
        let driver = self.driver(&prepared.driver_id, options.dry_run)?;

        let command = self
            .commands
            .create(driver, prepared.image, prepared.options);
        let job = self.jobs.create(command);
        self.dispatcher.enqueue(job.clone());

        tokio::select! {
            result = job.wait() => result.map_err(from_job_error),
            _ = cancel.cancelled() => {
                job.close();
                Err(BuildError::Cancelled)
            }
        }
    }

    /// イメージとオプションをマージしてドライバーオプションを作る
    fn prepare(&self, image: &Image, options: &ServiceOptions) -> Result<PreparedBuild> {
        let mut image = image.clone();
        apply_overrides(&mut image, options);

        let semver_tags = match (&self.semver, options.enable_semver_tags) {
            (Some(semver), true) => {
                let mut versions = options.tags.clone();
                versions.push(image.version.clone());
                semver
                    .generate(&versions, &options.semver_tags_templates)
                    .unwrap_or_else(|e| {
                        tracing::warn!(image = %image.key(), error = %e, "Semver tags could not be generated");
                        Vec::new()
                    })
            }
            _ => Vec::new(),
        };
        image.tags = merge_tags(&image.tags, &semver_tags, &options.tags);
        merge_vars_and_labels(&mut image, options);

        let builder = self.builder(&image)?;
        let pull_auth = match &image.parent {
            Some(parent) => self.credentials(&parent.registry_host)?,
            None => None,
        };
        let push_auth = self.credentials(&image.registry_host)?;

        let builder_name = options
            .intermediate_container_name
            .clone()
            .unwrap_or_else(|| intermediate_container_name(&builder.driver, &image));

        let driver_options = BuildDriverOptions {
            builder_name,
            inventory_path: options
                .inventory_path
                .clone()
                .or_else(|| builder.options.inventory.clone()),
            builder_options: builder.options,
            connection_local: options.connection_local,
            limit: options.limit.clone(),
            pull_auth,
            push_auth,
            pull_parent_image: options.pull_parent_image,
            push_image_after_build: options.push_image_after_build,
            remove_image_after_push: options.remove_images_after_push,
        };

        tracing::debug!(
            image = %image.fully_qualified_name(),
            driver = %builder.driver,
            tags = ?image.tags,
            "Step resolved"
        );

        Ok(PreparedBuild {
            image,
            driver_id: builder.driver,
            options: driver_options,
        })
    }

    /// ビルダーを解決（未指定は default ドライバー）
    fn builder(&self, image: &Image) -> Result<Builder> {
        let mut builder = match &image.builder {
            None => Builder::new(&image.name, DEFAULT_DRIVER),
            Some(BuilderRef::Named(name)) => self.builders.find(name)?,
            Some(BuilderRef::Inline(builder)) => {
                let mut builder = builder.clone();
                if builder.name.is_empty() {
                    builder.name = image.key().to_string();
                }
                builder
            }
        };

        if builder.driver.is_empty() {
            builder.driver = DEFAULT_DRIVER.to_string();
        }
        Ok(builder)
    }

    /// 認証情報を取得（登録がなければ匿名）
    fn credentials(&self, registry_host: &str) -> Result<Option<UserPasswordAuth>> {
        match self.credentials.get(registry_host) {
            Ok(auth) => Ok(Some(auth)),
            Err(CoreError::CredentialsNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// ドライバーを選択
    ///
    /// dry run は常に dry-run ドライバー。未登録のドライバーはそのステップの失敗です。
    fn driver(&self, driver_id: &str, dry_run: bool) -> Result<Arc<dyn BuildDriver>> {
        let id = if dry_run { DRY_RUN_DRIVER } else { driver_id };
        self.drivers.get(id)
    }
}

/// 呼び出し側によるイメージ名・レジストリ・親イメージの上書き
fn apply_overrides(image: &mut Image, options: &ServiceOptions) {
    if let Some(name) = &options.image_name {
        image.name = name.clone();
    }
    if let Some(host) = &options.image_registry_host {
        image.registry_host = host.clone();
    }
    if let Some(namespace) = &options.image_registry_namespace {
        image.registry_namespace = namespace.clone();
    }

    if image.parent.is_none() && options.image_from_name.is_some() {
        image.parent = Some(ImageReference::default());
    }
    if let Some(parent) = &mut image.parent {
        if let Some(name) = &options.image_from_name {
            parent.name = name.clone();
        }
        if let Some(version) = &options.image_from_version {
            parent.version = version.clone();
        }
        if let Some(host) = &options.image_from_registry_host {
            parent.registry_host = host.clone();
        }
        if let Some(namespace) = &options.image_from_registry_namespace {
            parent.registry_namespace = namespace.clone();
        }
    }
}

/// イメージのタグ、semver タグ、呼び出し側のタグの順で重複なく並べる
fn merge_tags(image_tags: &[String], semver_tags: &[String], call_tags: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::with_capacity(image_tags.len() + semver_tags.len() + call_tags.len());
    for tag in image_tags.iter().chain(semver_tags).chain(call_tags) {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

/// 永続変数・永続ラベルはイメージ側、通常の変数・ラベルは呼び出し側が優先
fn merge_vars_and_labels(image: &mut Image, options: &ServiceOptions) {
    for (k, v) in &options.persistent_vars {
        image
            .persistent_vars
            .entry(k.clone())
            .or_insert_with(|| v.clone());
    }
    for (k, v) in &options.persistent_labels {
        image
            .persistent_labels
            .entry(k.clone())
            .or_insert_with(|| v.clone());
    }

    image
        .vars
        .extend(options.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
    image
        .labels
        .extend(options.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// `builder_<driver>_<namespace>_<name>_<version>`
fn intermediate_container_name(driver: &str, image: &Image) -> String {
    [
        INTERMEDIATE_CONTAINER_PREFIX,
        driver,
        image.registry_namespace.as_str(),
        image.name.as_str(),
        image.version.as_str(),
    ]
    .join("_")
}

/// コマンドが返した `BuildError` はそのまま取り出す
fn from_job_error(err: JobError) -> BuildError {
    match err {
        JobError::Command(e) => match e.downcast::<BuildError>() {
            Ok(build_error) => build_error,
            Err(e) => BuildError::Job(JobError::Command(e)),
        },
        other => BuildError::Job(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DefaultCommandFactory;
    use crate::driver::{DriverRegistry, DryRunDriver};
    use crate::semver::DefaultSemverGenerator;
    use dockwright_core::{BuilderOptions, BuildersIndex, DOCKER_DRIVER, StaticCredentials};
    use dockwright_scheduler::{DefaultJobFactory, Dispatch};
    use serde_json::json;

    struct BrokenCredentials;

    impl CredentialsStore for BrokenCredentials {
        fn get(&self, registry_host: &str) -> dockwright_core::Result<UserPasswordAuth> {
            Err(CoreError::CredentialsUnavailable {
                registry: registry_host.to_string(),
                message: "helper crashed".to_string(),
            })
        }
    }

    fn components() -> Components {
        let mut builders = BuildersIndex::new();
        builders.add(
            Builder::new("php-builder", "docker").with_options(BuilderOptions {
                context: Some("/src/php".into()),
                inventory: Some("inventory.ini".into()),
                ..Default::default()
            }),
        );

        let mut credentials = StaticCredentials::new();
        credentials.insert("registry.example.com", UserPasswordAuth::new("ci", "secret"));

        let drivers = DriverRegistry::new()
            .with_driver(DRY_RUN_DRIVER, Arc::new(DryRunDriver::new()))
            .with_driver(DEFAULT_DRIVER, Arc::new(DryRunDriver::new()));

        Components {
            builders: Arc::new(builders),
            credentials: Arc::new(credentials),
            drivers: Arc::new(drivers),
            commands: Arc::new(DefaultCommandFactory),
            jobs: Arc::new(DefaultJobFactory),
            dispatcher: Arc::new(Dispatch::default()),
            semver: Some(Arc::new(DefaultSemverGenerator::new())),
        }
    }

    fn php_image() -> Image {
        let mut image = Image::new("php-fpm", "8.0.3");
        image.registry_host = "registry.example.com".into();
        image.registry_namespace = "base".into();
        image.builder = Some(BuilderRef::from("php-builder"));
        image.tags = vec!["8.0".into()];
        image.parent = Some(ImageReference {
            name: "ubuntu".into(),
            version: "20.04".into(),
            ..Default::default()
        });
        image
    }

    #[test]
    fn test_missing_component() {
        let service = BuildService::new()
            .with_builders(Arc::new(BuildersIndex::new()))
            .with_credentials(Arc::new(StaticCredentials::new()));

        assert!(matches!(
            service.components(&ServiceOptions::default()),
            Err(BuildError::MissingComponent("driver factory"))
        ));
    }

    #[test]
    fn test_semver_generator_required_only_when_enabled() {
        let service = BuildService::new()
            .with_builders(Arc::new(BuildersIndex::new()))
            .with_credentials(Arc::new(StaticCredentials::new()))
            .with_driver_factory(Arc::new(DriverRegistry::new()))
            .with_command_factory(Arc::new(DefaultCommandFactory))
            .with_job_factory(Arc::new(DefaultJobFactory))
            .with_dispatcher(Arc::new(Dispatch::default()));

        assert!(service.components(&ServiceOptions::default()).is_ok());

        let options = ServiceOptions {
            enable_semver_tags: true,
            ..Default::default()
        };
        assert!(matches!(
            service.components(&options),
            Err(BuildError::MissingComponent("semver generator"))
        ));
    }

    #[test]
    fn test_prepare_resolves_named_builder_and_credentials() {
        let prepared = components()
            .prepare(&php_image(), &ServiceOptions::default())
            .unwrap();

        assert_eq!(prepared.driver_id, "docker");
        assert_eq!(
            prepared.options.builder_name,
            "builder_docker_base_php-fpm_8.0.3"
        );
        assert_eq!(
            prepared.options.builder_options.context,
            Some("/src/php".into())
        );
        assert_eq!(
            prepared.options.inventory_path.as_deref(),
            Some("inventory.ini")
        );
        assert_eq!(prepared.options.push_auth.unwrap().username, "ci");
        // docker.io の認証情報は未登録なので匿名
        assert!(prepared.options.pull_auth.is_none());
    }

    #[test]
    fn test_prepare_intermediate_name_is_deterministic() {
        let components = components();
        let first = components
            .prepare(&php_image(), &ServiceOptions::default())
            .unwrap();
        let second = components
            .prepare(&php_image(), &ServiceOptions::default())
            .unwrap();
        assert_eq!(first.options.builder_name, second.options.builder_name);

        let options = ServiceOptions {
            intermediate_container_name: Some("custom".into()),
            ..Default::default()
        };
        let prepared = components.prepare(&php_image(), &options).unwrap();
        assert_eq!(prepared.options.builder_name, "custom");
    }

    #[test]
    fn test_prepare_precedence() {
        let mut image = php_image();
        image.persistent_vars.insert("php".into(), json!("8.0"));
        image.vars.insert("debug".into(), json!(false));
        image.labels.insert("tier".into(), "base".into());
        image
            .persistent_labels
            .insert("owner".into(), "platform".into());

        let mut options = ServiceOptions::default();
        options.persistent_vars.insert("php".into(), json!("7.4"));
        options.persistent_vars.insert("os".into(), json!("linux"));
        options.vars.insert("debug".into(), json!(true));
        options.labels.insert("tier".into(), "edge".into());
        options
            .persistent_labels
            .insert("owner".into(), "someone".into());

        let prepared = components().prepare(&image, &options).unwrap();
        let image = prepared.image;

        assert_eq!(image.persistent_vars["php"], json!("8.0"));
        assert_eq!(image.persistent_vars["os"], json!("linux"));
        assert_eq!(image.vars["debug"], json!(true));
        assert_eq!(image.labels["tier"], "edge");
        assert_eq!(image.persistent_labels["owner"], "platform");
    }

    #[test]
    fn test_prepare_tags_order() {
        let options = ServiceOptions {
            enable_semver_tags: true,
            semver_tags_templates: vec!["{{ .Major }}".into(), "{{ .Major }}.{{ .Minor }}".into()],
            tags: vec!["latest".into(), "8.0".into()],
            ..Default::default()
        };

        let prepared = components().prepare(&php_image(), &options).unwrap();
        assert_eq!(prepared.image.tags, vec!["8.0", "8", "latest"]);
    }

    #[test]
    fn test_prepare_overrides() {
        let options = ServiceOptions {
            image_registry_host: Some("mirror.example.com".into()),
            image_from_version: Some("22.04".into()),
            image_from_registry_host: Some("registry.example.com".into()),
            ..Default::default()
        };

        let prepared = components().prepare(&php_image(), &options).unwrap();
        let parent = prepared.image.parent.unwrap();
        assert_eq!(prepared.image.registry_host, "mirror.example.com");
        assert_eq!(parent.fully_qualified_name(), "registry.example.com/ubuntu:22.04");
        assert_eq!(prepared.options.pull_auth.unwrap().username, "ci");
        assert!(prepared.options.push_auth.is_none());
    }

    #[test]
    fn test_prepare_without_builder_uses_default_driver() {
        let prepared = components()
            .prepare(&Image::new("app", "1.0"), &ServiceOptions::default())
            .unwrap();
        assert_eq!(prepared.driver_id, DEFAULT_DRIVER);
        assert_eq!(prepared.options.builder_name, "builder_default__app_1.0");
    }

    #[test]
    fn test_prepare_inline_builder_name() {
        let mut image = Image::new("app", "1.0");
        image.builder = Some(BuilderRef::Inline(Builder::new("", "docker")));

        let components = components();
        assert_eq!(components.builder(&image).unwrap().name, "app:1.0");
    }

    #[test]
    fn test_prepare_unknown_named_builder() {
        let mut image = Image::new("app", "1.0");
        image.builder = Some(BuilderRef::from("missing"));

        assert!(matches!(
            components().prepare(&image, &ServiceOptions::default()),
            Err(BuildError::Core(CoreError::BuilderNotFound(_)))
        ));
    }

    #[test]
    fn test_credentials_error_fails_step() {
        let components = Components {
            credentials: Arc::new(BrokenCredentials),
            ..components()
        };

        assert!(matches!(
            components.prepare(&php_image(), &ServiceOptions::default()),
            Err(BuildError::Core(CoreError::CredentialsUnavailable { .. }))
        ));
    }

    #[test]
    fn test_driver_selection() {
        let components = components();

        assert!(components.driver(DEFAULT_DRIVER, false).is_ok());
        // dry run では宣言されたドライバーに関係なく dry-run
        assert!(components.driver("ansible-playbook", true).is_ok());

        // 未登録のドライバーは default で代替しない
        assert!(matches!(
            components.driver("docker", false),
            Err(BuildError::DriverNotFound(id)) if id == "docker"
        ));

        let components = Components {
            drivers: Arc::new(
                DriverRegistry::new().with_driver(DOCKER_DRIVER, Arc::new(DryRunDriver::new())),
            ),
            ..components
        };
        assert!(components.driver("docker", false).is_ok());
        assert!(matches!(
            components.driver(DEFAULT_DRIVER, false),
            Err(BuildError::DriverNotFound(id)) if id == DEFAULT_DRIVER
        ));
    }

    #[test]
    fn test_from_job_error_unwraps_build_error() {
        let err = from_job_error(JobError::Command(anyhow::Error::new(BuildError::BuildFailed(
            "exit 1".into(),
        ))));
        assert!(matches!(err, BuildError::BuildFailed(_)));

        let err = from_job_error(JobError::Command(anyhow::anyhow!("other")));
        assert!(matches!(err, BuildError::Job(JobError::Command(_))));
    }
}
