//! ビルド要求1件分の配線
//!
//! プランの作成、設定のマージ、ディスパッチャーの起動と停止を受け持ち、
//! 実際のビルドは `BuildService` に委ねます。

use crate::auth::DockerConfigCredentials;
use crate::command::DefaultCommandFactory;
use crate::driver::DriverRegistry;
use crate::error::Result;
use crate::options::ServiceOptions;
use crate::plan::{PlanFactory, PlanKind};
use crate::semver::{DefaultSemverGenerator, SemverGenerator};
use crate::service::BuildService;
use dockwright_config::Settings;
use dockwright_core::{BuildersStore, CredentialsStore, ImagesStore};
use dockwright_scheduler::{DefaultJobFactory, Dispatch};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// ビルド要求
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// 空の場合は全バージョン
    pub versions: Vec<String>,
    pub plan: PlanKind,
    pub options: ServiceOptions,
    /// ワーカー数の上書き
    pub concurrency: Option<usize>,
}

pub struct BuildEntrypoint {
    images: Arc<dyn ImagesStore>,
    builders: Arc<dyn BuildersStore>,
    credentials: Option<Arc<dyn CredentialsStore>>,
    drivers: Option<DriverRegistry>,
    settings: Settings,
    semver: Arc<dyn SemverGenerator>,
}

impl BuildEntrypoint {
    pub fn new(images: Arc<dyn ImagesStore>, builders: Arc<dyn BuildersStore>) -> Self {
        Self {
            images,
            builders,
            credentials: None,
            drivers: None,
            settings: Settings::default(),
            semver: Arc::new(DefaultSemverGenerator::new()),
        }
    }

    /// 未指定時は Docker config.json を参照
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// 未指定時は `DriverRegistry::with_local_defaults()`
    pub fn with_drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = Some(drivers);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_semver(mut self, semver: Arc<dyn SemverGenerator>) -> Self {
        self.semver = semver;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn credentials(&self) -> Arc<dyn CredentialsStore> {
        match (&self.credentials, &self.settings.docker_config_path) {
            (Some(credentials), _) => credentials.clone(),
            (None, Some(path)) => Arc::new(DockerConfigCredentials::with_config_path(path)),
            (None, None) => Arc::new(DockerConfigCredentials::new()),
        }
    }

    /// 実際に起動するワーカー数
    fn concurrency(&self, request: &BuildRequest) -> usize {
        match request.concurrency {
            Some(_) if request.options.dry_run => 1,
            Some(n) => n.max(1),
            None => self.settings.effective_concurrency(request.options.dry_run),
        }
    }

    /// `name` のイメージをビルド
    ///
    /// ディスパッチャーは結果にかかわらず停止されます。
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        name: &str,
        request: BuildRequest,
    ) -> Result<()> {
        let planner =
            PlanFactory::new(self.images.clone()).new_plan(request.plan, &request.options)?;

        let concurrency = self.concurrency(&request);
        let options = request.options.with_defaults(&self.settings);

        let drivers = match &self.drivers {
            Some(drivers) => drivers.clone(),
            None => DriverRegistry::with_local_defaults(),
        };

        let dispatch = Arc::new(Dispatch::default().with_num_workers(concurrency));
        dispatch.start(cancel)?;

        let service = BuildService::new()
            .with_builders(self.builders.clone())
            .with_credentials(self.credentials())
            .with_driver_factory(Arc::new(drivers))
            .with_command_factory(Arc::new(DefaultCommandFactory))
            .with_job_factory(Arc::new(DefaultJobFactory))
            .with_dispatcher(dispatch.clone())
            .with_semver(self.semver.clone());

        tracing::info!(
            image = name,
            versions = ?request.versions,
            plan = ?request.plan,
            workers = concurrency,
            dry_run = options.dry_run,
            "Starting build"
        );

        let result = service
            .build(cancel, planner.as_ref(), name, &request.versions, &options)
            .await;
        dispatch.stop().await;

        result
    }
}
