//! ビルドコマンド
//!
//! ドライバー、解決済みのイメージ、ドライバーオプションを束ねて
//! スケジューラーの `Command` として実行できるようにします。

use crate::driver::BuildDriver;
use crate::options::BuildDriverOptions;
use async_trait::async_trait;
use dockwright_core::Image;
use dockwright_scheduler::Command;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub trait CommandFactory: Send + Sync {
    fn create(
        &self,
        driver: Arc<dyn BuildDriver>,
        image: Image,
        options: BuildDriverOptions,
    ) -> Box<dyn Command>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCommandFactory;

impl CommandFactory for DefaultCommandFactory {
    fn create(
        &self,
        driver: Arc<dyn BuildDriver>,
        image: Image,
        options: BuildDriverOptions,
    ) -> Box<dyn Command> {
        Box::new(BuildCommand::new(driver, image, options))
    }
}

pub struct BuildCommand {
    driver: Arc<dyn BuildDriver>,
    image: Image,
    options: BuildDriverOptions,
}

impl BuildCommand {
    pub fn new(driver: Arc<dyn BuildDriver>, image: Image, options: BuildDriverOptions) -> Self {
        Self {
            driver,
            image,
            options,
        }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn options(&self) -> &BuildDriverOptions {
        &self.options
    }
}

#[async_trait]
impl Command for BuildCommand {
    /// ドライバーのエラーは `BuildError` のまま anyhow に包まれ、
    /// サービス側で取り出せます。
    async fn execute(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.driver.build(cancel, &self.image, &self.options).await?;
        Ok(())
    }
}
