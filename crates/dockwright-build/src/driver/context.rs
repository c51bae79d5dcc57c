use crate::error::{BuildError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::Path;
use tar::Builder;

/// アーカイブ内で Dockerfile を置くパス
///
/// コンテキスト内の同名ファイルを上書きしないよう専用の名前を使います。
pub const DOCKERFILE_ENTRY: &str = ".dockwright.Dockerfile";

const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストを tar.gz アーカイブとして作成
    ///
    /// `dockerfile` はコンテキスト外にあっても構いません。
    pub fn create_context(context_path: &Path, dockerfile: &Path) -> Result<Vec<u8>> {
        if !context_path.is_dir() {
            return Err(BuildError::ContextNotFound(context_path.to_path_buf()));
        }
        if !dockerfile.is_file() {
            return Err(BuildError::DockerfileNotFound(dockerfile.to_path_buf()));
        }

        tracing::debug!(context = %context_path.display(), "Creating build context");

        let dockerfile_content = std::fs::read(dockerfile)?;

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            tar.append_dir_all(".", context_path)?;

            let mut header = tar::Header::new_gnu();
            header.set_path(DOCKERFILE_ENTRY).map_err(|e| {
                BuildError::InvalidConfig(format!("Failed to set Dockerfile path: {}", e))
            })?;
            header.set_size(dockerfile_content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, &dockerfile_content[..])?;

            tar.into_inner()?.finish()?;
        }

        tracing::debug!(bytes = archive_data.len(), "Build context created");

        if archive_data.len() > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 .dockerignoreファイルで不要なファイルを除外することを推奨します。",
                archive_data.len() / 1024 / 1024
            );
        }

        Ok(archive_data)
    }
}
