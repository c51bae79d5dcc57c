//! モデル定義
//!
//! ビルド対象のイメージ、ビルダー、レジストリ認証情報を定義します。

mod builder;
mod credentials;
mod image;

// Re-exports
pub use builder::*;
pub use credentials::*;
pub use image::*;
