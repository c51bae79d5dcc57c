//! Dockwright core
//!
//! イメージ依存グラフのモデルと、ビルド処理が参照するストアの契約を定義します。

pub mod error;
pub mod model;
pub mod store;

pub use error::{CoreError, Result};
pub use model::*;
pub use store::{
    BuildersIndex, BuildersStore, CredentialsStore, ImageGraph, ImagesStore, StaticCredentials,
};
