//! モデル定義
//!
//! devflowで使用されるデータモデルを定義します。
//! 設定ファイルの生の表現（document）と、検証済みのモデル（Service, Dependency）を分離しています。

mod dependency;
mod document;
mod ingress;
mod runner;
mod service;

// Re-exports
pub use dependency::*;
pub use document::*;
pub use ingress::*;
pub use runner::*;
pub use service::*;
