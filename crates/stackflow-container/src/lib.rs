//! コンテナエンジンとのやり取り
//!
//! - エンジン / compose ドライバの検出（フォールバックチェーン）
//! - 期限付きリトライ実行
//! - コンテナ状態の観測とヘルス監視
//! - compose による記述子の検証

pub mod command;
pub mod compose;
pub mod engine;
pub mod error;
pub mod executor;
pub mod inspector;
pub mod installer;
pub mod monitor;
pub mod resolver;
pub mod validator;

pub use command::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use compose::{ComposeDriverKind, ComposeProvider, InvocationTemplate};
pub use engine::{EngineId, default_engine_order, parse_engine_order};
pub use error::{ContainerError, Result};
pub use executor::run_with_deadline;
pub use inspector::{BollardInspector, ContainerInspector, ContainerObservation};
pub use installer::{ComposeInstaller, Installer};
pub use monitor::{ClusterHealthMonitor, MonitorTarget};
pub use resolver::{ProbeAttempt, RuntimeProfile, RuntimeResolver};
pub use validator::{ComposeConfigValidator, compose_file_args};
