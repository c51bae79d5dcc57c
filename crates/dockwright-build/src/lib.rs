//! Dockwright image build
//!
//! イメージの依存グラフからビルドプランを作り、親から子の順に
//! ワーカープール上でビルドします。
//!
//! ```text
//! BuildEntrypoint ─▶ PlanFactory ─▶ Planner::plan ─▶ [Step, Step, ...]
//!        │                                              │ gate wait
//!        ▼                                              ▼
//!    Dispatch ◀──── enqueue ──── BuildService ── BuildCommand ─▶ BuildDriver
//!                                                  (docker / ansible-playbook / dry-run)
//! ```

pub mod auth;
pub mod command;
pub mod driver;
pub mod entrypoint;
pub mod error;
pub mod options;
pub mod plan;
pub mod progress;
pub mod semver;
pub mod service;

pub use auth::DockerConfigCredentials;
pub use command::{BuildCommand, CommandFactory, DefaultCommandFactory};
pub use driver::{
    AnsiblePlaybookDriver, BuildDriver, ContextBuilder, DockerDriver, DriverFactory,
    DriverRegistry, DryRunDriver,
};
pub use entrypoint::{BuildEntrypoint, BuildRequest};
pub use error::{BuildError, Result};
pub use options::{BuildDriverOptions, ServiceOptions, parse_assignment};
pub use plan::{CascadePlan, Depth, PlanFactory, PlanKind, Planner, SinglePlan, Step, StepState};
pub use progress::BuildProgress;
pub use crate::semver::{DefaultSemverGenerator, SemVer, SemverGenerator};
pub use service::BuildService;
