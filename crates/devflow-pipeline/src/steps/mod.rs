//! パイプラインの各ステップ

mod artifacts;
mod configuration;
mod dependencies;
mod host;
mod preconditions;
mod services;

pub use artifacts::WriteArtifactsStep;
pub use configuration::{ApplyPreferencesStep, LoadConfigurationStep};
pub use dependencies::{AfterStartDependenciesStep, BeforeStartDependenciesStep, ReservePortsStep};
pub use host::{StartHostStep, WaitForShutdownStep};
pub use preconditions::{EnsureCertificateStep, EnsureDockerStep, PrepareGeneratedDirectoryStep};
pub use services::{ConfigureReverseProxyStep, ResolveServicesStep};
