use crate::error::PmiError;
use figment::providers::{Env, Serialized};
use figment::{Figment, Provider};
use serde::{Deserialize, Serialize};

/// Runtime settings of a [`crate::Pmi`] context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmiConfig {
    /// The rank that originates all commands. Every other rank is a worker.
    pub controller_rank: usize,

    /// Gather a status from every rank after each command. Turning this off
    /// is the fast path: worker failures are only logged.
    pub check_status: bool,

    /// On invoke, also check that the object was created as the class named
    /// in the command.
    pub strict_class_check: bool,

    /// Broadcast `End` when a controller context is dropped while its
    /// workers are still active.
    pub end_workers_on_drop: bool,
}

impl Default for PmiConfig {
    fn default() -> Self {
        Self {
            controller_rank: 0,
            check_status: !cfg!(feature = "fast-path"),
            strict_class_check: false,
            end_workers_on_drop: true,
        }
    }
}

const ENV_KEYS: [&str; 4] = [
    "controller_rank",
    "check_status",
    "strict_class_check",
    "end_workers_on_drop",
];

impl PmiConfig {
    /// The configuration sources, lowest priority first:
    ///
    /// 1. Code defaults
    /// 2. `PMI_CONTROLLER_RANK`, `PMI_CHECK_STATUS`, `PMI_STRICT_CLASS_CHECK`
    ///    and `PMI_END_WORKERS_ON_DROP`
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(PmiConfig::default()))
            .merge(Env::prefixed("PMI_").only(&ENV_KEYS))
    }

    /// Extracts a configuration from any provider, e.g. the result of
    /// [`PmiConfig::figment`] with programmatic overrides merged on top.
    pub fn extract_from<T: Provider>(provider: T) -> Result<Self, PmiError> {
        Figment::from(provider)
            .extract()
            .map_err(|e| PmiError::Config(e.to_string()))
    }

    /// The defaults, overridden from the environment.
    pub fn from_env() -> Result<Self, PmiError> {
        Self::extract_from(Self::figment())
    }

    pub fn with_controller_rank(mut self, rank: usize) -> Self {
        self.controller_rank = rank;
        self
    }

    pub fn with_check_status(mut self, check_status: bool) -> Self {
        self.check_status = check_status;
        self
    }

    pub fn with_strict_class_check(mut self, strict: bool) -> Self {
        self.strict_class_check = strict;
        self
    }

    pub fn with_end_workers_on_drop(mut self, end: bool) -> Self {
        self.end_workers_on_drop = end;
        self
    }
}
