use std::collections::HashMap;
use std::sync::LazyLock;

use tabula_error::{DbError, Result};

use crate::arrays::scalar::ScalarValue;

pub const DEFAULT_BATCH_SIZE: usize = 2048;

const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 1_048_576;

/// Configuration for planning and executing queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Master switch for all optional plan rewrites.
    pub enable_optimizer: bool,
    pub predicate_pushdown: bool,
    pub projection_pushdown: bool,
    /// Rows per batch when streaming.
    pub batch_size: usize,
    /// Evaluate sibling expressions and groups on the rayon pool.
    pub parallel: bool,
    /// Run the unoptimized plan alongside the optimized one and fail if the
    /// results differ.
    pub verify_optimized_plan: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            enable_optimizer: true,
            predicate_pushdown: true,
            projection_pushdown: true,
            batch_size: DEFAULT_BATCH_SIZE,
            parallel: true,
            verify_optimized_plan: false,
        }
    }
}

impl ExecutionConfig {
    pub fn set_from_scalar(&mut self, name: &str, value: ScalarValue) -> Result<()> {
        let func = lookup(name)?;
        (func.set)(value, self)
    }

    pub fn get_as_scalar(&self, name: &str) -> Result<ScalarValue> {
        let func = lookup(name)?;
        Ok((func.get)(self))
    }

    /// Reset a single setting to its default.
    pub fn reset(&mut self, name: &str) -> Result<()> {
        let func = lookup(name)?;
        let default = (func.get)(&Self::default());
        (func.set)(default, self)
    }

    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// Whether predicate pushdown runs with this config.
    pub fn run_predicate_pushdown(&self) -> bool {
        self.enable_optimizer && self.predicate_pushdown
    }

    pub fn run_projection_pushdown(&self) -> bool {
        self.enable_optimizer && self.projection_pushdown
    }

    /// Names of all settings with their descriptions.
    pub fn settings() -> Vec<(&'static str, &'static str)> {
        let mut settings: Vec<_> = GET_SET_FUNCTIONS
            .iter()
            .map(|(name, funcs)| (*name, funcs.description))
            .collect();
        settings.sort_unstable();
        settings
    }
}

fn lookup(name: &str) -> Result<&'static SettingFunctions> {
    GET_SET_FUNCTIONS
        .get(name)
        .ok_or_else(|| DbError::Config(format!("Missing setting for '{name}'")))
}

fn config_err(name: &str, err: DbError) -> DbError {
    DbError::Config(format!("Invalid value for '{name}': {err}"))
}

struct SettingFunctions {
    description: &'static str,
    set: fn(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()>,
    get: fn(conf: &ExecutionConfig) -> ScalarValue,
}

impl SettingFunctions {
    const fn new<S: ExecutionSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_scalar as _,
            get: S::get_as_scalar as _,
        }
    }
}

fn insert_setting<S: ExecutionSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<EnableOptimizer>(&mut map);
    insert_setting::<PredicatePushdown>(&mut map);
    insert_setting::<ProjectionPushdown>(&mut map);
    insert_setting::<BatchSize>(&mut map);
    insert_setting::<Parallel>(&mut map);
    insert_setting::<VerifyOptimizedPlan>(&mut map);

    map
});

pub trait ExecutionSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()>;
    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue;
}

macro_rules! bool_setting {
    ($ty:ident, $field:ident, $name:literal, $desc:literal) => {
        pub struct $ty;

        impl ExecutionSetting for $ty {
            const NAME: &'static str = $name;
            const DESCRIPTION: &'static str = $desc;

            fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
                conf.$field = scalar.try_as_bool().map_err(|e| config_err(Self::NAME, e))?;
                Ok(())
            }

            fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
                conf.$field.into()
            }
        }
    };
}

bool_setting!(
    EnableOptimizer,
    enable_optimizer,
    "enable_optimizer",
    "Controls if the optimizer is enabled"
);
bool_setting!(
    PredicatePushdown,
    predicate_pushdown,
    "predicate_pushdown",
    "Push filters towards the scan"
);
bool_setting!(
    ProjectionPushdown,
    projection_pushdown,
    "projection_pushdown",
    "Only read the columns a query needs"
);
bool_setting!(
    Parallel,
    parallel,
    "parallel",
    "Evaluate independent expressions and groups in parallel"
);
bool_setting!(
    VerifyOptimizedPlan,
    verify_optimized_plan,
    "verify_optimized_plan",
    "Compare results of the optimized plan with the results from the unoptimized plan"
);

pub struct BatchSize;

impl ExecutionSetting for BatchSize {
    const NAME: &'static str = "batch_size";
    const DESCRIPTION: &'static str = "Desired number of rows in a batch";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut ExecutionConfig) -> Result<()> {
        let val = scalar
            .try_as_usize()
            .map_err(|e| config_err(Self::NAME, e))?;

        if val < MIN_BATCH_SIZE {
            return Err(DbError::Config(format!(
                "Batch size cannot be less than {MIN_BATCH_SIZE}"
            )));
        }

        if val > MAX_BATCH_SIZE {
            return Err(DbError::Config(format!(
                "Batch size cannot be greater than {MAX_BATCH_SIZE}"
            )));
        }

        conf.batch_size = val;
        Ok(())
    }

    fn get_as_scalar(conf: &ExecutionConfig) -> ScalarValue {
        (conf.batch_size as u64).into()
    }
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;

    #[test]
    fn set_and_reset() {
        let mut conf = ExecutionConfig::default();
        conf.set_from_scalar("batch_size", ScalarValue::Int64(16)).unwrap();
        assert_eq!(16, conf.batch_size);
        assert_eq!(ScalarValue::UInt64(16), conf.get_as_scalar("batch_size").unwrap());

        conf.set_from_scalar("predicate_pushdown", false.into()).unwrap();
        assert!(!conf.run_predicate_pushdown());

        conf.reset("batch_size").unwrap();
        assert_eq!(DEFAULT_BATCH_SIZE, conf.batch_size);
        conf.reset_all();
        assert_eq!(ExecutionConfig::default(), conf);
    }

    #[test]
    fn invalid_settings() {
        let mut conf = ExecutionConfig::default();
        let err = conf.set_from_scalar("batch_size", ScalarValue::Int64(0)).unwrap_err();
        assert_eq!(ErrorKind::Config, err.kind());

        let err = conf
            .set_from_scalar("batch_size", ScalarValue::Int64(2_000_000))
            .unwrap_err();
        assert_eq!(ErrorKind::Config, err.kind());

        let err = conf.set_from_scalar("parallel", ScalarValue::Int64(1)).unwrap_err();
        assert_eq!(ErrorKind::Config, err.kind());

        let err = conf.get_as_scalar("unknown").unwrap_err();
        assert_eq!(ErrorKind::Config, err.kind());
    }

    #[test]
    fn optimizer_switch_disables_rules() {
        let conf = ExecutionConfig {
            enable_optimizer: false,
            ..Default::default()
        };
        assert!(!conf.run_predicate_pushdown());
        assert!(!conf.run_projection_pushdown());
        assert_eq!(6, ExecutionConfig::settings().len());
    }
}
