//! Feature flag data model and pure evaluation.
mod eval;
mod models;

pub use eval::LocalResolution;
pub use models::{
    ActivationCondition, ActivationDays, ActivationRule, DayOfWeek, Feature, FeaturePeriod,
    HourPeriod, Overload,
};
