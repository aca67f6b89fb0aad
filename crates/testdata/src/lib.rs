//! Inline topology/calibration fixtures for the S1-S6 scenarios, used by
//! `gsl-mock-spf` and the integration tests in `gsl-scenario-tests`.

mod scenarios;

pub use scenarios::{
    scenario_s1, scenario_s2, scenario_s2_other, scenario_s4, scenario_s5, scenario_s6, Scenario,
};
