//! JSON export of scenario runs.
//!
//! Writes the scenario outcome together with the linkage tables of its last
//! run, in the same layout the linkage files use.

use crate::runner::{ScenarioMetrics, ScenarioResult};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use stormlink_core::LinkageBundle;

/// Complete scenario export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,
    
    /// Seed used
    pub seed: u64,
    
    /// Final results
    pub passed: bool,
    
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    
    pub num_storm_objects: usize,
    
    pub num_events: usize,
    
    pub metrics: ScenarioMetrics,
    
    /// Linkage tables, absent for scenarios without an event linkage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkage: Option<LinkageBundle>,
}

impl SimExport {
    /// Creates an export from a finished run.
    pub fn from_result(result: &ScenarioResult) -> Self {
        Self {
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            num_storm_objects: result.num_storm_objects,
            num_events: result.num_events,
            metrics: result.metrics.clone(),
            linkage: result
                .linkage
                .clone()
                .map(|linkage| LinkageBundle::from_result(linkage, true)),
        }
    }
    
    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
