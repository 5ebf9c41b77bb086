//! Linkage scenarios for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// DST-001: one moving cell, wind reports inside it
    SingleCell,
    
    /// DST-002: a cell splits; reports on the children reach the parent
    SplitLineage,
    
    /// DST-003: two cells merge; parents are flagged, not filled
    MergerLineage,
    
    /// DST-004: a full tornado track running across a split
    TornadoAcrossSplit,
    
    /// DST-005: reports beyond the link distance stay unlinked
    FarEvents,
    
    /// DST-006: a cell crossing two processing periods
    PeriodBoundary,
    
    /// DST-007: warning polygons over one cell of several
    WarningPolygons,
    
    /// DST-008: random outbreak with splits and mergers
    RandomOutbreak,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SingleCell,
            ScenarioId::SplitLineage,
            ScenarioId::MergerLineage,
            ScenarioId::TornadoAcrossSplit,
            ScenarioId::FarEvents,
            ScenarioId::PeriodBoundary,
            ScenarioId::WarningPolygons,
            ScenarioId::RandomOutbreak,
        ]
    }
    
    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SingleCell => "single_cell",
            ScenarioId::SplitLineage => "split_lineage",
            ScenarioId::MergerLineage => "merger_lineage",
            ScenarioId::TornadoAcrossSplit => "tornado_across_split",
            ScenarioId::FarEvents => "far_events",
            ScenarioId::PeriodBoundary => "period_boundary",
            ScenarioId::WarningPolygons => "warning_polygons",
            ScenarioId::RandomOutbreak => "random_outbreak",
        }
    }
    
    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SingleCell => "One cell for an hour, noisy wind reports inside it",
            ScenarioId::SplitLineage => "Cell splits in two, child reports copied onto the parent",
            ScenarioId::MergerLineage => "Two cells merge, parents flagged as merging predecessors",
            ScenarioId::TornadoAcrossSplit => "Tornado track starting before a split and ending after it",
            ScenarioId::FarEvents => "Reports 60 km from every cell, all must stay unlinked",
            ScenarioId::PeriodBoundary => "Cell spans two SPC dates, late reports shared with early objects",
            ScenarioId::WarningPolygons => "Warnings over one of two cells, and one over empty ground",
            ScenarioId::RandomOutbreak => "Seeded random lineage, invariants checked on every linkage",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;
    
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_cell" | "singlecell" | "dst-001" => Ok(ScenarioId::SingleCell),
            "split_lineage" | "splitlineage" | "dst-002" => Ok(ScenarioId::SplitLineage),
            "merger_lineage" | "mergerlineage" | "dst-003" => Ok(ScenarioId::MergerLineage),
            "tornado_across_split" | "tornadoacrosssplit" | "dst-004" => Ok(ScenarioId::TornadoAcrossSplit),
            "far_events" | "farevents" | "dst-005" => Ok(ScenarioId::FarEvents),
            "period_boundary" | "periodboundary" | "dst-006" => Ok(ScenarioId::PeriodBoundary),
            "warning_polygons" | "warningpolygons" | "dst-007" => Ok(ScenarioId::WarningPolygons),
            "random_outbreak" | "randomoutbreak" | "dst-008" => Ok(ScenarioId::RandomOutbreak),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
