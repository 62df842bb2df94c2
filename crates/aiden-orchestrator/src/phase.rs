use std::collections::HashMap;

use serde::Serialize;

use aiden_core::config::AppConfig;
use aiden_core::error::Result;
use aiden_core::types::PhaseType;

/// One row of a project's phase plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhasePlan {
    pub phase_type: PhaseType,
    /// 1-based position in the pipeline.
    pub phase_order: u32,
    pub agent_name: Option<String>,
    pub ready: bool,
}

/// Phase ordering and phase → agent assignment.
///
/// Nothing else in the pipeline decides which phase comes next.
#[derive(Debug, Clone, Default)]
pub struct PhaseController {
    agents: HashMap<PhaseType, String>,
}

impl PhaseController {
    pub fn new(agents: HashMap<PhaseType, String>) -> Self {
        Self { agents }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(config.pipeline.phase_agents()?))
    }

    pub fn first_phase(&self) -> PhaseType {
        PhaseType::ORDER[0]
    }

    pub fn get_next_phase(&self, current: PhaseType) -> Option<PhaseType> {
        let idx = PhaseType::ORDER.iter().position(|p| *p == current)?;
        PhaseType::ORDER.get(idx + 1).copied()
    }

    pub fn is_final_phase(&self, phase_type: PhaseType) -> bool {
        self.get_next_phase(phase_type).is_none()
    }

    /// A phase can run once an agent is assigned to it.
    pub fn is_phase_ready(&self, phase_type: PhaseType) -> bool {
        self.agents.contains_key(&phase_type)
    }

    pub fn get_agent_for_phase(&self, phase_type: PhaseType) -> Option<&str> {
        self.agents.get(&phase_type).map(String::as_str)
    }

    pub fn all_phases(&self) -> Vec<PhasePlan> {
        PhaseType::ORDER
            .iter()
            .enumerate()
            .map(|(i, phase_type)| PhasePlan {
                phase_type: *phase_type,
                phase_order: i as u32 + 1,
                agent_name: self.get_agent_for_phase(*phase_type).map(str::to_string),
                ready: self.is_phase_ready(*phase_type),
            })
            .collect()
    }
}
