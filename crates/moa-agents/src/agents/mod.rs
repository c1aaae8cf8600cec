//! Agent roster for the mixture-of-agents service.
//!
//! Every [`AgentType`] gets one [`SpecialistAgent`]; the dispatcher picks
//! which of them answer a given request.

pub mod specialists;

use std::sync::Arc;

use coordination::ensemble::{Agent, AgentDispatcher, AgentType};

pub use specialists::SpecialistAgent;

/// One local specialist per agent role
pub fn default_roster() -> Vec<Arc<dyn Agent>> {
    AgentType::all()
        .iter()
        .map(|t| Arc::new(SpecialistAgent::new(*t)) as Arc<dyn Agent>)
        .collect()
}

/// Register `roster` with `dispatcher`, replacing agents of the same role
pub fn register_roster(dispatcher: &mut AgentDispatcher, roster: Vec<Arc<dyn Agent>>) {
    for agent in roster {
        dispatcher.register(agent);
    }
}
