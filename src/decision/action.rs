//! Action recommendation from state, trend, and attributed drivers.

use serde::{Deserialize, Serialize};

use super::drivers::Driver;
use super::state::{StateAssessment, TeamState};
use super::trend::{TrendAssessment, TrendDirection};
use crate::params::Parameter;

/// The fixed intervention playbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionTemplate {
    MaintainCourse,
    Safety,
    Autonomy,
    Trust,
    Alignment,
    Load,
}

impl InterventionTemplate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaintainCourse => "maintain_course",
            Self::Safety => "safety",
            Self::Autonomy => "autonomy",
            Self::Trust => "trust",
            Self::Alignment => "alignment",
            Self::Load => "load",
        }
    }

    /// Keyword sets used to match a driver parameter to a template.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::MaintainCourse => &[],
            Self::Safety => &["safety"],
            Self::Autonomy => &["autonomy"],
            Self::Trust => &["trust"],
            Self::Alignment => &["alignment", "dissonance", "ambiguity"],
            Self::Load => &["load"],
        }
    }

    const MATCHABLE: [InterventionTemplate; 5] = [
        InterventionTemplate::Safety,
        InterventionTemplate::Autonomy,
        InterventionTemplate::Trust,
        InterventionTemplate::Alignment,
        InterventionTemplate::Load,
    ];

    /// Match a parameter to its intervention template by substring.
    pub fn for_parameter(parameter: Parameter) -> Option<InterventionTemplate> {
        let id = parameter.id();
        Self::MATCHABLE
            .iter()
            .copied()
            .find(|t| t.keywords().iter().any(|kw| id.contains(kw)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Normal,
    High,
    Immediate,
}

/// The recommended next action for one team/week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub template: InterventionTemplate,
    pub urgency: Urgency,
    /// The driver the intervention targets, when one was selected.
    pub target: Option<Parameter>,
    pub summary: String,
}

/// Select the recommended action.
///
/// Healthy and not deteriorating → maintain course. Otherwise the highest
/// impact *actionable* driver picks the template; when nothing actionable
/// exists but the top driver is a load problem, the load template applies
/// anyway (workload interventions work even when the lever sits elsewhere).
pub fn recommend(
    state: &StateAssessment,
    trend: &TrendAssessment,
    drivers: &[Driver],
) -> Recommendation {
    if state.state == TeamState::Healthy && trend.direction != TrendDirection::Deteriorating {
        return Recommendation {
            template: InterventionTemplate::MaintainCourse,
            urgency: Urgency::Normal,
            target: None,
            summary: "team is healthy and not deteriorating; keep current practices".into(),
        };
    }

    let urgency = if state.state == TeamState::Critical {
        Urgency::Immediate
    } else {
        Urgency::High
    };

    // Drivers arrive ranked by deviation descending.
    let actionable = drivers.iter().find(|d| d.is_actionable);

    if let Some(driver) = actionable {
        let template =
            InterventionTemplate::for_parameter(driver.parameter).unwrap_or(InterventionTemplate::Load);
        return Recommendation {
            template,
            urgency,
            target: Some(driver.parameter),
            summary: format!(
                "apply the {} intervention targeting {} (deviation {:.2})",
                template.as_str(),
                driver.parameter.id(),
                driver.deviation
            ),
        };
    }

    if let Some(top) = drivers.first() {
        if top.parameter.id().contains("load") {
            return Recommendation {
                template: InterventionTemplate::Load,
                urgency,
                target: Some(top.parameter),
                summary: format!(
                    "no actionable driver; top driver {} is load-family, apply the load intervention",
                    top.parameter.id()
                ),
            };
        }
    }

    Recommendation {
        template: InterventionTemplate::MaintainCourse,
        urgency,
        target: None,
        summary: "no actionable driver identified; monitor and re-survey".into(),
    }
}
