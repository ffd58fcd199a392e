use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{FetchObligation, SourceKind};
use crate::inventory::Inventory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObligationPlan {
    pub today: NaiveDate,
    pub latest_available: Option<NaiveDate>,
    pub obligations: Vec<FetchObligation>,
    pub permanent_gaps: Vec<NaiveDate>,
}

impl ObligationPlan {
    pub fn is_empty(&self) -> bool {
        self.obligations.is_empty()
    }

    pub fn of_kind(&self, source: SourceKind) -> impl Iterator<Item = &FetchObligation> {
        self.obligations
            .iter()
            .filter(move |obligation| obligation.source == source)
    }
}

pub fn resolve(
    inventory: &Inventory,
    latest_available: Option<NaiveDate>,
    today: NaiveDate,
    retention_days: u32,
) -> ObligationPlan {
    let mut obligations = Vec::new();
    let mut permanent_gaps = Vec::new();

    let complete_reanalysis = inventory.complete_days(SourceKind::Reanalysis);
    match latest_available {
        Some(latest) => match inventory.any_days(SourceKind::Reanalysis).first() {
            Some(&earliest) => {
                let mut day = earliest;
                while day <= latest {
                    if !complete_reanalysis.contains(&day) {
                        obligations.push(FetchObligation::reanalysis(day));
                    }
                    day += Duration::days(1);
                }
            }
            None => {
                debug!(%latest, "no local reanalysis, bootstrapping from the latest available day");
                obligations.push(FetchObligation::reanalysis(latest));
            }
        },
        None => warn!("latest available reanalysis day unknown; no reanalysis obligations"),
    }

    match complete_reanalysis.last() {
        Some(&last) => {
            let complete_gap_fill = inventory.complete_days(SourceKind::GapFillForecast);
            let mut day = last + Duration::days(1);
            while day < today {
                if !complete_gap_fill.contains(&day) {
                    if (today - day).num_days() > i64::from(retention_days) {
                        permanent_gaps.push(day);
                    } else {
                        obligations.push(FetchObligation::gap_fill(day));
                    }
                }
                day += Duration::days(1);
            }
        }
        None => debug!("no complete reanalysis day, gap-fill range is empty"),
    }

    if !inventory.continuous_cycle().is_some_and(|cycle| cycle >= today) {
        obligations.push(FetchObligation::continuous(today));
    }

    if !permanent_gaps.is_empty() {
        warn!(
            days = permanent_gaps.len(),
            first = %permanent_gaps[0],
            "forecast days beyond the provider retention window are permanent gaps"
        );
    }

    ObligationPlan {
        today,
        latest_available,
        obligations,
        permanent_gaps,
    }
}
