use std::collections::BTreeMap;

use crate::types::{Race, RaceTier, RaceType};

/// Narrows the catalog before scraping results.
#[derive(Debug, Default)]
pub struct RaceFilter {
    pub race_types: Vec<RaceType>,
    pub limit: Option<usize>,
}

impl RaceFilter {
    pub fn apply(self, mut races: Vec<Race>) -> Vec<Race> {
        if !self.race_types.is_empty() {
            races.retain(|r| self.race_types.contains(&r.race_type));
        }
        if let Some(lim) = self.limit {
            races.truncate(lim);
        }
        races
    }

    pub fn validate(self) -> Result<Self, String> {
        if self.limit.is_some_and(|l| l == 0) {
            return Err("Limit must be greater than 0".to_string());
        }
        Ok(self)
    }
}

#[derive(Debug, Default)]
pub struct CatalogStats {
    pub by_type: BTreeMap<RaceType, usize>,
    pub world_championships: usize,
    pub total: usize,
}

impl CatalogStats {
    pub fn from_races(races: &[Race]) -> CatalogStats {
        let mut by_type = BTreeMap::new();
        for race in races {
            *by_type.entry(race.race_type).or_insert(0) += 1;
        }
        CatalogStats {
            by_type,
            world_championships: races
                .iter()
                .filter(|r| r.tier == RaceTier::WorldChampionship)
                .count(),
            total: races.len(),
        }
    }
}

impl std::fmt::Display for CatalogStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nStatistics:")?;
        for (race_type, count) in &self.by_type {
            writeln!(f, "  {:<28}{}", format!("{race_type}:"), count)?;
        }
        writeln!(f, "  {:<28}{}", "World Championships:", self.world_championships)?;
        writeln!(f, "  {:<28}{}", "Total:", self.total)
    }
}
