// Display ordering for the live timing list

use std::collections::HashMap;

use itertools::Itertools;

use crate::api::DriverInfo;
use crate::telemetry::CarState;

/// Team order used by the timing list, matched as case-insensitive substrings of the team name.
pub const TEAM_PRIORITY_KEYWORDS: [&str; 10] = [
    "Red Bull",
    "Mercedes",
    "Ferrari",
    "McLaren",
    "Aston Martin",
    "Alpine",
    "Williams",
    "RB",
    "Sauber",
    "Haas",
];

/// Rank given to teams that match no keyword.
pub const UNRANKED: usize = 999;

pub fn team_rank(team: &str) -> usize {
    let team = team.to_lowercase();
    TEAM_PRIORITY_KEYWORDS
        .iter()
        .position(|keyword| team.contains(&keyword.to_lowercase()))
        .unwrap_or(UNRANKED)
}

/// Three-letter driver codes by car number.
const DRIVER_INITIALS: [(u32, &str); 27] = [
    (1, "VER"),
    (11, "PER"),
    (16, "LEC"),
    (55, "SAI"),
    (44, "HAM"),
    (12, "ANT"),
    (63, "RUS"),
    (4, "NOR"),
    (81, "PIA"),
    (14, "ALO"),
    (18, "STR"),
    (10, "GAS"),
    (31, "OCO"),
    (61, "DOO"),
    (23, "ALB"),
    (2, "SAR"),
    (43, "COL"),
    (22, "TSU"),
    (3, "RIC"),
    (30, "LAW"),
    (7, "HAD"),
    (77, "BOT"),
    (24, "ZHO"),
    (27, "HUL"),
    (87, "BEA"),
    (20, "MAG"),
    (5, "BOR"),
];

const ROSTER_2024: [(u32, &str); 23] = [
    (1, "Red Bull Racing"),
    (11, "Red Bull Racing"),
    (44, "Mercedes"),
    (63, "Mercedes"),
    (16, "Ferrari"),
    (55, "Ferrari"),
    (4, "McLaren"),
    (81, "McLaren"),
    (14, "Aston Martin"),
    (18, "Aston Martin"),
    (10, "Alpine"),
    (31, "Alpine"),
    (23, "Williams"),
    (2, "Williams"),
    (43, "Williams"),
    (22, "RB"),
    (3, "RB"),
    (30, "RB"),
    (77, "Kick Sauber"),
    (24, "Kick Sauber"),
    (27, "Haas"),
    (20, "Haas"),
    (87, "Haas"),
];

const ROSTER_2025: [(u32, &str); 20] = [
    (1, "Red Bull Racing"),
    (22, "Red Bull Racing"),
    (63, "Mercedes"),
    (12, "Mercedes"),
    (16, "Ferrari"),
    (44, "Ferrari"),
    (4, "McLaren"),
    (81, "McLaren"),
    (14, "Aston Martin"),
    (18, "Aston Martin"),
    (10, "Alpine"),
    (61, "Alpine"),
    (23, "Williams"),
    (55, "Williams"),
    (30, "RB"),
    (7, "RB"),
    (5, "Sauber"),
    (27, "Sauber"),
    (31, "Haas"),
    (87, "Haas"),
];

/// Built-in team assignments used when the backend's driver list is missing or incomplete.
/// 2025 has its own roster, every other year uses 2024's.
pub fn fallback_roster(year: i32) -> &'static [(u32, &'static str)] {
    match year {
        2025 => &ROSTER_2025,
        _ => &ROSTER_2024,
    }
}

pub fn driver_initials(car_id: u32) -> Option<&'static str> {
    DRIVER_INITIALS
        .iter()
        .find(|(number, _)| *number == car_id)
        .map(|(_, initials)| *initials)
}

/// Driver code when known, otherwise the car number.
pub fn driver_label(car_id: u32) -> String {
    driver_initials(car_id)
        .map(str::to_string)
        .unwrap_or_else(|| car_id.to_string())
}

/// Car number to team name.
#[derive(Clone, Debug, Default)]
pub struct TeamLookup {
    teams: HashMap<u32, String>,
}

impl TeamLookup {
    /// Only the built-in roster for `year`.
    pub fn fallback(year: i32) -> Self {
        let teams = fallback_roster(year)
            .iter()
            .map(|(number, team)| (*number, team.to_string()))
            .collect();
        Self { teams }
    }

    /// The backend's driver list layered over the built-in roster for `year`. Entries missing a
    /// number or a team are skipped.
    pub fn from_drivers(year: i32, drivers: &[DriverInfo]) -> Self {
        let mut lookup = Self::fallback(year);
        lookup.teams.extend(drivers.iter().filter_map(|driver| {
            match (driver.driver_number, driver.team.as_deref()) {
                (Some(number), Some(team)) if !team.is_empty() => Some((number, team.to_string())),
                _ => None,
            }
        }));
        lookup
    }

    pub fn team(&self, car_id: u32) -> Option<&str> {
        self.teams.get(&car_id).map(String::as_str)
    }

    pub fn rank(&self, car_id: u32) -> usize {
        self.team(car_id).map(team_rank).unwrap_or(UNRANKED)
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}

/// Cars grouped by team priority, then by car number.
pub fn ordered_cars<'a>(
    snapshot: &'a HashMap<u32, CarState>,
    lookup: &TeamLookup,
) -> Vec<&'a CarState> {
    snapshot
        .values()
        .sorted_by_key(|car| (lookup.rank(car.car_id), car.car_id))
        .collect()
}
