//! Alias & season resolver.
//! Pure functions over immutable lookup tables built once from the manifest:
//! player/team nickname canonicalization, decorated team-label expansion,
//! season-phrase and bare-year season resolution, and plan normalization.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::manifest::{Manifest, SeasonBook};
use crate::ops::Plan;

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(20\d{2})\b").unwrap());

/// Normalize a mention for lookup: trim, lowercase, collapse inner whitespace.
pub fn canon(s: &str) -> String {
    s.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reverse alias index: normalized mention → canonical display name.
/// Built once at startup from the manifest alias tables.
#[derive(Debug, Clone)]
pub struct AliasIndex {
    players: HashMap<String, String>,
    teams: HashMap<String, String>,
}

impl AliasIndex {
    pub fn from_manifest(m: &Manifest) -> AliasIndex {
        AliasIndex {
            players: build_reverse_index(&m.player_aliases),
            teams: build_reverse_index(&m.team_aliases),
        }
    }

    /// Canonicalize player mentions. Unmatched names pass through unchanged;
    /// order is preserved and duplicates collapse onto the first occurrence.
    pub fn resolve_players(&self, names: &[String]) -> Vec<String> {
        resolve_through(&self.players, names)
    }

    pub fn resolve_team(&self, name: &str) -> String {
        self.teams.get(canon(name).as_str()).cloned().unwrap_or_else(|| name.trim().to_string())
    }

    pub fn resolve_teams(&self, names: &[String]) -> Vec<String> {
        resolve_through(&self.teams, names)
    }
}

fn build_reverse_index(table: &HashMap<String, Vec<String>>) -> HashMap<String, String> {
    let mut idx = HashMap::new();
    for (canonical, alts) in table {
        idx.insert(canon(canonical), canonical.clone());
        for a in alts {
            idx.insert(canon(a), canonical.clone());
        }
    }
    idx
}

fn resolve_through(idx: &HashMap<String, String>, names: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for raw in names {
        let key = canon(raw);
        let resolved = idx.get(key.as_str()).cloned().unwrap_or_else(|| raw.trim().to_string());
        if seen.insert(canon(&resolved)) {
            out.push(resolved);
        }
    }
    out
}

/// How a dataset decorates its team row labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamDecoration {
    /// Team-stats rows mark playoff teams with a trailing `*`.
    PlayoffStar,
    /// Draft-pick rows store teams as "<Team> Future NBA Draft Picks".
    FuturePicks,
}

pub const FUTURE_PICKS_SUFFIX: &str = " Future NBA Draft Picks";

/// Expand each team name to both its bare and decorated row label, preserving
/// order. Names already carrying the decoration are kept as-is.
pub fn expand_team_labels(teams: &[String], deco: TeamDecoration) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(teams.len() * 2);
    let mut seen: HashSet<String> = HashSet::new();
    for t in teams {
        let t = t.trim();
        let decorated = match deco {
            TeamDecoration::PlayoffStar => {
                if t.ends_with('*') {
                    None
                } else {
                    Some(format!("{t}*"))
                }
            }
            TeamDecoration::FuturePicks => {
                if t.to_lowercase().ends_with(&FUTURE_PICKS_SUFFIX.to_lowercase()) {
                    None
                } else {
                    Some(format!("{t}{FUTURE_PICKS_SUFFIX}"))
                }
            }
        };
        if seen.insert(t.to_string()) {
            out.push(t.to_string());
        }
        if let Some(d) = decorated {
            if seen.insert(d.clone()) {
                out.push(d);
            }
        }
    }
    out
}

/// Map free text to a season label. Known phrases win first, in phrase-map
/// order; otherwise a bare four-digit year token Y yields "Y-(Y+1 mod 100)".
pub fn resolve_season_from_text(text: &str, book: &SeasonBook) -> Option<String> {
    let lowered = text.to_lowercase();
    for m in &book.phrase_map {
        if lowered.contains(m.phrase.to_lowercase().as_str()) {
            return Some(m.season.clone());
        }
    }
    if let Some(caps) = YEAR_RE.captures(&lowered) {
        if let Ok(y) = caps[1].parse::<i32>() {
            return Some(season_label_from_year(y));
        }
    }
    None
}

/// "2026" → "2026-27"; handles the century wrap ("2099" → "2099-00").
pub fn season_label_from_year(y: i32) -> String {
    format!("{}-{:02}", y, (y + 1).rem_euclid(100))
}

/// Starting year of a season label: "2026-27" → 2026. Also accepts a bare
/// year string. Returns None for anything else.
pub fn season_start_year(label: &str) -> Option<i32> {
    let head = label.trim().split('-').next()?.trim();
    head.parse::<i32>().ok().filter(|y| (1946..=2100).contains(y))
}

/// Season label containing a calendar date. The season rolls over in July:
/// July through December dates belong to the season starting that year,
/// January through June to the season that started the year before.
pub fn season_label_for_date(d: NaiveDate) -> String {
    let start = if d.month() >= 7 { d.year() } else { d.year() - 1 };
    season_label_from_year(start)
}

/// Normalize an intent in place of the upstream planner's loose output:
/// canonicalize entity names, fill a missing season from the question text or
/// the dataset's default, and push the metric hint through the glossary.
pub fn normalize_plan(plan: &Plan, idx: &AliasIndex, manifest: &Manifest, question: &str) -> Plan {
    let mut out = plan.clone();
    out.entities.players = idx.resolve_players(&out.entities.players);
    out.entities.teams = idx.resolve_teams(&out.entities.teams);
    if out.timeframe.season.is_none() {
        out.timeframe.season = resolve_season_from_text(question, &manifest.seasons).or_else(|| {
            out.dataset.and_then(|ds| manifest.default_season_for(ds).map(String::from))
        });
    }
    if let Some(hint) = &out.metric_hint {
        if let Some(canonical) = manifest.canonical_metric(hint) {
            out.metric_hint = Some(canonical.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Dataset;
    use crate::ops::{Entities, Timeframe};

    fn index() -> (Manifest, AliasIndex) {
        let m = Manifest::default();
        let idx = AliasIndex::from_manifest(&m);
        (m, idx)
    }

    #[test]
    fn players_resolve_via_nicknames_and_pass_through() {
        let (_, idx) = index();
        let got = idx.resolve_players(&[
            "steph".to_string(),
            "KD".to_string(),
            "Jrue Holiday".to_string(),
        ]);
        assert_eq!(got, vec!["Stephen Curry", "Kevin Durant", "Jrue Holiday"]);
    }

    #[test]
    fn resolve_players_is_idempotent_and_dedupes() {
        let (_, idx) = index();
        let canonical = vec!["Stephen Curry".to_string(), "Kevin Durant".to_string()];
        assert_eq!(idx.resolve_players(&canonical), canonical);

        let got = idx.resolve_players(&[
            "curry".to_string(),
            "Stephen Curry".to_string(),
            "chef curry".to_string(),
        ]);
        assert_eq!(got, vec!["Stephen Curry"]);
    }

    #[test]
    fn canon_collapses_case_and_whitespace() {
        assert_eq!(canon("  Chef   CURRY "), "chef curry");
    }

    #[test]
    fn teams_resolve_and_expand_with_playoff_star() {
        let (_, idx) = index();
        assert_eq!(idx.resolve_team("gsw"), "Golden State Warriors");
        let teams = vec!["Golden State Warriors".to_string()];
        let expanded = expand_team_labels(&teams, TeamDecoration::PlayoffStar);
        assert_eq!(expanded, vec!["Golden State Warriors", "Golden State Warriors*"]);
        let already = vec!["Boston Celtics*".to_string()];
        assert_eq!(expand_team_labels(&already, TeamDecoration::PlayoffStar), vec!["Boston Celtics*"]);
    }

    #[test]
    fn teams_expand_with_future_picks_label() {
        let teams = vec!["OKC".to_string()];
        let expanded = expand_team_labels(&teams, TeamDecoration::FuturePicks);
        assert_eq!(expanded, vec!["OKC", "OKC Future NBA Draft Picks"]);
        let already = vec!["OKC future nba draft picks".to_string()];
        assert_eq!(expand_team_labels(&already, TeamDecoration::FuturePicks), vec!["OKC future nba draft picks"]);
    }

    #[test]
    fn season_phrases_win_in_map_order() {
        let (m, _) = index();
        assert_eq!(resolve_season_from_text("how did he do LAST YEAR?", &m.seasons), Some("2024-25".to_string()));
        assert_eq!(resolve_season_from_text("cap space this year", &m.seasons), Some("2025-26".to_string()));
    }

    #[test]
    fn bare_year_synthesizes_label() {
        let (m, _) = index();
        assert_eq!(resolve_season_from_text("picks in 2027 please", &m.seasons), Some("2027-28".to_string()));
        assert_eq!(resolve_season_from_text("no year here", &m.seasons), None);
        assert_eq!(season_label_from_year(2099), "2099-00");
    }

    #[test]
    fn season_start_year_parses_labels_and_bare_years() {
        assert_eq!(season_start_year("2026-27"), Some(2026));
        assert_eq!(season_start_year("2026"), Some(2026));
        assert_eq!(season_start_year("next season"), None);
    }

    #[test]
    fn season_for_date_rolls_over_in_july() {
        let spring = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let fall = NaiveDate::from_ymd_opt(2025, 11, 2).unwrap();
        assert_eq!(season_label_for_date(spring), "2024-25");
        assert_eq!(season_label_for_date(fall), "2025-26");
    }

    #[test]
    fn normalize_plan_fills_season_and_metric() {
        let (m, idx) = index();
        let plan = Plan {
            goal: "highest scorer".into(),
            dataset: Some(Dataset::PlayerStats),
            timeframe: Timeframe { season: None },
            entities: Entities {
                players: vec!["giannis".to_string()],
                teams: vec![],
            },
            metric_hint: Some("points".to_string()),
            notes: vec![],
        };
        let norm = normalize_plan(&plan, &idx, &m, "who scored the most points?");
        assert_eq!(norm.entities.players, vec!["Giannis Antetokounmpo"]);
        assert_eq!(norm.timeframe.season.as_deref(), Some("2024-25"));
        assert_eq!(norm.metric_hint.as_deref(), Some("pts"));

        let norm2 = normalize_plan(&plan, &idx, &m, "who scored the most in 2022?");
        assert_eq!(norm2.timeframe.season.as_deref(), Some("2022-23"));
    }
}
