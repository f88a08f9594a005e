//! Capability manifest: the static knowledge the pipeline needs about the five
//! datasets. Dataset keys and column docs, the metric glossary, player/team
//! alias tables, the season phrase map and per-domain default seasons. The
//! manifest is assembled once at startup, either from compiled-in defaults or
//! from a JSON override file, and is treated as immutable thereafter. Column
//! docs here are documentation only; metric validation always goes through the
//! live schema cache.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

/// The five canonical tabular domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    PlayerStats,
    TeamStats,
    PlayerContracts,
    TeamCapsheets,
    TeamPicks,
}

impl Dataset {
    pub const ALL: [Dataset; 5] = [
        Dataset::PlayerStats,
        Dataset::TeamStats,
        Dataset::PlayerContracts,
        Dataset::TeamCapsheets,
        Dataset::TeamPicks,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Dataset::PlayerStats => "player_stats",
            Dataset::TeamStats => "team_stats",
            Dataset::PlayerContracts => "player_contracts",
            Dataset::TeamCapsheets => "team_capsheets",
            Dataset::TeamPicks => "team_picks",
        }
    }

    pub fn parse(s: &str) -> Option<Dataset> {
        match s {
            "player_stats" => Some(Dataset::PlayerStats),
            "team_stats" => Some(Dataset::TeamStats),
            "player_contracts" => Some(Dataset::PlayerContracts),
            "team_capsheets" => Some(Dataset::TeamCapsheets),
            "team_picks" => Some(Dataset::TeamPicks),
            _ => None,
        }
    }

    /// Snapshot file name under the data root.
    pub fn file_name(&self) -> String {
        format!("{}.parquet", self.key())
    }
}

impl Display for Dataset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// One ordered phrase → season-label mapping. Order matters: the resolver
/// takes the first phrase contained in the input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseMapping {
    pub phrase: String,
    pub season: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonBook {
    pub phrase_map: Vec<PhraseMapping>,
    /// Default season for the stats datasets when the caller supplies none.
    pub stats_default: String,
    /// Default season for the salary/cap datasets when the caller supplies none.
    pub salary_default: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDoc {
    pub description: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub docs: HashMap<Dataset, DatasetDoc>,
    /// Metric wording → canonical column name ("3pt%" → "three_pct").
    pub metric_glossary: HashMap<String, String>,
    /// Canonical player name (display case) → nicknames/short forms.
    pub player_aliases: HashMap<String, Vec<String>>,
    /// Canonical team name (display case) → nicknames/short forms.
    pub team_aliases: HashMap<String, Vec<String>>,
    /// Lowercased full team name → abbreviation used by the contracts rows.
    pub team_abbrev: HashMap<String, String>,
    pub seasons: SeasonBook,
}

impl Manifest {
    /// Load a manifest from a JSON file, or fall back to compiled-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Manifest> {
        match path {
            Some(p) => {
                let m = Manifest::load(p)?;
                info!(target: "courtside::manifest", "manifest loaded from '{}'", p.display());
                Ok(m)
            }
            None => {
                info!(target: "courtside::manifest", "using compiled-in manifest defaults");
                Ok(Manifest::default())
            }
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Manifest> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest file '{}'", path.display()))?;
        let m: Manifest = serde_json::from_str(&text)
            .with_context(|| format!("parsing manifest file '{}'", path.display()))?;
        Ok(m)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self).context("serializing manifest")?;
        std::fs::write(path, text)
            .with_context(|| format!("writing manifest file '{}'", path.display()))?;
        Ok(())
    }

    pub fn doc(&self, ds: Dataset) -> Option<&DatasetDoc> {
        self.docs.get(&ds)
    }

    /// Default season for a dataset when the caller supplies none. Contracts
    /// and cap sheets use the salary-domain default (it only ever selects a
    /// column, never filters rows); picks have no default year at all.
    pub fn default_season_for(&self, ds: Dataset) -> Option<&str> {
        match ds {
            Dataset::PlayerStats | Dataset::TeamStats => Some(self.seasons.stats_default.as_str()),
            Dataset::PlayerContracts | Dataset::TeamCapsheets => Some(self.seasons.salary_default.as_str()),
            Dataset::TeamPicks => None,
        }
    }

    /// Glossary lookup for a metric phrase ("points" → "pts"). Keys are stored
    /// lowercased; input is lowercased and trimmed before lookup.
    pub fn canonical_metric(&self, hint: &str) -> Option<&str> {
        self.metric_glossary.get(hint.trim().to_lowercase().as_str()).map(|s| s.as_str())
    }

    /// Lowercased full team name → roster abbreviation, pass-through otherwise.
    pub fn team_to_abbrev(&self, name: &str) -> String {
        self.team_abbrev
            .get(name.trim().to_lowercase().as_str())
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

impl Default for Manifest {
    fn default() -> Self {
        let mut docs = HashMap::new();
        docs.insert(
            Dataset::PlayerStats,
            DatasetDoc {
                description: "Per-player season totals and percentages. One row per player per season.".into(),
                columns: vec![
                    "player_id", "player", "team", "season", "age", "g", "gs", "mp", "fg", "fga",
                    "fg_pct", "three_p", "three_pa", "three_pct", "two_p", "two_pa", "two_pct",
                    "efg_pct", "ft", "fta", "ft_pct", "orb", "drb", "trb", "ast", "stl", "blk",
                    "tov", "pf", "pts", "trip_dbl", "awards",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
        );
        docs.insert(
            Dataset::PlayerContracts,
            DatasetDoc {
                description: "Per-player salary columns by season (salary_YYYY_YY). No season column.".into(),
                columns: vec![
                    "id", "name", "team", "salary_2025_26", "salary_2026_27", "salary_2027_28",
                    "salary_2028_29", "salary_2029_30", "salary_2030_31", "total_guaranteed",
                    "player_id", "note",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
        );
        docs.insert(
            Dataset::TeamStats,
            DatasetDoc {
                description: "Per-team season totals and percentages (league average = mean across teams).".into(),
                columns: vec![
                    "team", "season", "g", "mp", "fg", "fga", "fg_pct", "three_p", "three_pa",
                    "three_pct", "two_p", "two_pa", "two_pct", "ft", "fta", "ft_pct", "orb", "drb",
                    "trb", "ast", "stl", "blk", "tov", "pf", "pts",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
        );
        docs.insert(
            Dataset::TeamCapsheets,
            DatasetDoc {
                description: "Per-team cap totals by season (cap_YYYY_YY). No season column.".into(),
                columns: vec![
                    "team", "cap_2025_26", "cap_2026_27", "cap_2027_28", "cap_2028_29",
                    "cap_2029_30", "cap_2030_31",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
        );
        docs.insert(
            Dataset::TeamPicks,
            DatasetDoc {
                description: "Textual future pick obligations and swaps.".into(),
                columns: vec!["team", "pick_year", "pick_round", "details"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            },
        );

        let metric_glossary: HashMap<String, String> = [
            ("3pt%", "three_pct"),
            ("3p%", "three_pct"),
            ("three point %", "three_pct"),
            ("three point percentage", "three_pct"),
            ("three percentage", "three_pct"),
            ("threes made", "three_p"),
            ("3pm", "three_p"),
            ("threes attempted", "three_pa"),
            ("3pa", "three_pa"),
            ("ft%", "ft_pct"),
            ("free throw %", "ft_pct"),
            ("points", "pts"),
            ("pts", "pts"),
            ("assists", "ast"),
            ("rebounds", "trb"),
            ("blocks", "blk"),
            ("steals", "stl"),
            ("fg%", "fg_pct"),
            ("efg%", "efg_pct"),
            // season-specific column resolved later by the contracts builder
            ("salary", "salary"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let player_aliases: HashMap<String, Vec<String>> = [
            ("Stephen Curry", vec!["steph", "steph curry", "chef curry", "curry"]),
            ("Kevin Durant", vec!["kd", "durant", "easy money"]),
            ("Giannis Antetokounmpo", vec!["giannis"]),
            ("Luka Doncic", vec!["luka"]),
            ("Jimmy Butler", vec!["jimmy", "himmy"]),
            ("Anthony Davis", vec!["ad", "davis"]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into_iter().map(String::from).collect()))
        .collect();

        let team_aliases: HashMap<String, Vec<String>> = [
            ("Cleveland Cavaliers", vec!["cavs", "cleveland", "cle"]),
            ("Golden State Warriors", vec!["warriors", "gsw", "dubs"]),
            ("Phoenix Suns", vec!["suns", "phx"]),
            ("Boston Celtics", vec!["celtics", "bos"]),
            ("New York Knicks", vec!["knicks", "nyk"]),
            ("Oklahoma City Thunder", vec!["thunder", "okc"]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into_iter().map(String::from).collect()))
        .collect();

        let team_abbrev: HashMap<String, String> = [
            ("cleveland cavaliers", "CLE"),
            ("golden state warriors", "GSW"),
            ("phoenix suns", "PHX"),
            ("boston celtics", "BOS"),
            ("new york knicks", "NYK"),
            ("oklahoma city thunder", "OKC"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Manifest {
            docs,
            metric_glossary,
            player_aliases,
            team_aliases,
            team_abbrev,
            seasons: SeasonBook {
                phrase_map: vec![
                    PhraseMapping { phrase: "last year".into(), season: "2024-25".into() },
                    PhraseMapping { phrase: "this year".into(), season: "2025-26".into() },
                    PhraseMapping { phrase: "next year".into(), season: "2026-27".into() },
                ],
                stats_default: "2024-25".into(),
                salary_default: "2025-26".into(),
            },
        }
    }
}
