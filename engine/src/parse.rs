//! Game commands and the parsers for their responses.

use crate::TelemetryError;
use std::collections::BTreeMap;

pub const TICK_COMMAND: &str = "/silent-command rcon.print(game.tick)";

pub const EVOLUTION_COMMAND: &str = "/silent-command local parts = {} \
for _, surface in pairs(game.surfaces) do \
table.insert(parts, surface.name .. \"=\" .. game.forces[\"enemy\"].get_evolution_factor(surface)) \
end \
rcon.print(table.concat(parts, \";\"))";

pub const PLAYERS_COMMAND: &str = "/players online";

const PLAYERS_HEADER: &str = "Online players (";

pub fn parse_tick(response: &str) -> Result<u64, TelemetryError> {
    let response = response.trim();
    response
        .parse::<u64>()
        .map_err(|_| TelemetryError::parse("tick", format!("not a tick counter: {response:?}")))
}

/// `nauvis=0.4132;gleba=0.05` into a surface to factor map.
pub fn parse_evolution(response: &str) -> Result<BTreeMap<String, f64>, TelemetryError> {
    let response = response.trim();
    if response.is_empty() {
        return Err(TelemetryError::parse("evolution", "empty response"));
    }

    let mut surfaces = BTreeMap::new();
    for pair in response.split(';').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (name, factor) = pair
            .split_once('=')
            .ok_or_else(|| TelemetryError::parse("evolution", format!("expected name=factor, got {pair:?}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(TelemetryError::parse("evolution", format!("missing surface name in {pair:?}")));
        }
        let factor = factor
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|factor| (0.0..=1.0).contains(factor))
            .ok_or_else(|| TelemetryError::parse("evolution", format!("factor out of range in {pair:?}")))?;
        surfaces.insert(name.to_string(), factor);
    }

    if surfaces.is_empty() {
        return Err(TelemetryError::parse("evolution", "no surfaces"));
    }
    Ok(surfaces)
}

/// Parses the answer to `/players online`:
///
/// ```text
/// Online players (2):
///   alice (online)
///   bob (online)
/// ```
pub fn parse_players(response: &str) -> Result<Vec<String>, TelemetryError> {
    let mut lines = response.lines().map(str::trim).filter(|line| !line.is_empty());

    let header = lines
        .next()
        .ok_or_else(|| TelemetryError::parse("players", "empty response"))?;
    let count = header
        .strip_prefix(PLAYERS_HEADER)
        .and_then(|rest| rest.split_once(')'))
        .and_then(|(count, _)| count.trim().parse::<usize>().ok())
        .ok_or_else(|| TelemetryError::parse("players", format!("unexpected header {header:?}")))?;

    let players = lines
        .map(|line| line.strip_suffix("(online)").unwrap_or(line).trim().to_string())
        .collect::<Vec<_>>();

    if players.len() != count {
        return Err(TelemetryError::parse(
            "players",
            format!("header announced {count} players, listed {}", players.len()),
        ));
    }
    Ok(players)
}
