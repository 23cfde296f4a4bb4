//! Threshold classification of automatic candidates

use crate::config::ConfiguracionMatching;
use crate::types::*;

/// Map an automatic score onto SIN_MATCH, PROBABLE or OK
///
/// Both thresholds are inclusive lower bounds. MANUAL and IGNORADO are
/// never produced here; they come only from explicit user actions.
pub fn clasificar(score_total: f64, config: &ConfiguracionMatching) -> MatchEstado {
    if score_total >= config.score_minimo_exacto {
        MatchEstado::Ok
    } else if score_total >= config.score_minimo_probable {
        MatchEstado::Probable
    } else {
        MatchEstado::SinMatch
    }
}

/// Build the link for an automatic candidate, or an unmatched link when the
/// score does not reach the probable threshold
pub fn vinculacion_automatica(
    extracto_id: RecordId,
    sistema_id: RecordId,
    score: MatchCandidateScore,
    config: &ConfiguracionMatching,
) -> Vinculacion {
    match clasificar(score.score_total, config) {
        MatchEstado::SinMatch => Vinculacion::sin_match(extracto_id),
        estado => Vinculacion::con_candidato(extracto_id, sistema_id, estado, score),
    }
}
