//! Per-field similarity between a statement line and a ledger movement

use bigdecimal::{BigDecimal, Signed, ToPrimitive, Zero};
use chrono::NaiveDate;

use crate::config::ConfiguracionMatching;
use crate::types::*;

/// Score one extracto record against one sistema record
pub fn score(
    extracto: &ExtractoRecord,
    sistema: &SistemaRecord,
    config: &ConfiguracionMatching,
) -> MatchCandidateScore {
    let score_fecha = score_fecha(extracto.fecha, sistema.fecha, config.ventana_fecha_dias);
    let score_valor = score_valor(&extracto.valor, &sistema.valor, &config.tolerancia_valor);
    let score_descripcion = score_descripcion(&extracto.descripcion, &sistema.descripcion);

    let score_total = (config.peso_fecha * score_fecha
        + config.peso_valor * score_valor
        + config.peso_descripcion * score_descripcion)
        .clamp(0.0, 1.0);

    MatchCandidateScore {
        score_fecha,
        score_valor,
        score_descripcion,
        score_total,
    }
}

/// Absolute distance between two dates in days
pub fn dias_diferencia(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days().abs()
}

/// Linear decay from 1.0 at the same day to 0.0 at `ventana_dias`
pub fn score_fecha(a: NaiveDate, b: NaiveDate, ventana_dias: u32) -> f64 {
    let ventana = ventana_dias.max(1) as f64;
    let dias = dias_diferencia(a, b) as f64;
    (1.0 - dias / ventana).max(0.0)
}

/// 1.0 within tolerance, decreasing with the relative difference otherwise
///
/// Opposite signs never match: an income line cannot pair with an expense.
pub fn score_valor(a: &BigDecimal, b: &BigDecimal, tolerancia: &BigDecimal) -> f64 {
    if (a.is_positive() && b.is_negative()) || (a.is_negative() && b.is_positive()) {
        return 0.0;
    }

    let diferencia = (a - b).abs();
    if diferencia <= *tolerancia {
        return 1.0;
    }

    let base = a.abs().max(b.abs());
    if base.is_zero() {
        return 0.0;
    }

    let relativa = (diferencia / base).to_f64().unwrap_or(1.0);
    (1.0 - relativa).clamp(0.0, 1.0)
}

/// Case-folded, whitespace-collapsed form of a description
pub fn normalizar_descripcion(texto: &str) -> String {
    texto
        .split_whitespace()
        .map(|palabra| palabra.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Edit-distance ratio between normalized descriptions
pub fn score_descripcion(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalizar_descripcion(a).chars().collect();
    let b: Vec<char> = normalizar_descripcion(b).chars().collect();

    let longitud = a.len().max(b.len());
    if longitud == 0 {
        return 1.0;
    }

    1.0 - levenshtein(&a, &b) as f64 / longitud as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previa: Vec<usize> = (0..=b.len()).collect();
    let mut actual = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        actual[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let sustitucion = previa[j] + usize::from(ca != cb);
            actual[j + 1] = sustitucion.min(previa[j + 1] + 1).min(actual[j] + 1);
        }
        std::mem::swap(&mut previa, &mut actual);
    }

    previa[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fecha(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_score_fecha_decay() {
        assert_eq!(score_fecha(fecha(5), fecha(5), 5), 1.0);
        assert!((score_fecha(fecha(5), fecha(6), 5) - 0.8).abs() < 1e-9);
        assert_eq!(score_fecha(fecha(5), fecha(10), 5), 0.0);
        assert_eq!(score_fecha(fecha(1), fecha(20), 5), 0.0);

        // symmetric
        assert_eq!(score_fecha(fecha(3), fecha(5), 5), score_fecha(fecha(5), fecha(3), 5));
        // monotonic
        assert!(score_fecha(fecha(5), fecha(6), 5) > score_fecha(fecha(5), fecha(7), 5));
    }

    #[test]
    fn test_score_valor_tolerance() {
        let tolerancia = BigDecimal::from(100);
        assert_eq!(
            score_valor(&BigDecimal::from(150000), &BigDecimal::from(150000), &tolerancia),
            1.0
        );
        assert_eq!(
            score_valor(&BigDecimal::from(150000), &BigDecimal::from(150100), &tolerancia),
            1.0
        );

        // exactly on the tolerance still counts as equal
        assert_eq!(
            score_valor(&BigDecimal::from(100), &BigDecimal::from(200), &tolerancia),
            1.0
        );

        let lejano = score_valor(&BigDecimal::from(100), &BigDecimal::from(300), &tolerancia);
        assert!((lejano - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_valor_relative_difference() {
        let tolerancia = BigDecimal::from(1);
        let score = score_valor(&BigDecimal::from(1000), &BigDecimal::from(900), &tolerancia);
        assert!((score - 0.9).abs() < 1e-9);

        let score = score_valor(&BigDecimal::from(-1000), &BigDecimal::from(-500), &tolerancia);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_score_valor_sign_mismatch() {
        let tolerancia = BigDecimal::from(1000);
        assert_eq!(
            score_valor(&BigDecimal::from(500), &BigDecimal::from(-500), &tolerancia),
            0.0
        );
        assert_eq!(
            score_valor(&BigDecimal::from(-1), &BigDecimal::from(1), &tolerancia),
            0.0
        );
    }

    #[test]
    fn test_score_descripcion_properties() {
        assert_eq!(score_descripcion("PAGO NOMINA", "PAGO NOMINA"), 1.0);
        assert_eq!(score_descripcion("  pago   Nomina ", "PAGO NOMINA"), 1.0);
        assert_eq!(score_descripcion("", ""), 1.0);
        assert_eq!(score_descripcion("abc", ""), 0.0);

        let ab = score_descripcion("PAGO PROVEEDOR X", "TRANSFERENCIA PROVEEDOR");
        let ba = score_descripcion("TRANSFERENCIA PROVEEDOR", "PAGO PROVEEDOR X");
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_statement_example_scores_ok() {
        let config = ConfiguracionMatching::default()
            .with_tolerancia(BigDecimal::from(100))
            .with_pesos(0.2, 0.5, 0.3)
            .with_umbrales(0.9, 0.6);

        let extracto =
            ExtractoRecord::new(1, fecha(5), "PAGO PROVEEDOR X", BigDecimal::from(150000));
        let sistema =
            SistemaRecord::new(2, fecha(5), "PAGO PROVEEDOR X SA", BigDecimal::from(150000));

        let result = score(&extracto, &sistema, &config);
        assert_eq!(result.score_fecha, 1.0);
        assert_eq!(result.score_valor, 1.0);
        assert!((result.score_descripcion - 0.85).abs() < 0.02);
        assert!((result.score_total - 0.955).abs() < 0.01);
        assert!(result.score_total >= config.score_minimo_exacto);
    }
}
