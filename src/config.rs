//! Matching configuration and its validation rules

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Allowed deviation of the weight sum from 1.00
pub const TOLERANCIA_PESOS: f64 = 0.01;

/// Parameters of a matching run
///
/// A run reads one snapshot of this value and never observes later edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfiguracionMatching {
    /// Absolute amount difference still considered an exact value match
    pub tolerancia_valor: BigDecimal,
    /// Minimum description similarity for a candidate without value affinity
    pub similitud_descripcion_minima: f64,
    pub peso_fecha: f64,
    pub peso_valor: f64,
    pub peso_descripcion: f64,
    /// Scores at or above this classify as OK
    pub score_minimo_exacto: f64,
    /// Scores at or above this classify as PROBABLE
    pub score_minimo_probable: f64,
    /// Days after which the date score reaches zero
    pub ventana_fecha_dias: u32,
}

impl Default for ConfiguracionMatching {
    fn default() -> Self {
        Self {
            tolerancia_valor: BigDecimal::from(1),
            similitud_descripcion_minima: 0.3,
            peso_fecha: 0.2,
            peso_valor: 0.5,
            peso_descripcion: 0.3,
            score_minimo_exacto: 0.9,
            score_minimo_probable: 0.6,
            ventana_fecha_dias: 5,
        }
    }
}

impl ConfiguracionMatching {
    /// Parse a TOML document; absent keys take their default value
    pub fn from_toml_str(input: &str) -> ConciliacionResult<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| ConciliacionError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML document
    pub fn to_toml_string(&self) -> ConciliacionResult<String> {
        toml::to_string(self).map_err(|e| ConciliacionError::InvalidConfiguration(e.to_string()))
    }

    /// Replace the three weights
    pub fn with_pesos(mut self, fecha: f64, valor: f64, descripcion: f64) -> Self {
        self.peso_fecha = fecha;
        self.peso_valor = valor;
        self.peso_descripcion = descripcion;
        self
    }

    /// Replace both classification thresholds
    pub fn with_umbrales(mut self, exacto: f64, probable: f64) -> Self {
        self.score_minimo_exacto = exacto;
        self.score_minimo_probable = probable;
        self
    }

    /// Replace the value tolerance
    pub fn with_tolerancia(mut self, tolerancia: BigDecimal) -> Self {
        self.tolerancia_valor = tolerancia;
        self
    }

    pub fn suma_pesos(&self) -> f64 {
        self.peso_fecha + self.peso_valor + self.peso_descripcion
    }

    /// Check every constraint a matching run relies on
    pub fn validate(&self) -> ConciliacionResult<()> {
        if self.tolerancia_valor <= BigDecimal::zero() {
            return Err(ConciliacionError::InvalidConfiguration(format!(
                "tolerancia_valor must be positive, got {}",
                self.tolerancia_valor
            )));
        }

        validate_fraccion("similitud_descripcion_minima", self.similitud_descripcion_minima)?;
        validate_fraccion("peso_fecha", self.peso_fecha)?;
        validate_fraccion("peso_valor", self.peso_valor)?;
        validate_fraccion("peso_descripcion", self.peso_descripcion)?;
        validate_fraccion("score_minimo_exacto", self.score_minimo_exacto)?;
        validate_fraccion("score_minimo_probable", self.score_minimo_probable)?;

        let suma = self.suma_pesos();
        if (suma - 1.0).abs() > TOLERANCIA_PESOS {
            return Err(ConciliacionError::InvalidConfiguration(format!(
                "weights must sum to 1.00, got {:.4}",
                suma
            )));
        }

        if self.score_minimo_exacto < self.score_minimo_probable {
            return Err(ConciliacionError::InvalidConfiguration(format!(
                "score_minimo_exacto ({}) cannot be lower than score_minimo_probable ({})",
                self.score_minimo_exacto, self.score_minimo_probable
            )));
        }

        if self.ventana_fecha_dias == 0 {
            return Err(ConciliacionError::InvalidConfiguration(
                "ventana_fecha_dias must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_fraccion(campo: &str, valor: f64) -> ConciliacionResult<()> {
    if !valor.is_finite() || !(0.0..=1.0).contains(&valor) {
        return Err(ConciliacionError::InvalidConfiguration(format!(
            "{} must be within [0, 1], got {}",
            campo, valor
        )));
    }
    Ok(())
}
