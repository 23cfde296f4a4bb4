//! Validation utilities

use crate::config::ConfiguracionMatching;
use crate::traits::*;
use crate::types::*;

/// Validate that a period names a real month
pub fn validate_periodo(periodo: &Periodo) -> ConciliacionResult<()> {
    if !(1..=12).contains(&periodo.month) {
        return Err(ConciliacionError::Validation(format!(
            "Month must be between 1 and 12, got {}",
            periodo.month
        )));
    }

    if periodo.inicio().is_none() {
        return Err(ConciliacionError::Validation(format!(
            "Year out of range: {}",
            periodo.year
        )));
    }

    Ok(())
}

/// Validate the name recorded on user actions
pub fn validate_usuario(usuario: &str) -> ConciliacionResult<()> {
    if usuario.trim().is_empty() {
        return Err(ConciliacionError::Validation(
            "User name cannot be empty".to_string(),
        ));
    }

    if usuario.len() > 100 {
        return Err(ConciliacionError::Validation(
            "User name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate free-text notes attached to a link
pub fn validate_notas(notas: Option<&str>) -> ConciliacionResult<()> {
    if notas.is_some_and(|n| n.len() > 500) {
        return Err(ConciliacionError::Validation(
            "Notes cannot exceed 500 characters".to_string(),
        ));
    }

    Ok(())
}

/// Stricter configuration validator
///
/// On top of the base rules, every field must carry weight and the
/// probable threshold must be above zero, so that unrelated records never
/// classify as PROBABLE.
pub struct EnhancedConfiguracionValidator;

impl ConfiguracionValidator for EnhancedConfiguracionValidator {
    fn validate_configuracion(&self, config: &ConfiguracionMatching) -> ConciliacionResult<()> {
        config.validate()?;

        for (campo, peso) in [
            ("peso_fecha", config.peso_fecha),
            ("peso_valor", config.peso_valor),
            ("peso_descripcion", config.peso_descripcion),
        ] {
            if peso <= 0.0 {
                return Err(ConciliacionError::InvalidConfiguration(format!(
                    "{} must be greater than zero",
                    campo
                )));
            }
        }

        if config.score_minimo_probable <= 0.0 {
            return Err(ConciliacionError::InvalidConfiguration(
                "score_minimo_probable must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
