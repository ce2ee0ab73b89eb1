//! Accelerator selection.

use abllama_abstraction::{Accelerator, ConfigError, DeviceStrategy, ModelBackend};

/// Picks the accelerator to load the model on.
///
/// There is no CPU fallback: a backend without accelerators, or an ordinal
/// it does not report, is a [`ConfigError::NoAccelerator`].
pub fn select_accelerator(backend: &dyn ModelBackend, strategy: DeviceStrategy) -> Result<Accelerator, ConfigError> {
    let available = backend.accelerators();
    if available.is_empty() {
        return Err(ConfigError::NoAccelerator(format!(
            "engine '{}' reports no accelerator and CPU execution is not supported",
            backend.id()
        )));
    }

    let selected = match strategy {
        DeviceStrategy::Auto => available.into_iter().next(),
        DeviceStrategy::Ordinal(ordinal) => available.into_iter().find(|a| a.ordinal == ordinal),
    };

    let accelerator = selected.ok_or_else(|| {
        ConfigError::NoAccelerator(format!("engine '{}' has no accelerator matching {strategy:?}", backend.id()))
    })?;
    tracing::info!(device = %accelerator, "selected accelerator");
    Ok(accelerator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use abllama_models::MockBackend;

    #[test]
    fn test_no_accelerator_is_config_error() {
        let backend = MockBackend::with_accelerators(0);
        let err = select_accelerator(&backend, DeviceStrategy::Auto).unwrap_err();
        assert!(matches!(err, ConfigError::NoAccelerator(_)));
    }

    #[test]
    fn test_auto_picks_first() {
        let backend = MockBackend::with_accelerators(2);
        assert_eq!(select_accelerator(&backend, DeviceStrategy::Auto).unwrap().ordinal, 0);
    }

    #[test]
    fn test_explicit_ordinal() {
        let backend = MockBackend::with_accelerators(2);
        assert_eq!(select_accelerator(&backend, DeviceStrategy::Ordinal(1)).unwrap().ordinal, 1);
        assert!(matches!(
            select_accelerator(&backend, DeviceStrategy::Ordinal(5)),
            Err(ConfigError::NoAccelerator(_))
        ));
    }
}
