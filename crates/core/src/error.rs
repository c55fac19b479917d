/// Result alias that carries the custom [`LedCavaError`] type.
pub type Result<T> = std::result::Result<T, LedCavaError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum LedCavaError {
    /// Configuration rejected at construction time (bad geometry, pixel
    /// count mismatch, out-of-range brightness). Always fatal at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    /// The external spectrum analyzer could not be spawned, or it exited
    /// within the startup grace window. Fatal; carries the captured
    /// diagnostic output.
    #[error("failed to start spectrum analyzer: {0}")]
    SpawnFailure(String),
    /// A logical coordinate fell outside the configured display geometry.
    /// Geometry is validated up front, so hitting this at runtime means a
    /// defect in the calling effect.
    #[error("coordinate ({x}, {y}) on module {module} is outside the display")]
    OutOfRange { x: usize, y: usize, module: usize },
    /// An effect was requested by a name the registry does not contain.
    #[error("effect not found: {0}")]
    EffectNotFound(String),
    /// The registry ended up empty, so the run loop cannot start.
    #[error("no effects are enabled")]
    NoEffectsAvailable,
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
