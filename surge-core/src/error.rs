pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`duration` must be a positive duration")]
    InvalidDuration,

    #[error("`ramp` must be a sequence of {{ target, duration }} with a positive total duration")]
    InvalidStages,

    #[error("`ramp` stages must fit within `duration`")]
    RampExceedsDuration,

    #[error("the final `ramp` target must equal `vus`")]
    RampFinalTarget,

    #[error("think time `min` must not exceed `max`")]
    InvalidThinkTime,

    #[error("invalid threshold on `{metric}`: {error}")]
    InvalidThreshold { metric: String, error: String },
}
