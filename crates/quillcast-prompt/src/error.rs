//! Template errors. All of them are configuration mistakes: terminal
//! for the job, never retried.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    #[error("unknown template {0:?}")]
    UnknownTemplate(String),

    #[error("template {template:?} is missing variable {variable:?}")]
    MissingVariable { template: String, variable: String },

    #[error("variable {0:?} is reserved for the tenant persona")]
    ReservedVariable(String),

    #[error("template {template:?} rendered {len} chars, max is {max}")]
    TooLong {
        template: String,
        len: usize,
        max: usize,
    },

    #[error("template {template:?} has an unterminated placeholder")]
    UnterminatedPlaceholder { template: String },
}
