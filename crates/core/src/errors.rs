use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("invalid effective config: {field} = {value} ({constraint})")]
    ConfigInvalid { field: &'static str, value: String, constraint: &'static str },
    #[error("sub-agent tenant does not match its parent: {sub_client:?} != {parent_client:?}")]
    TenantMismatch { sub_client: Option<String>, parent_client: Option<String> },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
