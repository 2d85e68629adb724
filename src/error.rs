use std::fmt;

/// Error taxonomy surfaced by the service-discovery and routing core.
#[derive(Debug, Clone)]
pub enum ServiceError {
    NoInstances,
    NoSuchKey,
    GateClosed,
    NoRouter,
    NoFailovers,
    FailoversFailed,
    RouteError {
        instance: String,
        chain: Box<ErrorChain>,
    },
    NotInitialized,
    Incomplete,
    NoDatacenters,
    Backend(String),
    Config(String),
    Internal(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::NoInstances => write!(f, "no instances"),
            ServiceError::NoSuchKey => write!(f, "no such key"),
            ServiceError::GateClosed => write!(f, "gate closed"),
            ServiceError::NoRouter => write!(f, "no router"),
            ServiceError::NoFailovers => write!(f, "no failovers"),
            ServiceError::FailoversFailed => write!(f, "all failovers failed"),
            ServiceError::RouteError { instance, chain } => {
                write!(f, "route error for {}: {}", instance, chain)
            }
            ServiceError::NotInitialized => write!(f, "not initialized"),
            ServiceError::Incomplete => write!(f, "incomplete configuration: no watches or registrations"),
            ServiceError::NoDatacenters => write!(f, "no datacenters"),
            ServiceError::Backend(msg) => write!(f, "backend error: {}", msg),
            ServiceError::Config(msg) => write!(f, "config error: {}", msg),
            ServiceError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

/// A linked list of `{err, sub}` pairs, rendered as `outermost(inner(...))`.
///
/// Used by the layered accessor (C10) to carry the full rejection history
/// of a `Get` alongside the instance that was ultimately (or not) selected.
#[derive(Debug, Clone)]
pub struct ErrorChain {
    pub err: String,
    pub sub: Option<Box<ErrorChain>>,
}

impl ErrorChain {
    pub fn new(err: impl Into<String>) -> Self {
        Self {
            err: err.into(),
            sub: None,
        }
    }

    /// Prepend a new outermost error, pushing the current chain down as `sub`.
    pub fn wrap(self, err: impl Into<String>) -> Self {
        Self {
            err: err.into(),
            sub: Some(Box::new(self)),
        }
    }

    pub fn from_error(err: &ServiceError) -> Self {
        ErrorChain::new(err.to_string())
    }
}

impl fmt::Display for ErrorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub {
            Some(sub) => write!(f, "{}({})", self.err, sub),
            None => write!(f, "{}", self.err),
        }
    }
}
