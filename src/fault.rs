use std::fmt;

/// Conditions raised while resolving and running the request pipeline.
///
/// Every variant is caught at the dispatch boundary and converted to an HTTP
/// status there; faults never escape a request coroutine. The mapping is:
///
/// - [`Fault::RouteNotFound`] / [`Fault::HandlerNotFound`] → 404
/// - [`Fault::MethodNotFound`] → 403
/// - [`Fault::ValidationRejected`] / [`Fault::Uncaught`] → 500
///   (debug mode substitutes a 200 with an inline message + trace)
/// - [`Fault::EarlyExit`] → 200 with whatever the handler already buffered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// No route mapping exists for the request URI.
    RouteNotFound { uri: String },
    /// The route resolved but no handler is registered under that name.
    HandlerNotFound { handler: String },
    /// The handler is registered but does not expose the routed method.
    MethodNotFound { handler: String, method: String },
    /// The validation stage rejected the merged input.
    ValidationRejected { message: String },
    /// Intentional early termination; buffered response content is flushed
    /// instead of an error body.
    EarlyExit,
    /// Any other fault raised during pipeline or handler execution.
    Uncaught { message: String },
}

impl Fault {
    /// Wrap an arbitrary fault message.
    pub fn uncaught(message: impl Into<String>) -> Self {
        Fault::Uncaught {
            message: message.into(),
        }
    }

    /// Signal a validation rejection from a form unit.
    pub fn rejected(message: impl Into<String>) -> Self {
        Fault::ValidationRejected {
            message: message.into(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::RouteNotFound { uri } => write!(f, "no route for {uri}"),
            Fault::HandlerNotFound { handler } => write!(f, "handler not found: {handler}"),
            Fault::MethodNotFound { handler, method } => {
                write!(f, "handler {handler} has no method {method}")
            }
            Fault::ValidationRejected { message } => write!(f, "validation rejected: {message}"),
            Fault::EarlyExit => write!(f, "early exit"),
            Fault::Uncaught { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for Fault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let fault = Fault::MethodNotFound {
            handler: "demo".into(),
            method: "hello".into(),
        };
        assert_eq!(fault.to_string(), "handler demo has no method hello");
        assert_eq!(Fault::rejected("bad input").to_string(), "validation rejected: bad input");
    }
}
