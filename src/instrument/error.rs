use super::LoaderId;
use thiserror::Error;

/// The rewriter could not parse its input, or produced output that is not a
/// well-formed class
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal class format: {0}")]
pub struct IllegalClassFormat(pub String);

impl IllegalClassFormat {
    pub fn new(reason: impl Into<String>) -> Self {
        IllegalClassFormat(reason.into())
    }
}

impl From<rmp_serde::decode::Error> for IllegalClassFormat {
    fn from(e: rmp_serde::decode::Error) -> Self {
        IllegalClassFormat(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for IllegalClassFormat {
    fn from(e: rmp_serde::encode::Error) -> Self {
        IllegalClassFormat(e.to_string())
    }
}

/// Outcome of a failed load, define or transform request
///
/// `NotFound` means the class does not exist. `NotTransformed`, `Protected`
/// and `Malformed` all mean the class exists but could not be instrumented;
/// see [`LoadError::is_instrumentation_failure`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("class not found: {0}")]
    NotFound(String),

    /// The rewriter declined to transform the class
    #[error("class not transformed: {0}")]
    NotTransformed(String),

    #[error("class {0} is in a protected namespace and is never transformed")]
    Protected(String),

    /// The rewriter rejected its input or produced an invalid class
    #[error("transformation of {name} failed: {source}")]
    Malformed {
        name: String,
        #[source]
        source: IllegalClassFormat,
    },

    /// Unmodified bytes could not be defined
    #[error("cannot define {name}: {source}")]
    ClassFormat {
        name: String,
        #[source]
        source: IllegalClassFormat,
    },

    #[error("class {name} is already defined by loader {loader}")]
    AlreadyDefined { name: String, loader: LoaderId },
}

/// Failure while running a method of a loaded class
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("class {class} has no method {method}")]
    NoSuchMethod { class: String, method: String },

    #[error("reference {0} is not bound to an object")]
    Unbound(String),

    /// A monitor was exited out of order or was still held on return
    #[error("illegal monitor state in {method}: {reason}")]
    IllegalMonitorState { method: String, reason: String },

    #[error("call depth exceeded in {0}")]
    StackOverflow(String),
}

impl LoadError {
    /// Whether the class exists but could not be instrumented
    pub fn is_instrumentation_failure(&self) -> bool {
        matches!(
            self,
            LoadError::NotTransformed(_) | LoadError::Protected(_) | LoadError::Malformed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_families() {
        assert!(!LoadError::NotFound("Foo".into()).is_instrumentation_failure());
        assert!(LoadError::NotTransformed("Foo".into()).is_instrumentation_failure());
        assert!(LoadError::Protected("std.Foo".into()).is_instrumentation_failure());
        assert!(
            LoadError::Malformed {
                name: "Foo".into(),
                source: IllegalClassFormat::new("truncated"),
            }
            .is_instrumentation_failure()
        );
        assert!(
            !LoadError::ClassFormat {
                name: "Foo".into(),
                source: IllegalClassFormat::new("truncated"),
            }
            .is_instrumentation_failure()
        );
    }

    #[test]
    fn test_messages_name_the_class() {
        let err = LoadError::Malformed {
            name: "app.Foo".into(),
            source: IllegalClassFormat::new("bad magic"),
        };
        assert_eq!(
            err.to_string(),
            "transformation of app.Foo failed: illegal class format: bad magic"
        );
    }
}
