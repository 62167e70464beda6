//! Document-level error type.

/// Errors raised while reading or writing an XMLTV document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmltvError {
    /// The input is not well-formed XML.
    Parse(String),
    /// The root element is not `<tv>`.
    UnexpectedRoot(String),
    /// The document could not be serialized.
    Serialize(String),
}

impl std::fmt::Display for XmltvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "XML parse error: {msg}"),
            Self::UnexpectedRoot(name) => {
                write!(f, "unexpected root element <{name}>, expected <tv>")
            }
            Self::Serialize(msg) => write!(f, "XML serialization error: {msg}"),
        }
    }
}

impl std::error::Error for XmltvError {}
