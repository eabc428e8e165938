//! Mode selector: which of retrieve / store an invocation performs.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Retrieve and emit the previous value.
    #[default]
    Get,

    /// Store a fresh value without looking at the previous one.
    Set,

    /// Retrieve, emit, then store a strictly newer value.
    GetAndSet,
}

impl Mode {
    /// Lenient parse. Unknown values fall back to [`Mode::Get`].
    pub fn from_input(raw: &str) -> Self {
        match Self::recognize(raw) {
            Some(mode) => mode,
            None => {
                tracing::warn!(mode = raw, "unrecognized mode, falling back to get");
                Mode::Get
            }
        }
    }

    /// Strict parse of the accepted spellings.
    pub fn recognize(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "get" => Some(Mode::Get),
            "set" => Some(Mode::Set),
            "get-and-set" | "get_and_set" | "getandset" | "get-set" | "get_set" | "getset"
            | "get+set" | "get and set" => Some(Mode::GetAndSet),
            _ => None,
        }
    }

    pub fn retrieves(&self) -> bool {
        matches!(self, Mode::Get | Mode::GetAndSet)
    }

    pub fn stores(&self) -> bool {
        matches!(self, Mode::Set | Mode::GetAndSet)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Get => "get",
            Mode::Set => "set",
            Mode::GetAndSet => "get-and-set",
        };
        f.write_str(s)
    }
}
