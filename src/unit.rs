use sha2::{Digest, Sha256};

use crate::{ast::Module, diagnostics::Diagnostic, parser::parse_fragment};

const UNIT_PREFIX: &str = "neval-";

/// Input to an evaluation: source text, or a tree parsed earlier.
#[derive(Debug, Clone)]
pub enum Fragment {
    Source(String),
    Module(Module),
}

impl From<&str> for Fragment {
    fn from(source: &str) -> Self {
        Self::Source(source.to_string())
    }
}

impl From<String> for Fragment {
    fn from(source: String) -> Self {
        Self::Source(source)
    }
}

impl From<&String> for Fragment {
    fn from(source: &String) -> Self {
        Self::Source(source.clone())
    }
}

impl From<Module> for Fragment {
    fn from(module: Module) -> Self {
        Self::Module(module)
    }
}

/// A fragment together with its content fingerprint and the name of the
/// synthetic unit it compiles to.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    fragment: Fragment,
    fingerprint: String,
    name: String,
}

impl SourceUnit {
    pub fn new(fragment: impl Into<Fragment>) -> Self {
        let fragment = fragment.into();
        let fingerprint = match &fragment {
            Fragment::Source(text) => fingerprint(text.as_bytes()),
            Fragment::Module(module) => fingerprint(format!("{module:?}").as_bytes()),
        };
        let name = format!("{UNIT_PREFIX}{fingerprint}");
        Self {
            fragment,
            fingerprint,
            name,
        }
    }

    /// Synthetic unit name, `neval-<sha256 hex>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The literal source text, when the fragment was given as text.
    pub fn text(&self) -> Option<&str> {
        match &self.fragment {
            Fragment::Source(text) => Some(text),
            Fragment::Module(_) => None,
        }
    }

    pub fn parse(&self) -> Result<Module, Diagnostic> {
        match &self.fragment {
            Fragment::Source(text) => parse_fragment(text),
            Fragment::Module(module) => Ok(module.clone()),
        }
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Whether `name` has the shape of a synthetic unit name.
pub fn is_unit_name(name: &str) -> bool {
    name.strip_prefix(UNIT_PREFIX).is_some_and(|digest| {
        digest.len() == 64 && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}
