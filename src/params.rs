use crate::prelude::{Error, Real, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Named model parameters. A BTreeMap keeps iteration order stable so two
/// models built from the same inputs always compare and print the same.
pub type Parameters = BTreeMap<String, Real>;

/// A probability that is either a literal value or a reference to a named
/// model parameter, resolved at draw time.
#[derive(Debug, Clone, PartialEq)]
pub enum Rate {
    Fixed(Real),
    Named(String),
}

impl Rate {
    pub fn get(&self, params: &Parameters) -> Real {
        match self {
            Rate::Fixed(value) => *value,
            Rate::Named(name) => params.get(name).copied().unwrap_or(0.0),
        }
    }

    /// The parameter name this rate points at, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Rate::Fixed(_) => None,
            Rate::Named(name) => Some(name),
        }
    }
}

impl Default for Rate {
    fn default() -> Self {
        Rate::Fixed(0.0)
    }
}

impl From<Real> for Rate {
    fn from(value: Real) -> Self {
        Rate::Fixed(value)
    }
}

impl From<&str> for Rate {
    fn from(name: &str) -> Self {
        Rate::Named(name.to_string())
    }
}

impl From<String> for Rate {
    fn from(name: String) -> Self {
        Rate::Named(name)
    }
}

/// Read a plain-text parameters file with one `name : number` entry per
/// line. Lines starting with `#`, `//` or `*` and blank lines are skipped.
pub fn read_params_file(path: impl AsRef<Path>) -> Result<Parameters> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_params(&data)
}

pub(crate) fn parse_params(data: &str) -> Result<Parameters> {
    let mut params = Parameters::new();
    for (lineno, raw) in data.lines().enumerate() {
        let line = raw.trim();
        if is_comment(line) {
            continue;
        }
        let (name, value) = parse_entry(line, lineno + 1)?;
        params.insert(name, value);
    }
    Ok(params)
}

fn is_comment(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with("//") || line.starts_with('*')
}

fn parse_entry(line: &str, lineno: usize) -> Result<(String, Real)> {
    let mut split = line.splitn(2, ':');
    let name = split
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::format(lineno, format!("missing parameter name in {:?}", line)))?;
    let number = split
        .next()
        .map(str::trim)
        .ok_or_else(|| Error::format(lineno, format!("expected `name : number`, got {:?}", line)))?;
    let value = number
        .parse::<Real>()
        .map_err(|_| Error::format(lineno, format!("{:?} is not a number", number)))?;
    Ok((name.to_string(), value))
}
