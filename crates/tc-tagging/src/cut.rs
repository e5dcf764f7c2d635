//! Cut-based track selection: an ordered conjunction of field comparisons.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tc_core::{Error, FieldId, Result, Track, TrackSchema, TrackSelector};

/// Comparison operator of a single cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    /// `value > threshold`
    #[serde(rename = ">")]
    Gt,
    /// `value >= threshold`
    #[serde(rename = ">=", alias = "≥")]
    Ge,
    /// `value < threshold`
    #[serde(rename = "<")]
    Lt,
    /// `value <= threshold`
    #[serde(rename = "<=", alias = "≤")]
    Le,
    /// `value == threshold`
    #[serde(rename = "==", alias = "=")]
    Eq,
    /// `value != threshold`
    #[serde(rename = "!=", alias = "≠")]
    Ne,
}

impl Comparator {
    /// Apply the comparison.
    #[inline]
    pub fn apply(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Le => value <= threshold,
            Comparator::Eq => value == threshold,
            Comparator::Ne => value != threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Comparator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ">" => Ok(Comparator::Gt),
            ">=" | "≥" => Ok(Comparator::Ge),
            "<" => Ok(Comparator::Lt),
            "<=" | "≤" => Ok(Comparator::Le),
            "==" | "=" => Ok(Comparator::Eq),
            "!=" | "≠" => Ok(Comparator::Ne),
            other => Err(Error::Configuration(format!("unknown comparator '{other}'"))),
        }
    }
}

/// One `(field, comparator, threshold)` cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutSpec {
    /// Track field name.
    pub field: String,
    /// Comparator.
    pub op: Comparator,
    /// Threshold.
    pub value: f64,
}

impl CutSpec {
    /// Create a cut.
    pub fn new(field: impl Into<String>, op: Comparator, value: f64) -> Self {
        Self { field: field.into(), op, value }
    }
}

impl fmt::Display for CutSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

fn is_op_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '!' | '≥' | '≤' | '≠')
}

/// Parses `"FIELD OP VALUE"`, e.g. `"Track_pt >= 1.0"`.
impl FromStr for CutSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::Configuration(format!("malformed cut '{s}' (expected FIELD OP VALUE)"));

        let op_start = s.find(is_op_char).ok_or_else(bad)?;
        let field = s[..op_start].trim();
        if field.is_empty() {
            return Err(bad());
        }
        let rest = &s[op_start..];
        let op_len = rest
            .char_indices()
            .take_while(|&(_, c)| is_op_char(c))
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        let op: Comparator = rest[..op_len].parse()?;
        let value: f64 = rest[op_len..].trim().parse().map_err(|_| bad())?;
        Ok(CutSpec::new(field, op, value))
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedCut {
    field: FieldId,
    op: Comparator,
    value: f64,
}

/// Conjunction of cuts evaluated in list order, stopping at the first failure.
#[derive(Debug, Clone)]
pub struct CutSelector {
    specs: Vec<CutSpec>,
    cuts: Vec<ResolvedCut>,
}

impl CutSelector {
    /// Resolve every cut field against `schema`.
    ///
    /// An unknown field or a NaN threshold is a configuration error.
    pub fn new(specs: &[CutSpec], schema: &TrackSchema) -> Result<Self> {
        let cuts = specs
            .iter()
            .map(|spec| {
                if spec.value.is_nan() {
                    return Err(Error::Configuration(format!("cut '{spec}' has a NaN threshold")));
                }
                Ok(ResolvedCut { field: schema.resolve(&spec.field)?, op: spec.op, value: spec.value })
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(n_cuts = cuts.len(), "cut selector built");
        Ok(Self { specs: specs.to_vec(), cuts })
    }

    /// Configured cuts.
    pub fn specs(&self) -> &[CutSpec] {
        &self.specs
    }

    /// `true` if every cut passes.
    pub fn passes(&self, track: &Track<'_>) -> bool {
        self.cuts.iter().all(|c| c.op.apply(track.value(c.field), c.value))
    }
}

impl TrackSelector for CutSelector {
    fn name(&self) -> &str {
        "cuts"
    }

    fn evaluate(&mut self, track: &Track<'_>) -> Result<bool> {
        Ok(self.passes(track))
    }
}
