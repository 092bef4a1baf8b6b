use std::str::FromStr;

use reconkit_core::Error;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Eq(String, String),
    NotEq(String, String),
    Exists(String),
    NotExists(String),
}

/// Equality-based label selector: `k=v`, `k==v`, `k!=v`, `k`, `!k`, comma-separated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    reqs: Vec<Requirement>,
}

impl LabelSelector {
    pub fn is_empty(&self) -> bool { self.reqs.is_empty() }

    pub fn matches(&self, labels: Option<&Map<String, Value>>) -> bool {
        let lookup = |k: &str| labels.and_then(|l| l.get(k)).and_then(|v| v.as_str());
        self.reqs.iter().all(|r| match r {
            Requirement::Eq(k, v) => lookup(k) == Some(v.as_str()),
            Requirement::NotEq(k, v) => lookup(k) != Some(v.as_str()),
            Requirement::Exists(k) => lookup(k).is_some(),
            Requirement::NotExists(k) => lookup(k).is_none(),
        })
    }
}

impl FromStr for LabelSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut reqs = Vec::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if term.contains(' ') || term.contains('(') {
                return Err(Error::Invalid(format!("unsupported selector term {:?} (set-based selectors are not supported)", term)));
            }
            let req = if let Some(k) = term.strip_prefix('!') {
                Requirement::NotExists(k.to_string())
            } else if let Some((k, v)) = term.split_once("!=") {
                Requirement::NotEq(k.to_string(), v.to_string())
            } else if let Some((k, v)) = term.split_once("==") {
                Requirement::Eq(k.to_string(), v.to_string())
            } else if let Some((k, v)) = term.split_once('=') {
                Requirement::Eq(k.to_string(), v.to_string())
            } else {
                Requirement::Exists(term.to_string())
            };
            let key = match &req {
                Requirement::Eq(k, _) | Requirement::NotEq(k, _) | Requirement::Exists(k) | Requirement::NotExists(k) => k,
            };
            if key.is_empty() {
                return Err(Error::Invalid(format!("selector term {:?} has an empty key", term)));
            }
            reqs.push(req);
        }
        Ok(Self { reqs })
    }
}
