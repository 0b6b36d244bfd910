// src/indicators/resolver.rs

//! Dependency ordering of formula-driven indicators.
//!
//! Every indicator's `r_code` / `r_filter_code` is tokenised, each token is
//! classified as an indicator reference, a raw-field reference or unknown,
//! and the indicator references form a graph that is ordered with Kahn's
//! algorithm. Whatever Kahn's algorithm cannot schedule sits on or behind a
//! cycle; a DFS over that remainder recovers the concrete cycle paths.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::config::model::IndicatorConfig;
use crate::errors::{Result, StaleflowError};
use crate::indicators::tokenize::identifiers;

/// References of a single indicator, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorDeps {
    pub indicators: BTreeSet<String>,
    pub raw_fields: BTreeSet<String>,
}

/// Result of [`resolve`].
///
/// Exactly one of `ordered` / `cycles` is non-empty for a non-empty input.
/// A non-empty `cycles` is fatal: callers must never execute a partial order.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub ordered: Vec<IndicatorConfig>,
    pub cycles: Vec<Vec<String>>,
}

impl Resolution {
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Convert into the execution order, failing on any cycle.
    pub fn into_order(self) -> Result<Vec<IndicatorConfig>> {
        if self.has_cycles() {
            return Err(StaleflowError::IndicatorCycle(self.cycles));
        }
        Ok(self.ordered)
    }
}

/// Classify the identifiers of every indicator.
///
/// Fails fast on a duplicate `var_name`, a `var_name` that collides with a
/// raw field, or any identifier that is neither.
pub fn classify(
    indicators: &[IndicatorConfig],
    raw_fields: &[String],
) -> Result<HashMap<String, IndicatorDeps>> {
    let raw: HashSet<&str> = raw_fields.iter().map(String::as_str).collect();
    let mut names: HashSet<&str> = HashSet::new();

    for ind in indicators {
        if raw.contains(ind.var_name.as_str()) {
            return Err(StaleflowError::NameCollision(ind.var_name.clone()));
        }
        if !names.insert(ind.var_name.as_str()) {
            return Err(StaleflowError::ConfigError(format!(
                "indicator '{}' is defined more than once",
                ind.var_name
            )));
        }
    }

    let mut out = HashMap::with_capacity(indicators.len());

    for ind in indicators {
        let mut tokens = identifiers(&ind.r_code);
        if let Some(filter) = &ind.r_filter_code {
            tokens.extend(identifiers(filter));
        }

        let mut deps = IndicatorDeps::default();
        let mut unknown = Vec::new();

        for tok in tokens {
            if names.contains(tok.as_str()) {
                deps.indicators.insert(tok);
            } else if raw.contains(tok.as_str()) {
                deps.raw_fields.insert(tok);
            } else {
                unknown.push(tok);
            }
        }

        if !unknown.is_empty() {
            return Err(StaleflowError::UnknownIdentifiers {
                indicator: ind.var_name.clone(),
                tokens: unknown,
            });
        }

        out.insert(ind.var_name.clone(), deps);
    }

    Ok(out)
}

/// Order `indicators` so every indicator follows all indicators it references.
///
/// The order is stable: among indicators whose dependencies are met, input
/// order wins.
pub fn resolve(indicators: &[IndicatorConfig], raw_fields: &[String]) -> Result<Resolution> {
    let deps = classify(indicators, raw_fields)?;

    // Edge B -> A when A references B, i.e. B must be computed first.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for ind in indicators {
        let name = ind.var_name.as_str();
        let refs = &deps[name].indicators;
        in_degree.insert(name, refs.len());
        for r in refs {
            dependents.entry(r.as_str()).or_default().push(name);
        }
    }

    let mut queue: VecDeque<&str> = indicators
        .iter()
        .map(|i| i.var_name.as_str())
        .filter(|n| in_degree[n] == 0)
        .collect();
    let mut order: Vec<&str> = Vec::with_capacity(indicators.len());

    while let Some(name) = queue.pop_front() {
        order.push(name);
        if let Some(next) = dependents.get(name) {
            for dep in next {
                if let Some(d) = in_degree.get_mut(dep) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*dep);
                    }
                }
            }
        }
    }

    if order.len() < indicators.len() {
        let scheduled: HashSet<&str> = order.iter().copied().collect();
        let remainder: Vec<&str> = indicators
            .iter()
            .map(|i| i.var_name.as_str())
            .filter(|n| !scheduled.contains(n))
            .collect();
        let cycles = find_cycles(&remainder, &deps);
        debug!(
            unscheduled = remainder.len(),
            cycles = cycles.len(),
            "indicator graph contains cycles"
        );
        return Ok(Resolution {
            ordered: Vec::new(),
            cycles,
        });
    }

    let by_name: HashMap<&str, &IndicatorConfig> = indicators
        .iter()
        .map(|i| (i.var_name.as_str(), i))
        .collect();

    Ok(Resolution {
        ordered: order.into_iter().map(|n| by_name[n].clone()).collect(),
        cycles: Vec::new(),
    })
}

/// Convenience wrapper: the execution order, or an error for any cycle.
pub fn resolve_order(
    indicators: &[IndicatorConfig],
    raw_fields: &[String],
) -> Result<Vec<IndicatorConfig>> {
    resolve(indicators, raw_fields)?.into_order()
}

/// Enumerate cycle paths among `remainder`, following "references" edges.
///
/// Each path starts and ends with the same name, e.g. `[A, B, A]`.
fn find_cycles(remainder: &[&str], deps: &HashMap<String, IndicatorDeps>) -> Vec<Vec<String>> {
    let in_remainder: HashSet<&str> = remainder.iter().copied().collect();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut cycles = Vec::new();

    for &start in remainder {
        if visited.contains(start) {
            continue;
        }
        let mut stack: Vec<&str> = Vec::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        dfs(
            start,
            deps,
            &in_remainder,
            &mut visited,
            &mut stack,
            &mut on_stack,
            &mut cycles,
        );
    }

    cycles
}

fn dfs<'a>(
    node: &'a str,
    deps: &'a HashMap<String, IndicatorDeps>,
    in_remainder: &HashSet<&'a str>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    on_stack: &mut HashSet<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    visited.insert(node);
    stack.push(node);
    on_stack.insert(node);

    if let Some(d) = deps.get(node) {
        for next in d.indicators.iter().map(String::as_str) {
            if !in_remainder.contains(next) {
                continue;
            }
            if on_stack.contains(next) {
                if let Some(pos) = stack.iter().position(|n| *n == next) {
                    let mut cycle: Vec<String> =
                        stack[pos..].iter().map(|s| s.to_string()).collect();
                    cycle.push(next.to_string());
                    cycles.push(cycle);
                }
            } else if !visited.contains(next) {
                dfs(next, deps, in_remainder, visited, stack, on_stack, cycles);
            }
        }
    }

    stack.pop();
    on_stack.remove(node);
}
