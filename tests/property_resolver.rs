// tests/property_resolver.rs

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use staleflow::config::IndicatorConfig;
use staleflow::errors::StaleflowError;
use staleflow::indicators::resolve_order;
use staleflow::types::IndicatorType;

const RAW: [&str; 3] = ["raw_a", "raw_b", "raw_c"];

fn indicator(name: &str, refs: &[String]) -> IndicatorConfig {
    let code = if refs.is_empty() {
        "1".to_string()
    } else {
        refs.join(" + ")
    };
    IndicatorConfig {
        var_name: name.to_string(),
        category: String::new(),
        indicator_type: IndicatorType::Numeric,
        r_code: code,
        r_filter_code: None,
    }
}

// Acyclic by construction: ind_i may only reference ind_j for j < i. The
// declared order is then shuffled.
fn acyclic_indicators(max: usize) -> impl Strategy<Value = Vec<IndicatorConfig>> {
    (1..=max)
        .prop_flat_map(|n| {
            proptest::collection::vec(
                (
                    proptest::collection::vec(any::<usize>(), 0..4),
                    proptest::collection::vec(0..RAW.len(), 0..3),
                ),
                n,
            )
        })
        .prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (deps, raws))| {
                    let mut refs: BTreeSet<String> = BTreeSet::new();
                    if i > 0 {
                        refs.extend(deps.into_iter().map(|d| format!("ind_{}", d % i)));
                    }
                    refs.extend(raws.into_iter().map(|r| RAW[r].to_string()));
                    let refs: Vec<String> = refs.into_iter().collect();
                    indicator(&format!("ind_{i}"), &refs)
                })
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}

fn raw_fields() -> Vec<String> {
    RAW.iter().map(|s| s.to_string()).collect()
}

fn referenced(ind: &IndicatorConfig) -> Vec<String> {
    ind.r_code
        .split('+')
        .map(|t| t.trim().to_string())
        .filter(|t| t.starts_with("ind_"))
        .collect()
}

proptest! {
    #[test]
    fn every_indicator_follows_its_dependencies(indicators in acyclic_indicators(12)) {
        let ordered = resolve_order(&indicators, &raw_fields()).unwrap();

        prop_assert_eq!(ordered.len(), indicators.len());
        let position: HashMap<&str, usize> = ordered
            .iter()
            .enumerate()
            .map(|(i, ind)| (ind.var_name.as_str(), i))
            .collect();
        for ind in &ordered {
            for dep in referenced(ind) {
                prop_assert!(position[dep.as_str()] < position[ind.var_name.as_str()]);
            }
        }
    }

    #[test]
    fn a_back_edge_always_aborts_resolution(
        indicators in acyclic_indicators(8).prop_filter("needs a dependency", |inds| {
            inds.iter().any(|i| !referenced(i).is_empty())
        })
    ) {
        // Make some referenced indicator depend back on its dependent.
        let mut indicators = indicators;
        let dependent = indicators
            .iter()
            .find(|i| !referenced(i).is_empty())
            .cloned()
            .unwrap();
        let target = referenced(&dependent)[0].clone();
        for ind in indicators.iter_mut() {
            if ind.var_name == target {
                ind.r_code = format!("{} + {}", ind.r_code, dependent.var_name);
            }
        }

        let err = resolve_order(&indicators, &raw_fields()).unwrap_err();
        prop_assert!(matches!(err, StaleflowError::IndicatorCycle(_)));
    }
}
