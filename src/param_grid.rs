use crate::models::StrategyDefinition;
use log::warn;

/// Expands every ranged parameter into concrete values. The output order is
/// the nested product of range tokens in parameter order.
pub fn expand(definition: &StrategyDefinition) -> Vec<StrategyDefinition> {
    let mut leaves = Vec::new();
    expand_from(definition.clone(), 0, &mut leaves);
    leaves
}

fn expand_from(definition: StrategyDefinition, index: usize, leaves: &mut Vec<StrategyDefinition>) {
    if index >= definition.parameters.len() {
        leaves.push(definition);
        return;
    }

    let parameter = &definition.parameters[index];
    if !parameter.use_range {
        expand_from(definition, index + 1, leaves);
        return;
    }

    let tokens: Vec<String> = parameter.range_tokens().map(str::to_string).collect();
    for token in tokens {
        let mut branch = definition.clone();
        let param = &mut branch.parameters[index];
        param.value = token;
        param.use_value = true;
        expand_from(branch, index + 1, leaves);
    }
}

/// Flattens a definition tree into the list of runnable leaves. Children are
/// visited before their parent; definitions without an algorithm are skipped.
pub fn build_run_list(definition: &StrategyDefinition) -> Vec<StrategyDefinition> {
    let mut runs = Vec::new();
    collect_runs(definition, &mut runs);
    runs
}

fn collect_runs(definition: &StrategyDefinition, runs: &mut Vec<StrategyDefinition>) {
    for child in &definition.strategies {
        collect_runs(child, runs);
    }

    if !definition.has_algorithm() {
        warn!(
            "Skipping strategy {} without algorithm name",
            display_name(definition)
        );
        return;
    }

    let mut leaf = definition.clone();
    leaf.strategies.clear();
    runs.extend(expand(&leaf));
}

/// Name of the track built from one expanded leaf.
pub fn track_name(definition: &StrategyDefinition) -> String {
    let values: Vec<&str> = definition
        .parameters
        .iter()
        .filter(|p| p.use_value)
        .map(|p| p.value.as_str())
        .collect();

    if values.is_empty() {
        display_name(definition).to_string()
    } else {
        values.join(" ")
    }
}

fn display_name(definition: &StrategyDefinition) -> &str {
    if definition.name.trim().is_empty() {
        "Backtest"
    } else {
        &definition.name
    }
}
