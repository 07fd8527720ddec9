use crate::models::ParameterSet;
use crate::search_space::SearchSpace;
use std::collections::HashSet;

/// Stable textual key for a parameter set.
pub fn parameter_signature(parameters: &ParameterSet) -> String {
    format!("{:?}", parameters)
}

fn push_neighbor_variation(
    neighbor_params: ParameterSet,
    seen_variations: &mut HashSet<String>,
    neighbor_variations: &mut Vec<ParameterSet>,
) {
    if seen_variations.insert(parameter_signature(&neighbor_params)) {
        neighbor_variations.push(neighbor_params);
    }
}

/// Add neighbor parameter variations by adjusting one parameter at a time.
///
/// Steps are taken in unit space: one integer, one category, or
/// `1 / real_steps` of a real dimension's range per multiplier.
pub fn add_single_parameter_neighbor_variations(
    space: &SearchSpace,
    step_multipliers: &[f64],
    real_steps: u32,
    current_params: &ParameterSet,
    seen_variations: &mut HashSet<String>,
    neighbor_variations: &mut Vec<ParameterSet>,
) {
    for (name, dimension) in space.dimensions() {
        let Some(current_value) = current_params.get(name) else {
            continue;
        };
        let Some(current_unit) = dimension.to_unit(current_value) else {
            continue;
        };
        let step = dimension.unit_step(real_steps);

        for &multiplier in step_multipliers {
            let candidate = current_unit + multiplier * step;
            if !(-1e-9..=1.0 + 1e-9).contains(&candidate) {
                continue;
            }

            let new_value = dimension.from_unit(candidate);
            if &new_value == current_value {
                continue;
            }

            let mut neighbor_params = current_params.clone();
            neighbor_params.insert(name.clone(), new_value);
            push_neighbor_variation(neighbor_params, seen_variations, neighbor_variations);
        }
    }
}
