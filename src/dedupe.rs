use std::collections::HashSet;

use crate::request::FetchTask;

#[derive(Debug, Clone, Default)]
pub struct Deduped {
    pub tasks: Vec<FetchTask>,
    pub collapsed: usize,
}

/// Collapses tasks sharing `(variable, locator)`, keeping the first occurrence.
pub fn dedupe<I>(tasks: I) -> Deduped
where
    I: IntoIterator<Item = FetchTask>,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut collapsed = 0usize;
    for task in tasks {
        if seen.insert((task.variable, task.locator.clone())) {
            unique.push(task);
        } else {
            collapsed += 1;
        }
    }
    Deduped {
        tasks: unique,
        collapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BoundingBox, Period, TimeWindow, Variable};
    use crate::request::RequestBuilder;

    fn task(variable: Variable, month: u32, west: f64) -> FetchTask {
        let period = Period::new(2020, month).unwrap();
        RequestBuilder::default()
            .build(
                variable,
                period,
                BoundingBox {
                    west,
                    south: 30.0,
                    east: west + 1.0,
                    north: 31.0,
                },
                TimeWindow::period(&period),
            )
            .unwrap()
    }

    #[test]
    fn identical_requests_collapse() {
        let result = dedupe(vec![
            task(Variable::Air, 8, 240.0),
            task(Variable::Air, 8, 240.0),
            task(Variable::Air, 8, 240.0),
        ]);
        assert_eq!(result.tasks.len(), 1);
        assert_eq!(result.collapsed, 2);
    }

    #[test]
    fn distinct_requests_survive() {
        let input = vec![
            task(Variable::Air, 8, 240.0),
            task(Variable::Hgt, 8, 240.0),
            task(Variable::Air, 9, 240.0),
            task(Variable::Air, 8, 241.0),
        ];
        let result = dedupe(input.clone());
        assert_eq!(result.tasks, input);
        assert_eq!(result.collapsed, 0);
    }

    #[test]
    fn output_never_grows_and_keys_are_unique() {
        let mut input = Vec::new();
        for round in 0..5 {
            for variable in Variable::ALL {
                input.push(task(variable, 7 + (round % 2), 240.0 + (round % 3) as f64));
            }
        }
        let result = dedupe(input.clone());
        assert!(result.tasks.len() <= input.len());
        assert_eq!(result.tasks.len() + result.collapsed, input.len());
        let keys: HashSet<_> = result
            .tasks
            .iter()
            .map(|task| (task.variable, task.locator.clone()))
            .collect();
        assert_eq!(keys.len(), result.tasks.len());
    }

    #[test]
    fn empty_input() {
        let result = dedupe(Vec::new());
        assert!(result.tasks.is_empty());
    }
}
