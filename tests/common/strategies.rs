use orderflow::models::{Process, Task, TaskCategory};
use proptest::prelude::*;

/// A random DAG over `n` tasks. Edges only run from lower to higher index, which
/// keeps the graph acyclic, and each ordered pair appears at most once.
pub fn process_strategy() -> impl Strategy<Value = Process> {
    (1usize..=8)
        .prop_flat_map(|n| {
            let pairs = n * (n - 1) / 2;
            (Just(n), prop::collection::vec(any::<bool>(), pairs))
        })
        .prop_map(|(n, included)| {
            let mut process = Process::new("generated");
            for index in 0..n {
                process.add_task(Task::new(
                    task_id(index),
                    TaskCategory::Http,
                    format!("http://workers/{index}"),
                    "mapping",
                ));
            }

            let pairs = (0..n).flat_map(|from| ((from + 1)..n).map(move |to| (from, to)));
            for ((from, to), keep) in pairs.zip(included) {
                if keep {
                    process = process.with_relation(&task_id(from), &task_id(to));
                }
            }
            process
        })
}

pub fn task_id(index: usize) -> String {
    format!("t{index}")
}
