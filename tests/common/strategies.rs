//! Proptest strategies for queue and task properties.

use analysis_core::{AnalysisTask, AnalysisType};
use proptest::prelude::*;

pub fn analysis_type_strategy() -> impl Strategy<Value = AnalysisType> {
    prop::sample::select(AnalysisType::ALL.to_vec())
}

/// Priorities from a narrow range so equal priorities (FIFO ties) are common
pub fn priority_strategy() -> impl Strategy<Value = i32> {
    -3i32..=3
}

/// A batch of tasks with unique ids, in enqueue order
pub fn task_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<AnalysisTask>> {
    prop::collection::vec((priority_strategy(), analysis_type_strategy()), 1..max_len).prop_map(
        |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(index, (priority, analysis_type))| {
                    AnalysisTask::new(format!("task-{index}"), format!("alert-{index}"), analysis_type)
                        .with_priority(priority)
                })
                .collect()
        },
    )
}
