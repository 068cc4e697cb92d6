//! Pipeline mutations expressed as values.

use super::stage::{Stage, StageName};

/// One mutation of a pipeline. Batches are applied in submission order.
#[derive(Debug)]
pub enum PipelineCommand {
    AddLast {
        name: StageName,
        stage: Stage,
    },
    AddBefore {
        anchor: StageName,
        name: StageName,
        stage: Stage,
    },
    AddAfter {
        anchor: StageName,
        name: StageName,
        stage: Stage,
    },
    /// Fails if the stage is missing.
    Remove { name: StageName },
    /// No-op if the stage is missing.
    RemoveIfPresent { name: StageName },
}

impl PipelineCommand {
    /// Insert before `anchor` when it is installed, otherwise append.
    pub fn insert_before_or_last(
        pipeline: &super::Pipeline,
        anchor: StageName,
        name: StageName,
        stage: Stage,
    ) -> Self {
        if pipeline.contains(anchor) {
            PipelineCommand::AddBefore { anchor, name, stage }
        } else {
            PipelineCommand::AddLast { name, stage }
        }
    }
}
