//! Shared fixtures for the corrflow benchmarks.

use corrflow_core::{ActionContext, BuildError, Message, WorkflowBuilder, WorkflowDefinition};
use futures::future::{ready, Ready};

corrflow_core::workflow_state! {
    pub enum Stage {
        Created = 0,
        Processing = 1,
        Completed = 2,
        Failed = 3,
    }
}

#[derive(Debug, Clone)]
pub struct Start {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct Complete {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct Fail {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct Retry {
    pub id: String,
}

fn noop<M: Message>(_ctx: ActionContext<M>) -> Ready<anyhow::Result<()>> {
    ready(Ok(()))
}

/// Job lifecycle: created, processing (with heartbeats), completed or failed,
/// and retried from failed.
pub struct Pipeline;

impl WorkflowDefinition for Pipeline {
    type State = Stage;

    fn name() -> &'static str {
        "pipeline"
    }

    fn configure(b: &mut WorkflowBuilder<Stage>) -> Result<(), BuildError> {
        b.start_when::<Start>(Stage::Processing)?
            .execute(noop::<Start>);

        b.on(Stage::Processing)
            .when::<Heartbeat>()?
            .execute(noop::<Heartbeat>);
        b.on(Stage::Processing)
            .when::<Complete>()?
            .transition_to(Stage::Completed)?;
        b.on(Stage::Processing)
            .when::<Fail>()?
            .transition_to(Stage::Failed)?;
        b.on(Stage::Failed)
            .when::<Retry>()?
            .transition_to(Stage::Processing)?;

        b.correlate(|m: &Start| m.id.clone())?;
        b.correlate(|m: &Heartbeat| m.id.clone())?;
        b.correlate(|m: &Complete| m.id.clone())?;
        b.correlate(|m: &Fail| m.id.clone())?;
        b.correlate(|m: &Retry| m.id.clone())?;
        Ok(())
    }
}
