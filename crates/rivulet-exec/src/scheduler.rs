//! Thread-per-node scheduling.
//!
//! Every node of a run gets its own scoped thread and runs its lifecycle to
//! completion. A failing node cancels the run before its ports are dropped,
//! so peers that then see a closed channel report `Aborted`, not `Failed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rivulet_mem::PeakTracker;
use rivulet_operators::{Node, NodeContext, NodeIo, OpError, Outcome, Result};

use crate::report::{NodeReport, NodeStatus};

const SAMPLE_EVERY: Duration = Duration::from_millis(2);

pub(crate) struct NodeTask {
    pub name: String,
    pub node: Box<dyn Node>,
    pub io: NodeIo,
}

pub(crate) struct TaskOutcome {
    pub report: NodeReport,
    pub error: Option<OpError>,
}

/// Run all tasks concurrently; results come back in task order.
pub(crate) fn run_tasks(
    tasks: Vec<NodeTask>,
    root: &NodeContext,
    peak: &PeakTracker,
) -> Vec<TaskOutcome> {
    let done = AtomicBool::new(false);
    let budget = root.budget().clone();

    thread::scope(|s| {
        let sampler = s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                peak.sample(&budget);
                thread::sleep(SAMPLE_EVERY);
            }
        });

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let name = task.name.clone();
            let component = task.node.component_type();
            let ctx = root.for_node(&task.name);
            let spawned = thread::Builder::new()
                .name(format!("rivulet-{name}"))
                .spawn_scoped(s, move || drive(task, ctx, peak));
            handles.push((name, component, spawned));
        }

        let outcomes = handles
            .into_iter()
            .map(|(name, component, spawned)| {
                let joined = match spawned {
                    Ok(handle) => handle.join().map_err(|_| "node thread panicked".to_string()),
                    Err(e) => Err(format!("could not spawn node thread: {e}")),
                };
                joined.unwrap_or_else(|msg| {
                    root.cancel_token().cancel();
                    lost(name, component, msg)
                })
            })
            .collect();

        done.store(true, Ordering::Release);
        let _ = sampler.join();
        outcomes
    })
}

fn drive(task: NodeTask, ctx: NodeContext, peak: &PeakTracker) -> TaskOutcome {
    let NodeTask { name, mut node, mut io } = task;
    let started = Instant::now();

    #[cfg(feature = "tracing")]
    tracing::debug!(node = %name, component = node.component_type(), "node started");

    let result = lifecycle(node.as_mut(), &mut io, &ctx);
    peak.sample(ctx.budget());

    let (status, error) = match result {
        Ok(Outcome::Finished) => (NodeStatus::Finished, None),
        Ok(Outcome::Aborted) => (NodeStatus::Aborted, None),
        Err(_) if ctx.is_cancelled() => (NodeStatus::Aborted, None),
        Err(e) => {
            // must happen before `io` is dropped
            ctx.cancel_token().cancel();
            (NodeStatus::Failed, Some(e))
        }
    };

    let spilled_bytes = node.spilled_bytes();
    node.free();

    let report = NodeReport {
        name,
        component_type: node.component_type().to_string(),
        status,
        error: error.as_ref().map(ToString::to_string),
        records_in: io.records_in(),
        records_out: io.records_out(),
        spilled_bytes,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    drop(io);
    TaskOutcome { report, error }
}

fn lifecycle(node: &mut dyn Node, io: &mut NodeIo, ctx: &NodeContext) -> Result<Outcome> {
    node.pre_execute(ctx)?;
    let outcome = node.execute(io, ctx)?;
    if outcome == Outcome::Finished {
        node.post_execute(ctx)?;
    }
    Ok(outcome)
}

fn lost(name: String, component: &str, msg: String) -> TaskOutcome {
    TaskOutcome {
        report: NodeReport {
            name,
            component_type: component.to_string(),
            status: NodeStatus::Failed,
            error: Some(msg.clone()),
            records_in: Vec::new(),
            records_out: Vec::new(),
            spilled_bytes: 0,
            elapsed_ms: 0,
        },
        error: Some(OpError::Exec(msg)),
    }
}
