mod agent;
mod dataset;
mod error;
mod eval;
mod event;
mod pair;
mod trace;
mod util;

pub use agent::{Agent, AgentError, AgentFactory, Observer};
pub use dataset::DatasetRecord;
pub use error::{Error, Result};
pub use eval::{
    ComplianceLabel, EvalSummary, KeyResolver, MemorySource, MetricResult, MetricSet, ResolvedKey,
    RunCounters, RunManifest, SourceHits, TurnEvalRow,
};
pub use event::ObserverEvent;
pub use pair::TurnPair;
pub use trace::{
    ComplianceTrace, DialogStatus, DialogTrace, RecallItem, RecallTrace, SkipReason, ToolTrace,
    TurnStatus, TurnTrace, TRACE_VERSION,
};
pub use util::{is_truthy, string_list, value_to_string};
