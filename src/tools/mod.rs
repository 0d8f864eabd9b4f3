pub mod decode;
pub mod executor;
pub mod fetch_web_results;
pub mod plan;
pub mod registry;
pub mod report_generator;
pub mod schema;
pub mod summarize;

pub use decode::DecodeError;
pub use executor::{ToolExecutor, ToolInvocation};
pub use fetch_web_results::{FetchInput, FetchWebResultsTool, WebResult, FETCH_WEB_RESULTS_TOOL};
pub use plan::{fallback_subtasks, PlanInput, PlanTool, PLAN_TOOL};
pub use registry::{StructuredTool, Tool, ToolRegistry};
pub use report_generator::{GenerateReportTool, ReportInput, GENERATE_REPORT_TOOL};
pub use schema::Validate;
pub use summarize::{SummarizeInput, SummarizeTool, SUMMARIZE_TOOL};
