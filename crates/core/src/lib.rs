pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod format;
pub mod rewrite;

pub use domain::decision::{DecisionAction, WorkflowDecision};
pub use domain::finding::{QueryResultRow, SolutionsValue};
pub use domain::request::{DiagnosticReply, DiagnosticRequest, NO_QUERY_SENTINEL};
pub use domain::session::{History, Role, SessionId, Turn};
pub use errors::{DiagnosticError, InterfaceError};
pub use format::{References, ResponseFormatter};
pub use rewrite::{QueryRewriter, RewriteRule};
