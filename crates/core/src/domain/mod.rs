pub mod decision;
pub mod finding;
pub mod request;
pub mod session;
